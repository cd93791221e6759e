use predicates::prelude::*;
use rstest::rstest;

mod common;

const MISSING_RUN: &str = r#"
name: app
compile:
  base_image: builder:1
  files: [bin/app]
"#;

const VALID: &str = r#"
name: app
tag: "1.0"
compile:
  base_image: builder:1
  files: [bin/app]
run:
  base_image: runner:1
"#;

#[test]
fn test_help_lists_build() {
    let mut ctx = common::marina();
    ctx.cmd
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"));
}

#[rstest]
#[case("--identity-file")]
#[case("--build-dir")]
#[case("--env")]
#[case("--archive-only")]
#[case("--no-cache")]
#[case("--rebuild-cache")]
#[case("--skip-cleanup")]
fn test_build_help_lists_flag(#[case] flag: &str) {
    let mut ctx = common::marina();
    ctx.cmd
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains(flag));
}

#[test]
fn test_build_requires_app() {
    let mut ctx = common::marina();
    ctx.cmd.arg("build").assert().failure();
}

#[test]
fn test_missing_app_dir() {
    let mut ctx = common::marina();
    ctx.cmd
        .args(["build", "/definitely/not/here"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"))
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_missing_manifest() {
    let mut ctx = common::marina();
    let app = ctx.app_arg().to_path_buf();
    ctx.cmd
        .arg("build")
        .arg(&app)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid manifest"));
}

#[test]
fn test_missing_required_key_is_one_error_line() {
    let mut ctx = common::marina();
    ctx.write_manifest(MISSING_RUN);
    let app = ctx.app_arg().to_path_buf();

    let root = ctx.root.clone();
    let output = ctx
        .cmd
        .args(["-q", "build", "-b"])
        .arg(&root)
        .arg(&app)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.lines().count(), 1, "stderr: {}", stderr);
    assert!(stderr.starts_with("Error: invalid manifest: missing required key 'run.base_image'"));
    // nothing was created in the build root
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

#[test]
fn test_relative_cache_path_rejected() {
    let mut ctx = common::marina();
    ctx.write_manifest(VALID);
    let app = ctx.app_arg().to_path_buf();
    ctx.cmd
        .args(["build", "--cache", "vol:relative"])
        .arg(&app)
        .assert()
        .failure()
        .stderr(predicate::str::contains("absolute path"));
}

#[test]
fn test_bad_env_entry_rejected() {
    let mut ctx = common::marina();
    let app = ctx.app_arg().to_path_buf();
    ctx.cmd
        .args(["build", "-e", "NOEQUALS"])
        .arg(&app)
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_no_cache_conflicts_with_cache() {
    let mut ctx = common::marina();
    let app = ctx.app_arg().to_path_buf();
    ctx.cmd
        .args(["build", "--no-cache", "--cache", "vol"])
        .arg(&app)
        .assert()
        .failure();
}

#[test]
fn test_blank_tag_rejected_before_build() {
    let mut ctx = common::marina();
    ctx.write_manifest(VALID);
    let app = ctx.app_arg().to_path_buf();
    let root = ctx.root.clone();
    ctx.cmd
        .args(["-q", "build", "-t", "", "-b"])
        .arg(&root)
        .arg(&app)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("version tag must not be empty"));
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}
