#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use tempfile::TempDir;

/// Scratch application directory plus a build root, removed on drop.
pub struct TestContext {
    pub cmd: Command,
    pub app: PathBuf,
    pub root: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_marina"));
        cmd.timeout(Duration::from_secs(30));
        cmd.env_remove("MARINA_BUILD_DIR");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn write_manifest(&self, manifest: &str) {
        std::fs::write(self.app.join("meta.yml"), manifest).expect("Failed to write manifest");
    }

    pub fn app_arg(&self) -> &Path {
        &self.app
    }
}

pub fn marina() -> TestContext {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let app = dir.path().join("app");
    let root = dir.path().join("build");
    std::fs::create_dir_all(&app).expect("Failed to create app dir");
    std::fs::create_dir_all(&root).expect("Failed to create build root");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_marina"));
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("MARINA_BUILD_DIR");
    cmd.env_remove("RUST_LOG");

    TestContext {
        cmd,
        app,
        root,
        _dir: dir,
    }
}
