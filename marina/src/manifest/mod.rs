//! Build manifest (`meta.yml`) parsing.
//!
//! ```yaml
//! name: myapp
//! tag: "1.2.0"            # optional, defaults to a UTC timestamp
//! compile:
//!   base_image: rust:1.88
//!   commands:             # optional
//!     - cargo build --release
//!   files:
//!     - target/release/myapp
//! run:
//!   base_image: debian:bookworm-slim
//!   config:               # optional, see ConfigOverrides
//!     cmd: ["/target/release/myapp"]
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use marina_shared::constants::VERSION_FORMAT;
use marina_shared::errors::{MarinaError, MarinaResult};
use serde::Deserialize;

use crate::images::ConfigOverrides;

/// Compile phase: what runs inside the build container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSpec {
    base_image: String,
    commands: Vec<String>,
    files: Vec<String>,
}

impl CompileSpec {
    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    /// Shell commands, in the order they run.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Archive patterns, relative to the application directory.
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// Run phase: the base image of the final artifact and its config overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    base_image: String,
    config: ConfigOverrides,
}

impl RunSpec {
    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn config(&self) -> &ConfigOverrides {
        &self.config
    }
}

/// Immutable description of one application build.
///
/// Invariant: `name`, the compile base image and the run base image are
/// non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildDescriptor {
    name: String,
    version: String,
    compiler: CompileSpec,
    runner: RunSpec,
}

impl BuildDescriptor {
    /// Parse a manifest, stamping the current UTC time as version if `tag` is absent.
    pub fn parse(raw: &str) -> MarinaResult<Self> {
        let manifest = RawManifest::from_yaml(raw)?;
        let now = if manifest.tag.is_none() {
            Some(Utc::now())
        } else {
            None
        };
        manifest.into_descriptor(now)
    }

    /// Parse a manifest using `now` for the default version tag.
    pub fn parse_at(raw: &str, now: DateTime<Utc>) -> MarinaResult<Self> {
        RawManifest::from_yaml(raw)?.into_descriptor(Some(now))
    }

    /// Read and parse `path`.
    pub fn from_file(path: &Path) -> MarinaResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MarinaError::Manifest(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Copy of this descriptor with a different version tag.
    pub fn with_version(&self, version: &str) -> MarinaResult<Self> {
        Ok(Self {
            version: validate_version(version)?,
            ..self.clone()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn compiler(&self) -> &CompileSpec {
        &self.compiler
    }

    pub fn runner(&self) -> &RunSpec {
        &self.runner
    }

    /// `name:version` reference of the final image.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// File name of the compiled archive, `name-version.tar.gz`.
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tar.gz", self.name, self.version)
    }
}

/// Check a version tag given outside the manifest, e.g. on the command line.
pub fn validate_version(version: &str) -> MarinaResult<String> {
    if version.trim().is_empty() {
        return Err(MarinaError::Config(
            "version tag must not be empty".to_string(),
        ));
    }
    Ok(version.to_string())
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    tag: Option<String>,
    compile: Option<RawCompile>,
    run: Option<RawRun>,
}

#[derive(Debug, Deserialize)]
struct RawCompile {
    base_image: Option<String>,
    #[serde(default)]
    commands: Vec<String>,
    files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    base_image: Option<String>,
    #[serde(default)]
    config: ConfigOverrides,
}

impl RawManifest {
    fn from_yaml(raw: &str) -> MarinaResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| MarinaError::Manifest(e.to_string()))
    }

    fn into_descriptor(self, now: Option<DateTime<Utc>>) -> MarinaResult<BuildDescriptor> {
        let name = required(self.name, "name")?;
        let compile = self
            .compile
            .ok_or_else(|| missing("compile.base_image"))?;
        let run = self.run.ok_or_else(|| missing("run.base_image"))?;

        let compiler = CompileSpec {
            base_image: required(compile.base_image, "compile.base_image")?,
            commands: compile.commands,
            files: compile.files.ok_or_else(|| missing("compile.files"))?,
        };
        let runner = RunSpec {
            base_image: required(run.base_image, "run.base_image")?,
            config: run.config,
        };

        let version = match self.tag {
            Some(tag) if !tag.trim().is_empty() => tag,
            _ => now
                .unwrap_or_else(Utc::now)
                .format(VERSION_FORMAT)
                .to_string(),
        };

        Ok(BuildDescriptor {
            name,
            version,
            compiler,
            runner,
        })
    }
}

fn missing(key: &str) -> MarinaError {
    MarinaError::Manifest(format!("missing required key '{}'", key))
}

fn required(value: Option<String>, key: &str) -> MarinaResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(MarinaError::Manifest(format!("key '{}' must not be empty", key))),
        None => Err(missing(key)),
    }
}

/// Accept `tag: 1.2` as well as `tag: "1.2"`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a scalar tag, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FULL: &str = r#"
name: myapp
tag: "1.0"
compile:
  base_image: builder:latest
  commands:
    - make
    - make install
  files:
    - bin/myapp
    - etc
run:
  base_image: runner:latest
  config:
    cmd: ["/bin/myapp"]
    env:
      MODE: prod
"#;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    #[test]
    fn test_parse_full_manifest() {
        let d = BuildDescriptor::parse(FULL).unwrap();
        assert_eq!(d.name(), "myapp");
        assert_eq!(d.version(), "1.0");
        assert_eq!(d.compiler().base_image(), "builder:latest");
        assert_eq!(d.compiler().commands(), ["make", "make install"]);
        assert_eq!(d.compiler().files(), ["bin/myapp", "etc"]);
        assert_eq!(d.runner().base_image(), "runner:latest");
        assert_eq!(d.runner().config().env.get("MODE").unwrap(), "prod");
        assert_eq!(d.image_ref(), "myapp:1.0");
        assert_eq!(d.archive_name(), "myapp-1.0.tar.gz");
    }

    #[test]
    fn test_missing_tag_uses_timestamp() {
        let raw = "name: a\ncompile: {base_image: b, files: []}\nrun: {base_image: c}\n";
        let d = BuildDescriptor::parse_at(raw, fixed_now()).unwrap();
        assert_eq!(d.version(), "20240309T070501");
        assert!(d.compiler().commands().is_empty());
    }

    #[test]
    fn test_numeric_tag() {
        let raw = "name: a\ntag: 2\ncompile: {base_image: b, files: []}\nrun: {base_image: c}\n";
        let d = BuildDescriptor::parse(raw).unwrap();
        assert_eq!(d.version(), "2");
    }

    #[test]
    fn test_missing_required_keys() {
        let cases = [
            ("compile: {base_image: b, files: []}\nrun: {base_image: c}\n", "name"),
            ("name: a\ncompile: {files: []}\nrun: {base_image: c}\n", "compile.base_image"),
            ("name: a\ncompile: {base_image: b}\nrun: {base_image: c}\n", "compile.files"),
            ("name: a\ncompile: {base_image: b, files: []}\nrun: {}\n", "run.base_image"),
            ("name: a\ncompile: {base_image: b, files: []}\n", "run.base_image"),
            ("name: a\nrun: {base_image: c}\n", "compile.base_image"),
        ];

        for (raw, key) in cases {
            let err = BuildDescriptor::parse(raw).unwrap_err();
            match err {
                MarinaError::Manifest(msg) => assert!(
                    msg.contains(key),
                    "expected '{}' in error, got '{}'",
                    key,
                    msg
                ),
                other => panic!("expected manifest error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        let raw = "name: ''\ncompile: {base_image: b, files: []}\nrun: {base_image: c}\n";
        assert!(matches!(
            BuildDescriptor::parse(raw),
            Err(MarinaError::Manifest(_))
        ));
    }

    #[test]
    fn test_not_yaml_mapping() {
        assert!(matches!(
            BuildDescriptor::parse("- just\n- a list\n"),
            Err(MarinaError::Manifest(_))
        ));
    }

    #[test]
    fn test_with_version_keeps_everything_else() {
        let d = BuildDescriptor::parse(FULL).unwrap();
        let v2 = d.with_version("2.0").unwrap();
        assert_eq!(v2.version(), "2.0");
        assert_eq!(v2.name(), d.name());
        assert_eq!(v2.compiler(), d.compiler());
        assert_eq!(d.version(), "1.0");
    }

    #[test]
    fn test_with_version_rejects_blank_tag() {
        let d = BuildDescriptor::parse(FULL).unwrap();
        for tag in ["", "  "] {
            assert!(matches!(d.with_version(tag), Err(MarinaError::Config(_))));
        }
        assert!(validate_version("2.0").is_ok());
    }
}
