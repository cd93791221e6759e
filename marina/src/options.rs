//! Run-level configuration for a build.

use std::path::{Path, PathBuf};

use marina_shared::constants::cache as const_cache;
use marina_shared::constants::workdir as const_workdir;
use marina_shared::errors::{MarinaError, MarinaResult};
use serde::{Deserialize, Serialize};

use crate::engine::Mount;

/// Where the build cache lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTarget {
    /// Named engine volume, created on first use
    Volume(String),
    /// Host directory bind-mounted into the compile container
    HostPath(PathBuf),
}

/// Persistent build cache mounted into the compile container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub target: CacheTarget,

    /// Absolute mount path inside the container.
    #[serde(default = "default_cache_mount")]
    pub mount_path: String,

    /// Delete the cache contents before building.
    #[serde(default)]
    pub wipe: bool,
}

fn default_cache_mount() -> String {
    const_cache::DEFAULT_MOUNT_PATH.to_string()
}

impl CacheSpec {
    /// Default cache for an application: volume `<app>__buildcache` at `/tmp/cache`.
    pub fn for_app(app_name: &str) -> Self {
        Self {
            target: CacheTarget::Volume(format!("{}{}", app_name, const_cache::VOLUME_SUFFIX)),
            mount_path: default_cache_mount(),
            wipe: false,
        }
    }

    /// Parse `[volume_or_hostpath][:path]`.
    ///
    /// - `name` → volume `name` at the default mount path
    /// - `name:/p` → volume `name` at `/p`
    /// - `/abs` → host directory `/abs` at the default mount path
    /// - `/abs:/p` → host directory `/abs` at `/p`
    /// - `:/p` → the application's default volume at `/p`
    pub fn parse(spec: &str, app_name: &str) -> MarinaResult<Self> {
        let mut cache = Self::for_app(app_name);
        let (source, mount) = match spec.split_once(':') {
            Some((source, mount)) => (source, Some(mount)),
            None => (spec, None),
        };

        if !source.is_empty() {
            cache.target = if Path::new(source).is_absolute() {
                CacheTarget::HostPath(PathBuf::from(source))
            } else {
                CacheTarget::Volume(source.to_string())
            };
        }

        if let Some(mount) = mount {
            if !Path::new(mount).is_absolute() {
                return Err(MarinaError::Config(format!(
                    "the cache path must be an absolute path, got '{}'",
                    mount
                )));
            }
            cache.mount_path = mount.to_string();
        }

        Ok(cache)
    }

    pub fn with_wipe(mut self, wipe: bool) -> Self {
        self.wipe = wipe;
        self
    }

    /// Mount instruction for the compile container.
    pub fn mount(&self) -> Mount {
        match &self.target {
            CacheTarget::Volume(name) => Mount::volume(name.clone(), self.mount_path.clone()),
            CacheTarget::HostPath(path) => {
                Mount::bind(path.clone(), self.mount_path.clone(), false)
            }
        }
    }
}

/// Filesystem inputs of one build run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Directory under which the per-run working directory is created.
    /// Must be visible to the container engine (it is bind-mounted).
    pub root_path: PathBuf,

    /// Application directory copied into the working directory.
    pub context_path: PathBuf,

    /// SSH private key installed in the compile container.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(root_path: impl Into<PathBuf>, context_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            context_path: context_path.into(),
            identity_file: None,
        }
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// `<app>/meta.yml`
    pub fn manifest_path(&self) -> PathBuf {
        self.context_path.join(const_workdir::MANIFEST)
    }
}

/// Everything about a run that does not come from the manifest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Extra `KEY=VALUE` variables for the compile container.
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Write the compiled archive to this host file.
    #[serde(default)]
    pub archive_file: Option<PathBuf>,

    /// Stop after the archive, skip the runner image.
    #[serde(default)]
    pub archive_only: bool,

    /// Replaces the manifest's version tag.
    #[serde(default)]
    pub tag: Option<String>,

    /// `None` disables the build cache.
    #[serde(default)]
    pub cache: Option<CacheSpec>,

    /// Leave the working directory, containers and intermediate images behind.
    #[serde(default)]
    pub skip_cleanup: bool,
}

/// Parse a `KEY=VALUE` environment entry.
pub fn parse_env_entry(entry: &str) -> MarinaResult<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(MarinaError::Config(format!(
            "environment entries must look like KEY=VALUE, got '{}'",
            entry
        ))),
    }
}

/// Look for `id_rsa` or `id_dsa` in the current directory, then in `~/.ssh`.
pub fn find_default_identity_file() -> Option<PathBuf> {
    let mut search_paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        search_paths.push(cwd);
    }
    if let Some(home) = dirs::home_dir() {
        search_paths.push(home.join(".ssh"));
    }
    search_paths
        .iter()
        .find_map(|dir| find_identity_file_in(dir))
}

/// Look for `id_rsa` or `id_dsa` in `dir`.
pub fn find_identity_file_in(dir: &Path) -> Option<PathBuf> {
    ["id_rsa", "id_dsa"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
