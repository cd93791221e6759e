//! Container engine seam.
//!
//! The builder never talks to a container runtime directly: everything goes
//! through [`ContainerEngine`]. [`DockerEngine`] implements it on top of the
//! Docker API; tests use an in-memory fake.

mod docker;

pub use docker::DockerEngine;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use marina_shared::errors::MarinaResult;

/// Engine-assigned identifier of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // full ids are 64 hex chars; 12 is what `docker ps` shows
        let short = self.0.get(..12).unwrap_or(&self.0);
        f.write_str(short)
    }
}

/// Where a mount's data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Named engine volume
    Volume(String),
    /// Host directory (bind mount)
    HostPath(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: MountSource,
    /// Absolute path inside the container
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name.into()),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn bind(path: impl Into<PathBuf>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: MountSource::HostPath(path.into()),
            target: target.into(),
            read_only,
        }
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// `Some(vec![])` clears the image's entrypoint.
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub env: IndexMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub mounts: Vec<Mount>,
    /// Anonymous volumes declared by the container (removed with it).
    pub volumes: Vec<String>,
    /// Containers whose volumes are mounted at the same paths.
    pub volumes_from: Vec<ContainerId>,
}

impl ContainerSpec {
    pub fn new<I, S>(image: impl Into<String>, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_volume(mut self, path: impl Into<String>) -> Self {
        self.volumes.push(path.into());
        self
    }

    pub fn with_volumes_from(mut self, container: ContainerId) -> Self {
        self.volumes_from.push(container);
        self
    }
}

/// Runtime configuration stored in an image, as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub author: Option<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub volumes: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
}

/// A piece of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl LogChunk {
    pub fn bytes(&self) -> &[u8] {
        match self {
            LogChunk::Stdout(b) | LogChunk::Stderr(b) => b,
        }
    }
}

/// Combined stdout/stderr of an attached container. Ends when the container exits.
pub type LogStream = BoxStream<'static, MarinaResult<LogChunk>>;

/// Operations the builder needs from a container engine.
///
/// Every method maps to one remote API call (or a short sequence of them).
/// Errors are [`marina_shared::MarinaError::Engine`] unless stated otherwise.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) a container.
    async fn create_container(&self, spec: &ContainerSpec) -> MarinaResult<ContainerId>;

    async fn start_container(&self, id: &ContainerId) -> MarinaResult<()>;

    /// Block until the container exits and return its exit status.
    async fn wait_container(&self, id: &ContainerId) -> MarinaResult<i64>;

    async fn stop_container(&self, id: &ContainerId) -> MarinaResult<()>;

    /// Remove a container together with its anonymous volumes.
    async fn remove_container(&self, id: &ContainerId) -> MarinaResult<()>;

    /// Open the combined output stream. Returns once the stream is established.
    async fn attach_container(&self, id: &ContainerId) -> MarinaResult<LogStream>;

    async fn volume_exists(&self, name: &str) -> MarinaResult<bool>;

    /// Create a named volume. Creating an existing volume is not an error.
    async fn create_volume(&self, name: &str) -> MarinaResult<()>;

    /// Config of a local image, `None` if the engine does not have it.
    async fn inspect_image(&self, reference: &str) -> MarinaResult<Option<ImageConfig>>;

    async fn pull_image(&self, reference: &str) -> MarinaResult<()>;

    async fn remove_image(&self, reference: &str) -> MarinaResult<()>;

    /// Commit a container's filesystem as `repository:tag`.
    async fn commit_container(&self, id: &ContainerId, repository: &str, tag: &str)
    -> MarinaResult<()>;

    /// Build an image from descriptor text and tag it `reference`.
    async fn build_image(&self, descriptor: &str, reference: &str) -> MarinaResult<()>;

    /// Add `repository:tag` to an existing image.
    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> MarinaResult<()>;
}
