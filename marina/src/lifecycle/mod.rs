//! Container lifecycle management
//!
//! Creates, runs and removes the containers of a build, and keeps track of
//! everything it created so teardown can release it. Short-lived utility
//! containers are removed by their phase; long-lived ones (the compile
//! container whose dist volume later phases mount) stay registered until
//! [`LifecycleManager::teardown`].

mod cleanup;

pub use cleanup::{CleanupReport, CleanupWarning};

use std::sync::Arc;

use marina_shared::errors::{MarinaError, MarinaResult};

use crate::engine::{ContainerEngine, ContainerId, ContainerSpec, ImageConfig};
use crate::options::{CacheSpec, CacheTarget};
use crate::stream::{LogStreamer, OutputSink};

/// Result of running one container to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRun {
    pub container: ContainerId,
    pub exit_code: i64,
}

impl PhaseRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct LifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    containers: Vec<ContainerId>,
    images: Vec<String>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            containers: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Containers still registered for teardown.
    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// Intermediate images still registered for teardown.
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Make sure the cache exists. Safe to call on every run.
    pub async fn create_cache(&self, cache: Option<&CacheSpec>) -> MarinaResult<()> {
        let Some(cache) = cache else {
            tracing::info!("no cache defined, skipping checks");
            return Ok(());
        };

        match &cache.target {
            CacheTarget::Volume(name) => {
                if self.engine.volume_exists(name).await? {
                    tracing::info!(volume = %name, "found cache volume");
                    return Ok(());
                }
                tracing::debug!(volume = %name, "creating cache volume");
                if let Err(e) = self.engine.create_volume(name).await {
                    // another run may have created it in the meantime
                    if self.engine.volume_exists(name).await? {
                        tracing::debug!(volume = %name, "cache volume created concurrently");
                        return Ok(());
                    }
                    return Err(e);
                }
                Ok(())
            }
            CacheTarget::HostPath(path) => {
                tokio::fs::create_dir_all(path).await.map_err(|e| {
                    MarinaError::Storage(format!(
                        "failed to create cache directory {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!(path = %path.display(), "using host cache directory");
                Ok(())
            }
        }
    }

    /// Return the image's config, pulling the image first if the engine lacks it.
    pub async fn ensure_image(&self, reference: &str) -> MarinaResult<ImageConfig> {
        if let Some(config) = self.engine.inspect_image(reference).await? {
            return Ok(config);
        }
        tracing::info!(image = %reference, "pulling image");
        self.engine.pull_image(reference).await?;
        self.engine.inspect_image(reference).await?.ok_or_else(|| {
            MarinaError::Engine(format!("image {} not found after pull", reference))
        })
    }

    /// Create a container and register it for teardown.
    pub async fn create(&mut self, spec: &ContainerSpec) -> MarinaResult<ContainerId> {
        let id = self.engine.create_container(spec).await?;
        tracing::info!(container_id = %id, image = %spec.image, "created container");
        self.containers.push(id.clone());
        Ok(id)
    }

    /// Attach, start, and wait for an already created container.
    ///
    /// Output is forwarded to `sink` while the container runs. A non-zero
    /// exit status is returned as a value, not an error.
    pub async fn run(&self, id: &ContainerId, sink: Box<dyn OutputSink>) -> MarinaResult<i64> {
        let streamer = LogStreamer::attach(Arc::clone(&self.engine), id, sink).await?;

        tracing::debug!(container_id = %id, "starting container");
        if let Err(e) = self.engine.start_container(id).await {
            Self::abort_streamer(streamer, id).await;
            return Err(e);
        }
        tracing::debug!(container_id = %id, "started container");

        let exit_code = match self.engine.wait_container(id).await {
            Ok(code) => code,
            Err(e) => {
                Self::abort_streamer(streamer, id).await;
                return Err(e);
            }
        };

        streamer.finish().await?;
        tracing::debug!(container_id = %id, exit_code, "container exited");
        Ok(exit_code)
    }

    /// Create a container from `spec` and run it to completion.
    ///
    /// The container stays registered for teardown, even if running it fails.
    pub async fn run_phase(
        &mut self,
        spec: &ContainerSpec,
        sink: Box<dyn OutputSink>,
    ) -> MarinaResult<PhaseRun> {
        let container = self.create(spec).await?;
        let exit_code = self.run(&container, sink).await?;
        Ok(PhaseRun {
            container,
            exit_code,
        })
    }

    /// Best-effort stop then remove. Never fails; problems land in the report.
    pub async fn remove_container(&mut self, id: &ContainerId) -> CleanupReport {
        self.containers.retain(|c| c != id);

        let mut report = CleanupReport::new();
        report.record(
            format!("stop container {}", id),
            self.engine.stop_container(id).await,
        );
        report.record(
            format!("remove container {}", id),
            self.engine.remove_container(id).await,
        );
        if report.is_clean() {
            tracing::debug!(container_id = %id, "removed container");
        }
        report
    }

    /// Register an intermediate image for removal at teardown.
    pub fn track_image(&mut self, reference: impl Into<String>) {
        self.images.push(reference.into());
    }

    /// Best-effort image removal. Never fails; problems land in the report.
    pub async fn remove_image(&mut self, reference: &str) -> CleanupReport {
        self.images.retain(|i| i != reference);

        let mut report = CleanupReport::new();
        report.record(
            format!("remove image {}", reference),
            self.engine.remove_image(reference).await,
        );
        report
    }

    /// Remove every registered container, then every registered image.
    ///
    /// Each removal is attempted independently. Calling this twice is safe:
    /// the second call has nothing left to remove.
    pub async fn teardown(&mut self) -> CleanupReport {
        let mut report = CleanupReport::new();

        // newest first, later containers mount volumes of earlier ones
        let containers: Vec<ContainerId> = self.containers.drain(..).rev().collect();
        for id in containers {
            report.merge(self.remove_container(&id).await);
        }

        let images: Vec<String> = self.images.drain(..).collect();
        for image in images {
            report.merge(self.remove_image(&image).await);
        }

        report
    }

    /// Forget registered resources without removing them (skip-cleanup mode).
    pub fn release(&mut self) -> (Vec<ContainerId>, Vec<String>) {
        (
            std::mem::take(&mut self.containers),
            std::mem::take(&mut self.images),
        )
    }

    async fn abort_streamer(streamer: LogStreamer, id: &ContainerId) {
        // the engine error is the one the caller reports
        if let Err(e) = streamer.abort().await {
            tracing::warn!(container_id = %id, "log streamer failed: {}", e);
        }
    }
}
