//! Build orchestration.
//!
//! [`BuildOrchestrator`] drives one build through its phases:
//!
//! 1. make sure the cache volume or directory exists
//! 2. run the build script in a compile container
//! 3. optionally stream the archive out through a utility container
//! 4. extract the archive in a runner container, commit it, and build the
//!    final image from a rendered descriptor
//! 5. tag the final image `name:version`
//!
//! Everything created along the way is removed at teardown, which runs
//! whether the build succeeded, failed, or hit an engine fault.

mod report;
mod state;
mod workspace;

pub use report::{BuildOutcome, BuildPhase, BuildReport, PhaseFailure};
pub use state::{BuildState, StateTracker};
pub use workspace::Workspace;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use marina_shared::constants::{
    cache as const_cache, container, envs, images as const_images, workdir,
};
use marina_shared::errors::{MarinaError, MarinaResult};

use crate::engine::{ContainerEngine, ContainerId, ContainerSpec, Mount};
use crate::images::{RunnerImageConfig, render};
use crate::lifecycle::{CleanupReport, LifecycleManager};
use crate::manifest::BuildDescriptor;
use crate::options::{BuildContext, BuildOptions};
use crate::script::BuildScript;
use crate::stream::{OutputSink, SinkFactory};
use crate::stream::sink::FileSink;

const RESERVED_ENV: [&str; 6] = [
    envs::BUILD_ROOT,
    envs::BUILD_CONTEXT,
    envs::BUILD_ARCHIVE_PATH,
    envs::BUILD_NAME,
    envs::BUILD_VERSION,
    envs::BUILD_CACHE,
];

pub struct BuildOrchestrator {
    descriptor: BuildDescriptor,
    context: BuildContext,
    options: BuildOptions,
    output: SinkFactory,
    lifecycle: LifecycleManager,
    state: StateTracker,
    workspace: Option<Workspace>,
    source_container: Option<ContainerId>,
    runner_image: Option<String>,
    image: Option<String>,
    archive: Option<PathBuf>,
    /// Failures of per-phase cleanup, folded into the teardown report.
    cleanup: CleanupReport,
}

impl BuildOrchestrator {
    /// `output` creates the sink for each build container's output.
    ///
    /// Fails with [`MarinaError::Config`] if the tag override is blank.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        descriptor: BuildDescriptor,
        context: BuildContext,
        options: BuildOptions,
        output: SinkFactory,
    ) -> MarinaResult<Self> {
        let descriptor = match &options.tag {
            Some(tag) => descriptor.with_version(tag)?,
            None => descriptor,
        };
        Ok(Self {
            descriptor,
            context,
            options,
            output,
            lifecycle: LifecycleManager::new(engine),
            state: StateTracker::new(),
            workspace: None,
            source_container: None,
            runner_image: None,
            image: None,
            archive: None,
            cleanup: CleanupReport::new(),
        })
    }

    pub fn descriptor(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> BuildState {
        self.state.state()
    }

    /// Working directory of the current run, once created.
    pub fn working_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    /// Run the build, then tear down.
    ///
    /// A build container exiting non-zero is reported through
    /// [`BuildReport::outcome`]. Engine, storage and streaming faults are
    /// returned as errors naming the phase that hit them. Teardown happens
    /// in both cases.
    pub async fn run(&mut self) -> MarinaResult<BuildReport> {
        if self.state.state() != BuildState::Init {
            return Err(MarinaError::Internal(format!(
                "build {} already ran (state {})",
                self.descriptor.image_ref(),
                self.state.state()
            )));
        }
        tracing::info!(
            name = %self.descriptor.name(),
            version = %self.descriptor.version(),
            "starting build"
        );

        let result = self.execute().await;
        if !matches!(result, Ok(None)) {
            self.state.fail();
        }

        let cleanup = self.teardown().await;
        cleanup.log();

        let failure = result?;
        let outcome = match failure {
            Some(failure) => {
                tracing::error!("{}", failure);
                BuildOutcome::Failed(failure)
            }
            None => BuildOutcome::Succeeded,
        };

        Ok(BuildReport {
            outcome,
            state: self.state.state(),
            image: self.image.clone(),
            archive: self.archive.clone(),
            working_dir: if self.options.skip_cleanup {
                self.working_dir().map(Path::to_path_buf)
            } else {
                None
            },
            cleanup,
        })
    }

    /// Remove containers, intermediate images and the working directory.
    ///
    /// With skip-cleanup everything is left in place and only logged.
    /// Safe to call more than once.
    pub async fn teardown(&mut self) -> CleanupReport {
        if self.options.skip_cleanup {
            let (containers, images) = self.lifecycle.release();
            for id in &containers {
                tracing::info!(container_id = %id, "leaving container behind");
            }
            for image in &images {
                tracing::info!(image = %image, "leaving intermediate image behind");
            }
            if let Some(path) = self.working_dir() {
                tracing::info!(path = %path.display(), "leaving working directory behind");
            }
            return std::mem::take(&mut self.cleanup);
        }

        let mut report = std::mem::take(&mut self.cleanup);
        report.merge(self.lifecycle.teardown().await);
        if let Some(workspace) = self.workspace.as_mut() {
            let path = workspace.path().display().to_string();
            report.record(format!("remove working directory {}", path), workspace.remove());
        }
        self.source_container = None;
        report
    }

    /// Returns the phase failure, if a build container exited non-zero.
    async fn execute(&mut self) -> MarinaResult<Option<PhaseFailure>> {
        self.create_cache()
            .await
            .map_err(|e| e.with_context(BuildPhase::Cache))?;
        self.state.transition_to(BuildState::CacheReady)?;

        if let Some(failure) = self
            .build_source()
            .await
            .map_err(|e| e.with_context(BuildPhase::Source))?
        {
            return Ok(Some(failure));
        }
        self.state.transition_to(BuildState::SourceBuilt)?;

        if let Some(path) = self.options.archive_file.clone() {
            if let Some(failure) = self
                .build_archive(&path)
                .await
                .map_err(|e| e.with_context(BuildPhase::Archive))?
            {
                return Ok(Some(failure));
            }
            self.state.transition_to(BuildState::Archived)?;
        }

        if self.options.archive_only {
            tracing::info!("archive only, skipping runner image");
            self.state.transition_to(BuildState::Done)?;
            return Ok(None);
        }

        if let Some(failure) = self
            .build_runner()
            .await
            .map_err(|e| e.with_context(BuildPhase::Runner))?
        {
            return Ok(Some(failure));
        }
        self.state.transition_to(BuildState::RunnerReady)?;

        self.tag_runner()
            .await
            .map_err(|e| e.with_context(BuildPhase::Tag))?;
        self.state.transition_to(BuildState::Tagged)?;
        self.state.transition_to(BuildState::Done)?;
        Ok(None)
    }

    async fn create_cache(&mut self) -> MarinaResult<()> {
        self.lifecycle.create_cache(self.options.cache.as_ref()).await
    }

    async fn build_source(&mut self) -> MarinaResult<Option<PhaseFailure>> {
        tracing::info!("building source");

        let workspace = Workspace::create(&self.context.root_path)?;
        let workspace_path = workspace.path().to_path_buf();
        self.workspace = Some(workspace);

        let wipe_cache = self.options.cache.as_ref().is_some_and(|c| c.wipe);
        let script = BuildScript::for_compile(self.descriptor.compiler(), wipe_cache);
        if let Some(workspace) = &self.workspace {
            workspace.prepare(&self.context, &script)?;
        }

        let base_image = self.descriptor.compiler().base_image().to_string();
        self.lifecycle.ensure_image(&base_image).await?;

        let spec = self.source_spec(&base_image, &workspace_path);
        let run = self.lifecycle.run_phase(&spec, (self.output)()).await?;
        tracing::info!(container_id = %run.container, "created source container");
        self.source_container = Some(run.container.clone());

        if !run.succeeded() {
            tracing::error!(status = run.exit_code, "source did not build successfully");
            return Ok(Some(PhaseFailure {
                phase: BuildPhase::Source,
                exit_code: run.exit_code,
            }));
        }
        tracing::info!("source compiled successfully");
        Ok(None)
    }

    fn source_spec(&self, image: &str, workspace: &Path) -> ContainerSpec {
        let cache_path = self
            .options
            .cache
            .as_ref()
            .map(|c| c.mount_path.clone())
            .unwrap_or_else(|| const_cache::DEFAULT_MOUNT_PATH.to_string());

        let mut spec = ContainerSpec::new(image, ["sh", workdir::BUILD_SCRIPT])
            .with_entrypoint(Vec::new())
            .with_working_dir(container::SRC_VOLUME)
            .with_user(container::BUILD_USER)
            .with_env(envs::BUILD_ROOT, container::SRC_VOLUME)
            .with_env(
                envs::BUILD_CONTEXT,
                format!("{}/{}", container::SRC_VOLUME, container::CONTEXT_DIR),
            )
            .with_env(envs::BUILD_ARCHIVE_PATH, self.archive_path())
            .with_env(envs::BUILD_NAME, self.descriptor.name())
            .with_env(envs::BUILD_VERSION, self.descriptor.version())
            .with_env(envs::BUILD_CACHE, cache_path)
            .with_mount(Mount::bind(workspace, container::SRC_VOLUME, false))
            .with_volume(container::DIST_VOLUME);

        for (key, value) in &self.options.env {
            if RESERVED_ENV.contains(&key.as_str()) {
                tracing::warn!(key = %key, "ignoring user override of a reserved build variable");
                continue;
            }
            spec = spec.with_env(key.clone(), value.clone());
        }

        if let Some(cache) = &self.options.cache {
            spec = spec.with_mount(cache.mount());
        }
        spec
    }

    async fn build_archive(&mut self, path: &Path) -> MarinaResult<Option<PhaseFailure>> {
        tracing::info!(path = %path.display(), "archiving build products");
        let source = self.require_source()?;

        self.lifecycle
            .ensure_image(const_images::UTILITY_IMAGE)
            .await?;

        let archive_path = self.archive_path();
        let spec = ContainerSpec::new(const_images::UTILITY_IMAGE, ["cat", archive_path.as_str()])
            .with_user(container::BUILD_USER)
            .with_volumes_from(source);

        let sink = FileSink::create(path).await.map_err(|e| {
            MarinaError::Storage(format!("failed to create {}: {}", path.display(), e))
        })?;
        let result = self.run_short_lived(&spec, Box::new(sink)).await;

        match result {
            Ok(0) => {
                tracing::info!(path = %path.display(), "archive written to file");
                self.archive = Some(path.to_path_buf());
                Ok(None)
            }
            Ok(exit_code) => {
                tracing::error!(status = exit_code, "failed to write archive to file");
                self.discard_archive(path);
                Ok(Some(PhaseFailure {
                    phase: BuildPhase::Archive,
                    exit_code,
                }))
            }
            Err(e) => {
                self.discard_archive(path);
                Err(e)
            }
        }
    }

    async fn build_runner(&mut self) -> MarinaResult<Option<PhaseFailure>> {
        tracing::info!("building runner");
        let source = self.require_source()?;
        let runner = self.descriptor.runner().clone();
        let base_config = self.lifecycle.ensure_image(runner.base_image()).await?;

        let archive_path = self.archive_path();
        let extract = ContainerSpec::new(
            runner.base_image(),
            ["tar", "xzf", archive_path.as_str(), "-C", "/"],
        )
        .with_entrypoint(Vec::new())
        .with_user(container::BUILD_USER)
        .with_volumes_from(source);

        let run = self.lifecycle.run_phase(&extract, (self.output)()).await?;
        if !run.succeeded() {
            tracing::error!(status = run.exit_code, "runner did not build successfully");
            return Ok(Some(PhaseFailure {
                phase: BuildPhase::Runner,
                exit_code: run.exit_code,
            }));
        }

        let name = self.descriptor.name().to_string();
        let stage_tag = format!("{}-stage", self.descriptor.version());
        let stage_ref = format!("{}:{}", name, stage_tag);
        self.lifecycle
            .engine()
            .commit_container(&run.container, &name, &stage_tag)
            .await?;
        self.lifecycle.track_image(stage_ref.clone());
        tracing::debug!(image = %stage_ref, "committed runner container");

        let config = RunnerImageConfig::merge(&base_config, runner.config());
        let descriptor = render(&stage_ref, &config);
        tracing::debug!("runner image descriptor:\n{}", descriptor);

        let runner_ref = format!("{}:{}-runner", name, self.descriptor.version());
        self.lifecycle
            .engine()
            .build_image(&descriptor, &runner_ref)
            .await?;
        self.lifecycle.track_image(runner_ref.clone());
        self.runner_image = Some(runner_ref);

        tracing::info!("runner compiled successfully");
        Ok(None)
    }

    async fn tag_runner(&mut self) -> MarinaResult<()> {
        let runner_image = self.runner_image.clone().ok_or_else(|| {
            MarinaError::Internal("runner image was not built".to_string())
        })?;
        self.lifecycle
            .engine()
            .tag_image(&runner_image, self.descriptor.name(), self.descriptor.version())
            .await?;

        let image = self.descriptor.image_ref();
        tracing::info!(image = %image, "created image");
        self.image = Some(image);
        Ok(())
    }

    /// Create, run and immediately remove a utility container.
    async fn run_short_lived(
        &mut self,
        spec: &ContainerSpec,
        sink: Box<dyn OutputSink>,
    ) -> MarinaResult<i64> {
        let id = self.lifecycle.create(spec).await?;
        let result = self.lifecycle.run(&id, sink).await;
        let report = self.lifecycle.remove_container(&id).await;
        self.cleanup.merge(report);
        result
    }

    fn discard_archive(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), "failed to remove partial archive: {}", e);
        }
    }

    fn require_source(&self) -> MarinaResult<ContainerId> {
        self.source_container
            .clone()
            .ok_or_else(|| MarinaError::Internal("source container was not built".to_string()))
    }

    /// Archive location inside the dist volume.
    fn archive_path(&self) -> String {
        format!("{}/{}", container::DIST_VOLUME, self.descriptor.archive_name())
    }
}
