//! Test helpers for marina.
//!
//! [`FakeEngine`] is an in-memory [`ContainerEngine`] that records every
//! call, so tests can assert on ordering and on what was left behind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use marina::engine::LogStream;
use marina::{
    ContainerEngine, ContainerId, ContainerSpec, ImageConfig, LogChunk, OutputSink, SinkFactory,
};
use marina_shared::errors::{MarinaError, MarinaResult};
use parking_lot::Mutex;

/// Output a fake container produces when attached.
#[derive(Debug, Clone)]
pub enum FakeOutput {
    Chunk(LogChunk),
    /// The engine stream breaks with this message.
    Error(String),
    /// The stream stays open and produces nothing more.
    Hang,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    next_id: u64,
    containers: HashMap<String, ContainerSpec>,
    removed: HashSet<String>,
    attached: HashSet<String>,
    volumes: HashSet<String>,
    images: HashMap<String, ImageConfig>,
    descriptors: Vec<(String, String)>,
    exit_codes: HashMap<String, i64>,
    outputs: HashMap<String, Vec<FakeOutput>>,
    failures: HashSet<String>,
    attach_delay: Option<Duration>,
}

impl State {
    fn check(&self, operation: &str) -> MarinaResult<()> {
        if self.failures.contains(operation) {
            return Err(MarinaError::Engine(format!("injected failure in {}", operation)));
        }
        Ok(())
    }

    fn image_of(&self, id: &ContainerId) -> MarinaResult<String> {
        self.containers
            .get(id.as_str())
            .map(|spec| spec.image.clone())
            .ok_or_else(|| MarinaError::Engine(format!("no such container: {}", id.as_str())))
    }
}

/// In-memory container engine.
///
/// Images missing locally are "pulled" with an empty config. Containers
/// exit 0 and print nothing unless configured per image.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Make `reference` available locally with `config`.
    pub fn with_image(self, reference: &str, config: ImageConfig) -> Self {
        self.state.lock().images.insert(reference.to_string(), config);
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state.lock().volumes.insert(name.to_string());
        self
    }

    /// Containers created from `image` exit with `code`.
    pub fn with_exit_code(self, image: &str, code: i64) -> Self {
        self.state.lock().exit_codes.insert(image.to_string(), code);
        self
    }

    /// Containers created from `image` emit `output` once attached.
    pub fn with_output(self, image: &str, output: Vec<FakeOutput>) -> Self {
        self.state.lock().outputs.insert(image.to_string(), output);
        self
    }

    /// Delay every attach by `delay` before the stream opens.
    pub fn with_attach_delay(self, delay: Duration) -> Self {
        self.state.lock().attach_delay = Some(delay);
        self
    }

    /// Make the trait method named `operation` fail, e.g. `"build_image"`.
    pub fn fail_on(self, operation: &str) -> Self {
        self.state.lock().failures.insert(operation.to_string());
        self
    }

    /// Every call so far, e.g. `create:rust:1.88`, `start:fake-1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Position of the first call equal to `call`.
    pub fn call_index(&self, call: &str) -> Option<usize> {
        self.state.lock().calls.iter().position(|c| c == call)
    }

    /// Calls starting with `prefix`.
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Specs of every container ever created, in creation order.
    pub fn created(&self) -> Vec<(ContainerId, ContainerSpec)> {
        let state = self.state.lock();
        let mut created: Vec<_> = state
            .containers
            .iter()
            .map(|(id, spec)| (ContainerId::new(id.clone()), spec.clone()))
            .collect();
        created.sort_by_key(|(id, _)| container_seq(id.as_str()));
        created
    }

    /// Containers created and not removed.
    pub fn live_containers(&self) -> Vec<ContainerId> {
        let state = self.state.lock();
        let mut live: Vec<_> = state
            .containers
            .keys()
            .filter(|id| !state.removed.contains(*id))
            .map(|id| ContainerId::new(id.clone()))
            .collect();
        live.sort_by_key(|id| container_seq(id.as_str()));
        live
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().images.contains_key(reference)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().volumes.contains(name)
    }

    /// `(reference, descriptor text)` of every image build.
    pub fn descriptors(&self) -> Vec<(String, String)> {
        self.state.lock().descriptors.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

fn container_seq(id: &str) -> u64 {
    id.trim_start_matches("fake-").parse().unwrap_or(u64::MAX)
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> MarinaResult<ContainerId> {
        let mut state = self.state.lock();
        state.calls.push(format!("create:{}", spec.image));
        state.check("create_container")?;
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(id.clone(), spec.clone());
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("start:{}", id.as_str()));
        state.check("start_container")?;
        state.image_of(id)?;
        if !state.attached.contains(id.as_str()) {
            return Err(MarinaError::Engine(format!(
                "container {} started before anyone attached",
                id.as_str()
            )));
        }
        Ok(())
    }

    async fn wait_container(&self, id: &ContainerId) -> MarinaResult<i64> {
        let mut state = self.state.lock();
        state.calls.push(format!("wait:{}", id.as_str()));
        state.check("wait_container")?;
        let image = state.image_of(id)?;
        Ok(state.exit_codes.get(&image).copied().unwrap_or(0))
    }

    async fn stop_container(&self, id: &ContainerId) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop:{}", id.as_str()));
        state.check("stop_container")
    }

    async fn remove_container(&self, id: &ContainerId) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove:{}", id.as_str()));
        state.check("remove_container")?;
        state.image_of(id)?;
        state.removed.insert(id.as_str().to_string());
        Ok(())
    }

    async fn attach_container(&self, id: &ContainerId) -> MarinaResult<LogStream> {
        let delay = {
            let state = self.state.lock();
            state.check("attach_container")?;
            state.attach_delay
        };
        self.record(format!("attach:{}", id.as_str()));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let image = state.image_of(id)?;
        let output = state.outputs.get(&image).cloned().unwrap_or_default();
        state.attached.insert(id.as_str().to_string());
        state.calls.push(format!("attached:{}", id.as_str()));

        let hang = output.iter().any(|item| matches!(item, FakeOutput::Hang));
        let items: Vec<MarinaResult<LogChunk>> = output
            .into_iter()
            .map_while(|item| match item {
                FakeOutput::Chunk(chunk) => Some(Ok(chunk)),
                FakeOutput::Error(msg) => Some(Err(MarinaError::Engine(msg))),
                FakeOutput::Hang => None,
            })
            .collect();

        let stream = futures::stream::iter(items);
        if hang {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn volume_exists(&self, name: &str) -> MarinaResult<bool> {
        let mut state = self.state.lock();
        state.calls.push(format!("inspect_volume:{}", name));
        state.check("volume_exists")?;
        Ok(state.volumes.contains(name))
    }

    async fn create_volume(&self, name: &str) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("create_volume:{}", name));
        state.check("create_volume")?;
        state.volumes.insert(name.to_string());
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> MarinaResult<Option<ImageConfig>> {
        let mut state = self.state.lock();
        state.calls.push(format!("inspect_image:{}", reference));
        state.check("inspect_image")?;
        Ok(state.images.get(reference).cloned())
    }

    async fn pull_image(&self, reference: &str) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("pull:{}", reference));
        state.check("pull_image")?;
        state
            .images
            .entry(reference.to_string())
            .or_insert_with(ImageConfig::default);
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_image:{}", reference));
        state.check("remove_image")?;
        state
            .images
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| MarinaError::Engine(format!("no such image: {}", reference)))
    }

    async fn commit_container(
        &self,
        id: &ContainerId,
        repository: &str,
        tag: &str,
    ) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("commit:{}:{}:{}", id.as_str(), repository, tag));
        state.check("commit_container")?;
        state.image_of(id)?;
        state
            .images
            .insert(format!("{}:{}", repository, tag), ImageConfig::default());
        Ok(())
    }

    async fn build_image(&self, descriptor: &str, reference: &str) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("build:{}", reference));
        state.check("build_image")?;
        state
            .descriptors
            .push((reference.to_string(), descriptor.to_string()));
        state
            .images
            .insert(reference.to_string(), ImageConfig::default());
        Ok(())
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> MarinaResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("tag:{}:{}:{}", image, repository, tag));
        state.check("tag_image")?;
        let config = state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| MarinaError::Engine(format!("no such image: {}", image)))?;
        state.images.insert(format!("{}:{}", repository, tag), config);
        Ok(())
    }
}

/// Bytes captured from every sink a [`capture`] factory handed out.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

struct CaptureSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl OutputSink for CaptureSink {
    async fn write_chunk(&mut self, chunk: &LogChunk) -> std::io::Result<()> {
        self.bytes.lock().extend_from_slice(chunk.bytes());
        Ok(())
    }
}

/// Sink factory writing into one shared buffer.
pub fn capture() -> (SinkFactory, CapturedOutput) {
    let output = CapturedOutput::default();
    let bytes = Arc::clone(&output.bytes);
    let factory: SinkFactory = Arc::new(move || {
        Box::new(CaptureSink {
            bytes: Arc::clone(&bytes),
        }) as Box<dyn OutputSink>
    });
    (factory, output)
}

/// Sink whose writes always fail.
pub struct FailingSink;

#[async_trait]
impl OutputSink for FailingSink {
    async fn write_chunk(&mut self, _chunk: &LogChunk) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "sink closed",
        ))
    }
}

/// Application directory with a manifest, plus a build root.
pub struct AppFixture {
    _root: tempfile::TempDir,
    _app: tempfile::TempDir,
    root: PathBuf,
    app: PathBuf,
}

impl AppFixture {
    pub fn new(manifest: &str) -> Self {
        let root = tempfile::tempdir().expect("create build root");
        let app = tempfile::tempdir().expect("create app dir");
        std::fs::write(app.path().join("meta.yml"), manifest).expect("write manifest");
        std::fs::write(app.path().join("main.c"), "int main() { return 0; }\n")
            .expect("write source");
        Self {
            root: root.path().to_path_buf(),
            app: app.path().to_path_buf(),
            _root: root,
            _app: app,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app(&self) -> &Path {
        &self.app
    }

    pub fn context(&self) -> marina::BuildContext {
        marina::BuildContext::new(&self.root, &self.app)
    }

    /// Entries currently in the build root.
    pub fn root_entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .expect("read build root")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        entries
    }
}

/// Manifest used by most tests: `app`, tag `1.0`.
pub const MANIFEST: &str = r#"
name: app
tag: "1.0"
compile:
  base_image: builder:1
  commands:
    - make
  files:
    - bin/app
run:
  base_image: runner:1
  config:
    env:
      Y: "2"
"#;
