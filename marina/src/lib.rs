//! Marina - build applications inside ephemeral containers.
//!
//! A build compiles an application inside a throwaway container running a
//! synthesized shell script, optionally streams the produced archive to the
//! host, then extracts the archive into a runner base image, commits it, and
//! builds a final image tagged `name:version`.
//!
//! ```text
//! meta.yml ──→ BuildDescriptor ──→ build.sh ──→ compile container
//!                                                    │
//!                        archive container ←─────────┤ (optional)
//!                                                    │
//!                        runner container ──→ commit ──→ descriptor ──→ image
//! ```
//!
//! The container engine is reached through the [`ContainerEngine`] trait;
//! [`DockerEngine`] is the production implementation.

pub mod builder;
pub mod engine;
pub mod images;
pub mod lifecycle;
pub mod manifest;
pub mod options;
pub mod script;
pub mod stream;
pub mod util;

pub use builder::{
    BuildOrchestrator, BuildOutcome, BuildPhase, BuildReport, BuildState, PhaseFailure,
};
pub use engine::{ContainerEngine, ContainerId, ContainerSpec, DockerEngine, ImageConfig};
pub use images::{ConfigOverrides, RunnerImageConfig};
pub use manifest::BuildDescriptor;
pub use options::{BuildContext, BuildOptions, CacheSpec, CacheTarget};
pub use stream::{LogChunk, OutputSink, SinkFactory};

pub use marina_shared::{MarinaError, MarinaResult};
