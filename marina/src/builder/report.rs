//! Build outcome types.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::state::BuildState;
use crate::lifecycle::CleanupReport;

/// Steps of a build, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Cache,
    Source,
    Archive,
    Runner,
    Tag,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Cache => "preparing cache",
            BuildPhase::Source => "building source",
            BuildPhase::Archive => "writing archive",
            BuildPhase::Runner => "building runner",
            BuildPhase::Tag => "tagging image",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build container exited with a non-zero status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseFailure {
    pub phase: BuildPhase,
    pub exit_code: i64,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with exit status {}", self.phase, self.exit_code)
    }
}

impl std::error::Error for PhaseFailure {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded,
    Failed(PhaseFailure),
}

/// What a finished build produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub state: BuildState,
    /// `name:version` of the final image, when one was tagged.
    pub image: Option<String>,
    /// Host archive file, when one was written.
    pub archive: Option<PathBuf>,
    /// Working directory left behind for inspection (skip-cleanup only).
    pub working_dir: Option<PathBuf>,
    pub cleanup: CleanupReport,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == BuildOutcome::Succeeded
    }

    pub fn failure(&self) -> Option<&PhaseFailure> {
        match &self.outcome {
            BuildOutcome::Failed(failure) => Some(failure),
            BuildOutcome::Succeeded => None,
        }
    }
}
