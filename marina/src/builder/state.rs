//! Build state machine.
//!
//! ```text
//! Init → CacheReady → SourceBuilt ──→ Archived ──→ RunnerReady → Tagged → Done
//!                          │              │
//!                          └──────────────┴──→ Done        (archive only)
//! ```
//!
//! `Failed` is reachable from every non-terminal state.

use std::fmt;

use chrono::{DateTime, Utc};
use marina_shared::errors::{MarinaError, MarinaResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Init,
    CacheReady,
    SourceBuilt,
    Archived,
    RunnerReady,
    Tagged,
    Done,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Done | BuildState::Failed)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: BuildState) -> bool {
        use BuildState::*;
        matches!(
            (self, target),
            (Init, CacheReady) |
            (CacheReady, SourceBuilt) |
            // archive is optional
            (SourceBuilt, Archived) |
            (SourceBuilt, RunnerReady) |
            (Archived, RunnerReady) |
            // archive only
            (SourceBuilt, Done) |
            (Archived, Done) |
            (RunnerReady, Tagged) |
            (Tagged, Done)
        ) || (target == Failed && !self.is_terminal())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Init => "init",
            BuildState::CacheReady => "cache_ready",
            BuildState::SourceBuilt => "source_built",
            BuildState::Archived => "archived",
            BuildState::RunnerReady => "runner_ready",
            BuildState::Tagged => "tagged",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the time it was entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTracker {
    state: BuildState,
    last_updated: DateTime<Utc>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: BuildState::Init,
            last_updated: Utc::now(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Attempt state transition with validation.
    pub fn transition_to(&mut self, target: BuildState) -> MarinaResult<()> {
        if !self.state.can_transition_to(target) {
            return Err(MarinaError::Internal(format!(
                "cannot transition build from {} to {}",
                self.state, target
            )));
        }
        tracing::debug!(from = %self.state, to = %target, "build state changed");
        self.state = target;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Move to `Failed` unless the build already finished.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = BuildState::Failed;
            self.last_updated = Utc::now();
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
