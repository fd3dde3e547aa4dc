//! Run state machine
//!
//! ```text
//! PENDING -> LOCAL_VERIFIED -> UPLOADED -> DOWNLOADED -> TRANSFORMED -> LOADED -> CLEANED
//!                                                              |                    ^
//!                                                              +---- (no rows) -----+
//! ```
//!
//! `ABORTED` is reachable from every non-terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    LocalVerified,
    Uploaded,
    Downloaded,
    Transformed,
    Loaded,
    Cleaned,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "PENDING",
            RunState::LocalVerified => "LOCAL_VERIFIED",
            RunState::Uploaded => "UPLOADED",
            RunState::Downloaded => "DOWNLOADED",
            RunState::Transformed => "TRANSFORMED",
            RunState::Loaded => "LOADED",
            RunState::Cleaned => "CLEANED",
            RunState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Cleaned | RunState::Aborted)
    }

    /// Whether `self -> next` is an edge of the run graph
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;

        match (self, next) {
            (from, Aborted) => !from.is_terminal(),
            (Pending, LocalVerified)
            | (LocalVerified, Uploaded)
            | (Uploaded, Downloaded)
            | (Downloaded, Transformed)
            | (Transformed, Loaded)
            | (Transformed, Cleaned)
            | (Loaded, Cleaned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline run as seen by the current process
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: String,
    state: RunState,
    artifact_key: Option<String>,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Pending,
            artifact_key: None,
        }
    }

    /// Pick up a run whose artifact was uploaded by an earlier invocation
    pub fn resume(run_id: impl Into<String>, artifact_key: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Uploaded,
            artifact_key: Some(artifact_key.into()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn artifact_key(&self) -> Option<&str> {
        self.artifact_key.as_deref()
    }

    pub fn set_artifact_key(&mut self, key: impl Into<String>) {
        self.artifact_key = Some(key.into());
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::handoff(format!(
                "run {}: illegal transition {} -> {}",
                self.run_id, self.state, next
            )));
        }

        info!(
            run_id = %self.run_id,
            from = %self.state,
            to = %next,
            "Run state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Move to `ABORTED`, recording why. A run that already finished stays put.
    pub fn abort(&mut self, error: &PipelineError) {
        if self.state.is_terminal() {
            return;
        }

        warn!(
            run_id = %self.run_id,
            from = %self.state,
            to = %RunState::Aborted,
            error_kind = error.kind(),
            "Run state transition"
        );
        self.state = RunState::Aborted;
    }
}
