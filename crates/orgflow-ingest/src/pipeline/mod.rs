//! Pipeline coordination: run state, artifact keys, stage handoff and the
//! coordinator that drives a run through its stages.

pub mod archive;
pub mod coordinator;
pub mod handoff;
pub mod keys;
pub mod state;

pub use coordinator::{Coordinator, RunReport, Stage, StageFailure, StageResult};
pub use handoff::{new_run_id, validate_run_id, FileHandoff, HandoffChannel, HandoffEntry, MemoryHandoff};
pub use keys::artifact_key;
pub use state::{PipelineRun, RunState};
