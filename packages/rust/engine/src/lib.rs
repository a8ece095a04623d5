//! Stateful workflow engine for the battle-card pipeline.
//!
//! The pipeline is a finite state machine: states are phases plus the two
//! terminals `Complete` and `Failed`, and the edges live in an explicit
//! transition table ([`route`]) rather than in ambient control flow. Each
//! phase node is a pure function from a state snapshot to a tagged outcome
//! (`Success(patch)` / `Retry` / `Abort`); the engine owns sequencing,
//! bounded retries with backoff, the phase-history audit trail, and atomic
//! patch application.

pub mod executor;
pub mod outcome;
pub mod patch;
pub mod transitions;

pub use executor::{
    CheckpointSink, EngineConfig, ProgressReporter, RunReport, SilentProgress, WorkflowEngine,
};
pub use outcome::{PhaseNode, PhaseOutcome};
pub use patch::StatePatch;
pub use transitions::{replay_history, route, Step, ENTRY_PHASE};
