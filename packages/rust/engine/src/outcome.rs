//! Phase node trait and the tagged outcome phases report back.

use async_trait::async_trait;
use battlecard_shared::{ErrorKind, RunState};

use crate::patch::StatePatch;

/// The result of a single phase attempt.
///
/// A phase never mutates the run state directly. On success it hands the
/// engine a [`StatePatch`] describing the fields it owns; on failure it
/// classifies the error so the engine can decide between another attempt
/// and the failure edge.
#[derive(Debug)]
pub enum PhaseOutcome {
    /// The attempt produced usable data; commit the patch and advance.
    Success(StatePatch),
    /// The attempt failed in a way another attempt might fix.
    Retry { kind: ErrorKind, message: String },
    /// The attempt failed in a way no retry can fix. The run fails
    /// immediately, regardless of remaining attempts.
    Abort { kind: ErrorKind, message: String },
}

impl PhaseOutcome {
    /// Classify an error into `Retry` or `Abort` based on its kind.
    pub fn from_error(err: &battlecard_shared::BattleCardError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        if kind.is_retryable() {
            Self::Retry { kind, message }
        } else {
            Self::Abort { kind, message }
        }
    }
}

/// A single phase of the pipeline.
///
/// Implementations read the state snapshot (including fields committed by
/// earlier phases) and return an outcome. They must not hold references into
/// the state across await points longer than the call itself.
#[async_trait]
pub trait PhaseNode: Send + Sync {
    async fn run(&self, state: &RunState) -> PhaseOutcome;
}
