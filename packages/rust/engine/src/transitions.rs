//! The transition table.
//!
//! All sequencing policy lives here: which phase follows which, where the
//! failure edge of each phase lands, and how many attempts each phase gets.
//! The executor consults this table and nothing else, so reordering the
//! pipeline or changing a retry budget is a one-line edit.

use battlecard_shared::{Phase, PhaseRecord, PhaseResolution};

/// Where a run goes next: another phase or a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Phase(Phase),
    Complete,
    Failed,
}

/// The outgoing edges and retry budget for one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRoute {
    pub on_success: Step,
    pub on_failure: Step,
    pub max_attempts: u32,
}

/// Every run starts in Detect.
pub const ENTRY_PHASE: Phase = Phase::Detect;

/// The full transition table.
///
/// Price and Intelligence degrade on exhausted retries: their failure edge
/// points at the next phase, so the run continues with the field absent.
/// Detect, Synthesize, and Deliver are load-bearing and fail the run.
pub fn route(phase: Phase) -> PhaseRoute {
    match phase {
        Phase::Detect => PhaseRoute {
            on_success: Step::Phase(Phase::Price),
            on_failure: Step::Failed,
            max_attempts: 2,
        },
        Phase::Price => PhaseRoute {
            on_success: Step::Phase(Phase::Intelligence),
            on_failure: Step::Phase(Phase::Intelligence),
            max_attempts: 3,
        },
        Phase::Intelligence => PhaseRoute {
            on_success: Step::Phase(Phase::Synthesize),
            on_failure: Step::Phase(Phase::Synthesize),
            max_attempts: 2,
        },
        Phase::Synthesize => PhaseRoute {
            on_success: Step::Phase(Phase::Deliver),
            on_failure: Step::Failed,
            max_attempts: 2,
        },
        Phase::Deliver => PhaseRoute {
            on_success: Step::Complete,
            on_failure: Step::Failed,
            max_attempts: 1,
        },
    }
}

/// Recompute the path a finished run took from its phase history alone.
///
/// The history is an append-only log of attempts; walking it through the
/// transition table must land on the same terminal the live run reached.
/// Used by tests and by `list` output to show the route without storing it.
pub fn replay_history(history: &[PhaseRecord]) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut i = 0;
    while i < history.len() {
        let phase = history[i].phase;
        let r = route(phase);
        // Consume all consecutive attempts of this phase.
        let mut resolved = None;
        while i < history.len() && history[i].phase == phase {
            match history[i].outcome {
                PhaseResolution::Success => resolved = Some(r.on_success),
                PhaseResolution::Abort => resolved = Some(Step::Failed),
                PhaseResolution::Retry => {
                    if history[i].attempt >= r.max_attempts {
                        resolved = Some(r.on_failure);
                    }
                }
            }
            i += 1;
        }
        steps.push(Step::Phase(phase));
        match resolved {
            Some(step @ (Step::Complete | Step::Failed)) => {
                steps.push(step);
                break;
            }
            Some(Step::Phase(_)) | None => {}
        }
    }
    steps
}
