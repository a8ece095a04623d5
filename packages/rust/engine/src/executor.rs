//! The workflow executor.
//!
//! Drives a [`RunState`] through the transition table: one phase at a time,
//! bounded attempts per phase, exponential backoff between retries, and a
//! wall-clock budget for the whole run. Every attempt leaves exactly one
//! phase-history entry and every failure leaves an error entry, so a
//! finished state is a complete audit trail of the run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use battlecard_shared::{ErrorEntry, ErrorKind, Phase, PhaseRecord, PhaseResolution, RunState, RunStatus};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::outcome::{PhaseNode, PhaseOutcome};
use crate::transitions::{route, Step, ENTRY_PHASE};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine-level timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for the whole run. Checked at the top of every
    /// attempt; an in-flight attempt is allowed to drain.
    pub run_timeout: Duration,
    /// Backoff before the second attempt; doubles per subsequent attempt.
    pub backoff_base: Duration,
    /// Ceiling on any single backoff sleep, before jitter.
    pub backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(300),
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Observer for run progress. The CLI renders a spinner from these; batch
/// runs pass [`SilentProgress`].
pub trait ProgressReporter: Send + Sync {
    fn phase(&self, _phase: Phase, _attempt: u32) {}
    fn finished(&self, _status: RunStatus) {}
}

/// A reporter that does nothing.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}

/// Durable sink invoked after every committed patch. Checkpoint failures
/// are logged and do not fail the run.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn checkpoint(&self, state: &RunState, committed: Phase) -> battlecard_shared::Result<()>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Outcome of a full run: terminal status plus the final state and timing.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub state: RunState,
    pub elapsed: Duration,
}

/// The phase scheduler. Holds one node per phase and the timing config;
/// all routing decisions come from [`route`].
pub struct WorkflowEngine {
    nodes: HashMap<Phase, Box<dyn PhaseNode>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            config,
        }
    }

    /// Register the node that executes a phase. Last registration wins.
    pub fn register(&mut self, phase: Phase, node: Box<dyn PhaseNode>) -> &mut Self {
        self.nodes.insert(phase, node);
        self
    }

    /// Run the pipeline to a terminal state.
    #[instrument(skip_all, fields(company = %state.company_name))]
    pub async fn execute(
        &self,
        mut state: RunState,
        progress: &dyn ProgressReporter,
        checkpoint: Option<&dyn CheckpointSink>,
    ) -> RunReport {
        let started = Instant::now();
        let deadline = started + self.config.run_timeout;
        let mut current = ENTRY_PHASE;

        let status = 'run: loop {
            let edges = route(current);
            let Some(node) = self.nodes.get(&current) else {
                state.errors.push(ErrorEntry {
                    phase: current,
                    attempt: 0,
                    kind: ErrorKind::UnrecoverableInput,
                    message: format!("no node registered for phase {current}"),
                });
                break RunStatus::Failed;
            };

            let mut next = None;
            for attempt in 1..=edges.max_attempts {
                let now = Instant::now();
                if now >= deadline {
                    warn!(phase = %current, attempt, "run budget exhausted");
                    state.errors.push(ErrorEntry {
                        phase: current,
                        attempt,
                        kind: ErrorKind::Timeout,
                        message: "run budget exhausted before attempt".into(),
                    });
                    break 'run RunStatus::Failed;
                }
                progress.phase(current, attempt);
                debug!(phase = %current, attempt, "starting attempt");

                // The attempt itself may not outlive the run budget. Sub-calls
                // already in flight inside the node drain on their own clock.
                let outcome = match tokio::time::timeout_at(deadline, node.run(&state)).await {
                    Ok(outcome) => outcome,
                    Err(_) => PhaseOutcome::Retry {
                        kind: ErrorKind::Timeout,
                        message: format!("phase {current} overran the run budget"),
                    },
                };

                match outcome {
                    PhaseOutcome::Success(patch) => {
                        if patch.owner() != current {
                            // Rejected attempt still counts: one history
                            // entry per attempt, no exceptions.
                            state.phase_history.push(PhaseRecord {
                                phase: current,
                                attempt,
                                outcome: PhaseResolution::Abort,
                            });
                            state.errors.push(ErrorEntry {
                                phase: current,
                                attempt,
                                kind: ErrorKind::UnrecoverableInput,
                                message: format!(
                                    "phase {current} emitted a patch owned by {}",
                                    patch.owner()
                                ),
                            });
                            break 'run RunStatus::Failed;
                        }
                        state.phase_history.push(PhaseRecord {
                            phase: current,
                            attempt,
                            outcome: PhaseResolution::Success,
                        });
                        patch.apply(&mut state);
                        if let Some(sink) = checkpoint {
                            if let Err(err) = sink.checkpoint(&state, current).await {
                                warn!(phase = %current, error = %err, "checkpoint failed");
                            }
                        }
                        info!(phase = %current, attempt, "phase succeeded");
                        next = Some(edges.on_success);
                        break;
                    }
                    PhaseOutcome::Retry { kind, message } => {
                        warn!(phase = %current, attempt, %kind, message, "attempt failed");
                        state.phase_history.push(PhaseRecord {
                            phase: current,
                            attempt,
                            outcome: PhaseResolution::Retry,
                        });
                        state.errors.push(ErrorEntry {
                            phase: current,
                            attempt,
                            kind,
                            message,
                        });
                        if attempt < edges.max_attempts {
                            tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                        } else {
                            next = Some(edges.on_failure);
                        }
                    }
                    PhaseOutcome::Abort { kind, message } => {
                        warn!(phase = %current, attempt, %kind, message, "phase aborted");
                        state.phase_history.push(PhaseRecord {
                            phase: current,
                            attempt,
                            outcome: PhaseResolution::Abort,
                        });
                        state.errors.push(ErrorEntry {
                            phase: current,
                            attempt,
                            kind,
                            message,
                        });
                        break 'run RunStatus::Failed;
                    }
                }
            }

            match next {
                Some(Step::Phase(phase)) => current = phase,
                Some(Step::Complete) => break RunStatus::Complete,
                Some(Step::Failed) | None => break RunStatus::Failed,
            }
        };

        progress.finished(status);
        info!(status = status.as_str(), "run finished");
        RunReport {
            status,
            state,
            elapsed: started.elapsed(),
        }
    }
}

/// Exponential backoff with ±50% jitter, capped before jitter is applied.
fn backoff_delay(config: &EngineConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config.backoff_base.saturating_mul(1u32 << exponent);
    let capped = raw.min(config.backoff_cap);
    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
    capped.mul_f64(jitter)
}
