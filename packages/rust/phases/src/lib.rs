//! The five phase nodes of the battle-card pipeline.
//!
//! Each node implements [`battlecard_engine::PhaseNode`] over the capability
//! ports: it reads the state snapshot, talks to search/fetch/extract as
//! needed, and reports a tagged outcome. Port errors are classified here;
//! the engine only ever sees `Success`/`Retry`/`Abort`.

pub mod deliver;
pub mod detect;
pub mod intelligence;
pub mod price;
pub mod synthesize;

use battlecard_engine::PhaseOutcome;
use battlecard_ports::PortError;

pub use deliver::DeliverNode;
pub use detect::DetectNode;
pub use intelligence::IntelligenceNode;
pub use price::PriceNode;
pub use synthesize::SynthesizeNode;

/// Classify a port error into the retry/abort decision the engine expects.
pub(crate) fn port_outcome(err: &PortError) -> PhaseOutcome {
    let kind = err.kind();
    let message = err.to_string();
    if kind.is_retryable() {
        PhaseOutcome::Retry { kind, message }
    } else {
        PhaseOutcome::Abort { kind, message }
    }
}

/// Coerce a model-returned JSON value to a string. Numbers are rendered
/// rather than rejected since models frequently return prices and scores
/// unquoted.
pub(crate) fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce a model-returned JSON value to a list of strings. A bare string is
/// treated as a comma-separated list.
pub(crate) fn value_as_string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items.iter().filter_map(value_as_string).collect(),
        serde_json::Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
