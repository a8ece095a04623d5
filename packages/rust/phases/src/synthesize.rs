//! Synthesize phase: write the battle-card narrative.

use std::sync::Arc;

use async_trait::async_trait;
use battlecard_engine::{PhaseNode, PhaseOutcome, StatePatch};
use battlecard_ports::ExtractPort;
use battlecard_shared::{ErrorKind, RunState};
use tracing::{debug, instrument};

use crate::port_outcome;

/// Formats everything collected so far into the writing prompt and asks the
/// model for the finished card.
pub struct SynthesizeNode {
    extract: Arc<dyn ExtractPort>,
}

impl SynthesizeNode {
    pub fn new(extract: Arc<dyn ExtractPort>) -> Self {
        Self { extract }
    }
}

#[async_trait]
impl PhaseNode for SynthesizeNode {
    #[instrument(skip_all, fields(company = %state.company_name))]
    async fn run(&self, state: &RunState) -> PhaseOutcome {
        let prompt = battlecard_render::synthesis_prompt(state);
        let synthesis = match self.extract.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => return port_outcome(&e),
        };
        if synthesis.is_empty() {
            return PhaseOutcome::Retry {
                kind: ErrorKind::Transient,
                message: "model returned an empty battle card".into(),
            };
        }
        debug!(chars = synthesis.len(), "battle card written");
        PhaseOutcome::Success(StatePatch::Synthesize { synthesis })
    }
}

#[cfg(test)]
mod tests {
    use battlecard_ports::{ChunkResult, ExtractSchema, PortError, PortResult};

    use super::*;

    struct StubCompleter {
        response: PortResult<String>,
    }

    #[async_trait]
    impl ExtractPort for StubCompleter {
        async fn extract(
            &self,
            _prompt_context: &str,
            _chunk_text: &str,
            _schema: &ExtractSchema,
        ) -> PortResult<ChunkResult> {
            Err(PortError::ModelError("not used".into()))
        }

        async fn complete(&self, prompt: &str) -> PortResult<String> {
            assert!(prompt.contains("Battle Card for Acme Corp"));
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(PortError::ServiceUnavailable("model down".into())),
            }
        }
    }

    #[tokio::test]
    async fn written_card_becomes_the_synthesis() {
        let node = SynthesizeNode::new(Arc::new(StubCompleter {
            response: Ok("  # Battle Card: Acme Corp\n\nLead with reliability.  ".into()),
        }));
        match node.run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Success(StatePatch::Synthesize { synthesis }) => {
                assert!(synthesis.starts_with("# Battle Card"));
                assert!(!synthesis.ends_with(' '));
            }
            other => panic!("expected Synthesize patch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_response_retries() {
        let node = SynthesizeNode::new(Arc::new(StubCompleter {
            response: Ok("   \n  ".into()),
        }));
        assert!(matches!(
            node.run(&RunState::new("Acme Corp")).await,
            PhaseOutcome::Retry { .. }
        ));
    }

    #[tokio::test]
    async fn model_failure_retries() {
        let node = SynthesizeNode::new(Arc::new(StubCompleter {
            response: Err(PortError::ServiceUnavailable("down".into())),
        }));
        assert!(matches!(
            node.run(&RunState::new("Acme Corp")).await,
            PhaseOutcome::Retry { .. }
        ));
    }
}
