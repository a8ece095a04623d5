//! Detect phase: resolve company identity from web search.

use std::sync::Arc;

use async_trait::async_trait;
use battlecard_engine::{PhaseNode, PhaseOutcome, StatePatch};
use battlecard_ports::{ExtractPort, ExtractSchema, FieldSpec, SearchPort};
use battlecard_shared::{ErrorKind, RunState};
use tracing::{debug, instrument};

use crate::{port_outcome, value_as_string, value_as_string_list};

/// How many search hits go into the identification prompt.
const MAX_HITS_IN_PROMPT: usize = 8;
const MAX_COMPETITORS: usize = 5;

/// Searches for the company and asks the model to identify its official
/// website, a one-sentence description, and direct competitors.
pub struct DetectNode {
    search: Arc<dyn SearchPort>,
    extract: Arc<dyn ExtractPort>,
}

impl DetectNode {
    pub fn new(search: Arc<dyn SearchPort>, extract: Arc<dyn ExtractPort>) -> Self {
        Self { search, extract }
    }
}

fn identity_schema() -> ExtractSchema {
    ExtractSchema {
        name: "company_identity".into(),
        fields: vec![
            FieldSpec {
                name: "website_url".into(),
                description: "the company's official website URL".into(),
            },
            FieldSpec {
                name: "description".into(),
                description: "one sentence describing what the company does".into(),
            },
            FieldSpec {
                name: "competitors".into(),
                description: "array of up to five direct competitor company names".into(),
            },
        ],
    }
}

/// Model output sometimes omits the scheme; artifact URLs must be absolute.
fn normalize_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

#[async_trait]
impl PhaseNode for DetectNode {
    #[instrument(skip_all, fields(company = %state.company_name))]
    async fn run(&self, state: &RunState) -> PhaseOutcome {
        let name = state.company_name.trim();
        if name.is_empty() {
            return PhaseOutcome::Abort {
                kind: ErrorKind::UnrecoverableInput,
                message: "company name is empty".into(),
            };
        }

        let query = format!("{name} official website competitors");
        let hits = match self.search.search(&query).await {
            Ok(hits) => hits,
            Err(e) => return port_outcome(&e),
        };
        if hits.is_empty() {
            return PhaseOutcome::Retry {
                kind: ErrorKind::Transient,
                message: format!("search returned no results for {name}"),
            };
        }

        let document = hits
            .iter()
            .take(MAX_HITS_IN_PROMPT)
            .map(|h| format!("{}\n{}\n{}", h.title, h.url, h.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        let context = format!(
            "These are web search results for the company \"{name}\". \
             Identify the company itself, not resellers or review sites."
        );

        let result = match self
            .extract
            .extract(&context, &document, &identity_schema())
            .await
        {
            Ok(result) => result,
            Err(e) => return port_outcome(&e),
        };

        let official_site = result
            .extracted_fields
            .get("website_url")
            .and_then(|c| value_as_string(&c.value))
            .map(|url| normalize_url(&url));
        let description = result
            .extracted_fields
            .get("description")
            .and_then(|c| value_as_string(&c.value));
        let mut competitors = result
            .extracted_fields
            .get("competitors")
            .map(|c| value_as_string_list(&c.value))
            .unwrap_or_default();
        competitors.truncate(MAX_COMPETITORS);

        if official_site.is_none() && description.is_none() && competitors.is_empty() {
            return PhaseOutcome::Retry {
                kind: ErrorKind::ExtractionAmbiguity,
                message: format!("could not identify {name} from search results"),
            };
        }

        debug!(
            site = official_site.as_deref().unwrap_or("-"),
            competitors = competitors.len(),
            "company identified"
        );
        PhaseOutcome::Success(StatePatch::Detect {
            official_site,
            description,
            competitors,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use battlecard_ports::{ChunkResult, FieldCandidate, PortError, PortResult, SearchHit};
    use serde_json::json;

    use super::*;

    struct StubSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchPort for StubSearch {
        async fn search(&self, _query: &str) -> PortResult<Vec<SearchHit>> {
            Ok(self.hits.clone())
        }
    }

    struct StubExtract {
        fields: BTreeMap<String, FieldCandidate>,
    }

    #[async_trait]
    impl ExtractPort for StubExtract {
        async fn extract(
            &self,
            _prompt_context: &str,
            _chunk_text: &str,
            _schema: &ExtractSchema,
        ) -> PortResult<ChunkResult> {
            Ok(ChunkResult {
                chunk_index: 0,
                extracted_fields: self.fields.clone(),
            })
        }

        async fn complete(&self, _prompt: &str) -> PortResult<String> {
            Err(PortError::ModelError("not used".into()))
        }
    }

    fn hit() -> SearchHit {
        SearchHit {
            title: "Acme Corp | Official Site".into(),
            url: "https://acme.example.com".into(),
            snippet: "Rocket-powered developer tooling.".into(),
        }
    }

    fn candidate(value: serde_json::Value) -> FieldCandidate {
        FieldCandidate {
            value,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn empty_company_name_aborts() {
        let node = DetectNode::new(
            Arc::new(StubSearch { hits: vec![hit()] }),
            Arc::new(StubExtract {
                fields: BTreeMap::new(),
            }),
        );
        match node.run(&RunState::new("   ")).await {
            PhaseOutcome::Abort { kind, .. } => assert_eq!(kind, ErrorKind::UnrecoverableInput),
            other => panic!("expected Abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identified_company_emits_detect_patch() {
        let fields = BTreeMap::from([
            (
                "website_url".to_string(),
                candidate(json!("acme.example.com")),
            ),
            (
                "description".to_string(),
                candidate(json!("Rocket-powered developer tooling.")),
            ),
            (
                "competitors".to_string(),
                candidate(json!(["Globex", "Initech"])),
            ),
        ]);
        let node = DetectNode::new(
            Arc::new(StubSearch { hits: vec![hit()] }),
            Arc::new(StubExtract { fields }),
        );

        match node.run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Success(StatePatch::Detect {
                official_site,
                description,
                competitors,
            }) => {
                // Missing scheme gets normalized.
                assert_eq!(official_site.as_deref(), Some("https://acme.example.com"));
                assert!(description.is_some());
                assert_eq!(competitors, vec!["Globex", "Initech"]);
            }
            other => panic!("expected Detect patch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_search_results_retries() {
        let node = DetectNode::new(
            Arc::new(StubSearch { hits: vec![] }),
            Arc::new(StubExtract {
                fields: BTreeMap::new(),
            }),
        );
        match node.run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Retry { kind, .. } => assert_eq!(kind, ErrorKind::Transient),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_extraction_retries_as_ambiguous() {
        let node = DetectNode::new(
            Arc::new(StubSearch { hits: vec![hit()] }),
            Arc::new(StubExtract {
                fields: BTreeMap::new(),
            }),
        );
        match node.run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Retry { kind, .. } => {
                assert_eq!(kind, ErrorKind::ExtractionAmbiguity);
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }
}
