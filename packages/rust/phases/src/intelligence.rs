//! Intelligence phase: gather recent news and score sentiment.

use std::sync::Arc;

use async_trait::async_trait;
use battlecard_engine::{PhaseNode, PhaseOutcome, StatePatch};
use battlecard_ports::{ExtractPort, ExtractSchema, FetchPort, FieldSpec, SearchPort};
use battlecard_shared::{ErrorKind, NewsItem, RunState};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{port_outcome, value_as_string};

/// Paths probed under the official site for first-party news.
const NEWS_PATHS: [&str; 4] = ["/blog", "/news", "/press", "/updates"];

/// Per-source cap so one long blog page cannot crowd out the others.
const MAX_SOURCE_CHARS: usize = 4000;

/// Cap on the combined document sent to the model.
const MAX_DOCUMENT_CHARS: usize = 8000;

const MAX_NEWS_ITEMS: usize = 5;

/// Probes the company's news pages and runs a news search concurrently, then
/// asks the model for the top headlines with sentiment scores. News is
/// optional data; exhausted retries degrade to an empty list.
pub struct IntelligenceNode {
    search: Arc<dyn SearchPort>,
    fetch: Arc<dyn FetchPort>,
    extract: Arc<dyn ExtractPort>,
    max_concurrent: u32,
}

impl IntelligenceNode {
    pub fn new(
        search: Arc<dyn SearchPort>,
        fetch: Arc<dyn FetchPort>,
        extract: Arc<dyn ExtractPort>,
        max_concurrent: u32,
    ) -> Self {
        Self {
            search,
            fetch,
            extract,
            max_concurrent,
        }
    }

    /// Fetch every news source concurrently, bounded by the sub-call limit.
    /// Individual source failures are logged and skipped.
    async fn gather_sources(&self, state: &RunState) -> (Vec<String>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1) as usize));
        let mut handles = Vec::new();

        if let Some(base) = state
            .official_site
            .as_deref()
            .and_then(|site| Url::parse(site).ok())
        {
            for path in NEWS_PATHS {
                let Ok(url) = base.join(path) else { continue };
                let fetch = Arc::clone(&self.fetch);
                let sem = Arc::clone(&semaphore);
                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("news semaphore closed");
                    match fetch.fetch(url.as_str()).await {
                        Ok(text) => Some(truncate_chars(&text, MAX_SOURCE_CHARS)),
                        Err(e) => {
                            debug!(url = %url, error = %e, "news probe failed");
                            None
                        }
                    }
                }));
            }
        }

        {
            let search = Arc::clone(&self.search);
            let sem = Arc::clone(&semaphore);
            let query = format!("\"{}\" news", state.company_name.trim());
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("news semaphore closed");
                match search.search(&query).await {
                    Ok(hits) if !hits.is_empty() => Some(
                        hits.iter()
                            .map(|h| format!("{} ({})\n{}", h.title, h.url, h.snippet))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(error = %e, "news search failed");
                        None
                    }
                }
            }));
        }

        let attempted = handles.len();
        let mut sections = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(section)) if !section.trim().is_empty() => sections.push(section),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "news source task panicked"),
            }
        }
        (sections, attempted)
    }
}

fn news_schema() -> ExtractSchema {
    ExtractSchema {
        name: "news".into(),
        fields: vec![FieldSpec {
            name: "news_items".into(),
            description: format!(
                "array of up to {MAX_NEWS_ITEMS} recent news items, each \
                 {{\"headline\": string, \"url\": string, \"sentiment_score\": \
                 number between -1 and 1}}"
            ),
        }],
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Shape the model's `news_items` value into typed items, dropping entries
/// without a headline and URL, clamping sentiment into [-1, 1].
fn parse_news_items(value: &serde_json::Value) -> Vec<NewsItem> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let headline = obj
                .get("headline")
                .or_else(|| obj.get("title"))
                .and_then(value_as_string)?;
            let url = obj.get("url").and_then(value_as_string)?;
            let sentiment_score = obj
                .get("sentiment_score")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0)
                .clamp(-1.0, 1.0);
            Some(NewsItem {
                headline,
                url,
                sentiment_score,
            })
        })
        .take(MAX_NEWS_ITEMS)
        .collect()
}

#[async_trait]
impl PhaseNode for IntelligenceNode {
    #[instrument(skip_all, fields(company = %state.company_name))]
    async fn run(&self, state: &RunState) -> PhaseOutcome {
        let (sections, attempted) = self.gather_sources(state).await;

        if sections.is_empty() {
            if attempted > 0 {
                // Everything we tried failed or came back empty; a retry may
                // catch the sources on a better day.
                return PhaseOutcome::Retry {
                    kind: ErrorKind::Transient,
                    message: format!("no news sources reachable for {}", state.company_name),
                };
            }
            return PhaseOutcome::Success(StatePatch::Intelligence {
                news_items: Vec::new(),
            });
        }

        let document = truncate_chars(&sections.join("\n\n---\n\n"), MAX_DOCUMENT_CHARS);
        let context = format!(
            "These are news pages and search results about {}. \
             Pick the most recent and relevant items about this company only.",
            state.company_name
        );

        let result = match self
            .extract
            .extract(&context, &document, &news_schema())
            .await
        {
            Ok(result) => result,
            Err(e) => return port_outcome(&e),
        };

        let news_items = result
            .extracted_fields
            .get("news_items")
            .map(|c| parse_news_items(&c.value))
            .unwrap_or_default();
        debug!(items = news_items.len(), "news extracted");
        PhaseOutcome::Success(StatePatch::Intelligence { news_items })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use battlecard_ports::{ChunkResult, FieldCandidate, PortError, PortResult, SearchHit};
    use serde_json::json;

    use super::*;

    struct StubSearch {
        hits: PortResult<Vec<SearchHit>>,
    }

    #[async_trait]
    impl SearchPort for StubSearch {
        async fn search(&self, _query: &str) -> PortResult<Vec<SearchHit>> {
            match &self.hits {
                Ok(hits) => Ok(hits.clone()),
                Err(_) => Err(PortError::ServiceUnavailable("search down".into())),
            }
        }
    }

    struct StubFetch {
        fail: bool,
    }

    #[async_trait]
    impl FetchPort for StubFetch {
        async fn fetch(&self, url: &str) -> PortResult<String> {
            if self.fail {
                Err(PortError::NotFound(url.to_string()))
            } else {
                Ok(format!("Recent posts from {url}. Acme ships v2 today."))
            }
        }
    }

    struct StubExtract {
        items: serde_json::Value,
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
                extracted_fields: BTreeMap::from([(
                    "news_items".to_string(),
                    FieldCandidate {
                        value: self.items.clone(),
                        confidence: 0.7,
                    },
                )]),
            })
        }

        async fn complete(&self, _prompt: &str) -> PortResult<String> {
            Err(PortError::ModelError("not used".into()))
        }
    }

    fn state_with_site() -> RunState {
        let mut state = RunState::new("Acme Corp");
        state.official_site = Some("https://acme.example.com".into());
        state
    }

    fn node(
        search_ok: bool,
        fetch_fail: bool,
        items: serde_json::Value,
    ) -> IntelligenceNode {
        let hits = if search_ok {
            Ok(vec![SearchHit {
                title: "Acme raises Series B".into(),
                url: "https://news.example.com/acme".into(),
                snippet: "Acme Corp announced a Series B round.".into(),
            }])
        } else {
            Err(PortError::ServiceUnavailable("down".into()))
        };
        IntelligenceNode::new(
            Arc::new(StubSearch { hits }),
            Arc::new(StubFetch { fail: fetch_fail }),
            Arc::new(StubExtract { items }),
            4,
        )
    }

    #[tokio::test]
    async fn extracted_news_is_clamped_and_typed() {
        let items = json!([
            {"headline": "Acme ships v2", "url": "https://example.com/v2",
             "sentiment_score": 2.5},
            {"title": "Acme raises Series B", "url": "https://example.com/b",
             "sentiment_score": -0.4},
            {"headline": "No url, dropped"},
        ]);
        match node(true, false, items).run(&state_with_site()).await {
            PhaseOutcome::Success(StatePatch::Intelligence { news_items }) => {
                assert_eq!(news_items.len(), 2);
                assert_eq!(news_items[0].sentiment_score, 1.0);
                assert_eq!(news_items[1].headline, "Acme raises Series B");
            }
            other => panic!("expected Intelligence patch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_sources_failing_retries() {
        match node(false, true, json!([])).run(&state_with_site()).await {
            PhaseOutcome::Retry { kind, .. } => assert_eq!(kind, ErrorKind::Transient),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_alone_is_enough_without_a_site() {
        // No official site: only the search source runs.
        match node(true, true, json!([])).run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Success(StatePatch::Intelligence { news_items }) => {
                assert!(news_items.is_empty());
            }
            other => panic!("expected Intelligence patch, got {other:?}"),
        }
    }

    #[test]
    fn sentiment_defaults_to_neutral() {
        let items = parse_news_items(&json!([
            {"headline": "H", "url": "https://example.com/h"}
        ]));
        assert_eq!(items[0].sentiment_score, 0.0);
    }
}
