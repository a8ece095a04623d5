//! Price phase: probe pricing pages and extract structured plans.

use std::sync::Arc;

use async_trait::async_trait;
use battlecard_engine::{PhaseNode, PhaseOutcome, StatePatch};
use battlecard_extract::{extract_document, ExtractorOptions};
use battlecard_ports::{ExtractPort, ExtractSchema, FetchPort, FieldSpec};
use battlecard_shared::{PricingPlan, PricingRecord, RunState};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{port_outcome, value_as_string, value_as_string_list};

/// Paths probed under the official site, in order.
const PRICING_PATHS: [&str; 3] = ["/pricing", "/plans", "/price"];

/// A page shorter than this is navigation chrome, not pricing content.
const MIN_DOCUMENT_CHARS: usize = 100;

/// Fetches the first meaningful pricing page and runs it through the chunked
/// extractor. Pricing is optional data: a company without a reachable pricing
/// page degrades to an absent record rather than failing the run.
pub struct PriceNode {
    fetch: Arc<dyn FetchPort>,
    extract: Arc<dyn ExtractPort>,
    options: ExtractorOptions,
}

impl PriceNode {
    pub fn new(
        fetch: Arc<dyn FetchPort>,
        extract: Arc<dyn ExtractPort>,
        options: ExtractorOptions,
    ) -> Self {
        Self {
            fetch,
            extract,
            options,
        }
    }
}

fn pricing_schema() -> ExtractSchema {
    ExtractSchema {
        name: "pricing".into(),
        fields: vec![FieldSpec {
            name: "plans".into(),
            description: "object mapping each plan name to {\"price\": string with currency, \
                          \"billing_period\": string or null, \"features\": array of strings}"
                .into(),
        }],
    }
}

/// Shape a model-returned `plans` value into a typed record, dropping
/// entries without a usable price rather than rejecting the whole map.
fn parse_pricing_record(value: &serde_json::Value) -> PricingRecord {
    let mut record = PricingRecord::new();
    let Some(plans) = value.as_object() else {
        return record;
    };
    for (plan_name, details) in plans {
        let name = plan_name.trim();
        if name.is_empty() {
            continue;
        }
        let plan = match details {
            // Bare string value: the price itself.
            serde_json::Value::String(_) | serde_json::Value::Number(_) => {
                value_as_string(details).map(|price| PricingPlan {
                    price,
                    billing_period: None,
                    features: Vec::new(),
                })
            }
            serde_json::Value::Object(fields) => fields
                .get("price")
                .and_then(value_as_string)
                .map(|price| PricingPlan {
                    price,
                    billing_period: fields.get("billing_period").and_then(value_as_string),
                    features: fields
                        .get("features")
                        .map(value_as_string_list)
                        .unwrap_or_default(),
                }),
            _ => None,
        };
        if let Some(plan) = plan {
            record.insert(name.to_string(), plan);
        }
    }
    record
}

#[async_trait]
impl PhaseNode for PriceNode {
    #[instrument(skip_all, fields(company = %state.company_name))]
    async fn run(&self, state: &RunState) -> PhaseOutcome {
        let empty = || {
            PhaseOutcome::Success(StatePatch::Price {
                pricing_record: PricingRecord::new(),
            })
        };

        let Some(site) = state.official_site.as_deref() else {
            debug!("no official site, skipping pricing");
            return empty();
        };
        let Ok(base) = Url::parse(site) else {
            warn!(site, "official site is not a valid URL, skipping pricing");
            return empty();
        };

        let mut document = None;
        let mut fetched_any = false;
        let mut last_error = None;
        for path in PRICING_PATHS {
            let Ok(url) = base.join(path) else { continue };
            match self.fetch.fetch(url.as_str()).await {
                Ok(text) => {
                    fetched_any = true;
                    if text.trim().chars().count() > MIN_DOCUMENT_CHARS {
                        debug!(url = %url, chars = text.len(), "pricing page found");
                        document = Some(text);
                        break;
                    }
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "pricing probe failed");
                    last_error = Some(e);
                }
            }
        }

        let Some(document) = document else {
            // Pages fetched but all too thin: the site has no pricing page.
            // Every probe errored: worth a retry before degrading.
            return match (fetched_any, last_error) {
                (false, Some(e)) => port_outcome(&e),
                _ => empty(),
            };
        };

        let context = format!(
            "This is text from the pricing page of {}. Extract every pricing plan it names.",
            state.company_name
        );
        let merged = match extract_document(
            Arc::clone(&self.extract),
            &context,
            &document,
            &pricing_schema(),
            &self.options,
        )
        .await
        {
            Ok(merged) => merged,
            Err(e) => return PhaseOutcome::from_error(&e),
        };

        let pricing_record = merged
            .get("plans")
            .map(parse_pricing_record)
            .unwrap_or_default();
        debug!(plans = pricing_record.len(), "pricing extracted");
        PhaseOutcome::Success(StatePatch::Price { pricing_record })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use battlecard_ports::{ChunkResult, FieldCandidate, PortError, PortResult};
    use serde_json::json;

    use super::*;

    struct StubFetch {
        pages: BTreeMap<String, PortResult<String>>,
        requested: Mutex<Vec<String>>,
    }

    impl StubFetch {
        fn new(pages: impl IntoIterator<Item = (&'static str, PortResult<String>)>) -> Arc<Self> {
            Arc::new(Self {
                pages: pages
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FetchPort for StubFetch {
        async fn fetch(&self, url: &str) -> PortResult<String> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(_)) => Err(PortError::ServiceUnavailable(url.to_string())),
                None => Err(PortError::NotFound(url.to_string())),
            }
        }
    }

    struct StubExtract {
        plans: serde_json::Value,
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
                    "plans".to_string(),
                    FieldCandidate {
                        value: self.plans.clone(),
                        confidence: 0.8,
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

    fn pricing_page() -> PortResult<String> {
        Ok(format!(
            "Pricing. Pro plan twelve dollars per month with SSO and audit log. {}",
            "More plan details. ".repeat(10)
        ))
    }

    #[tokio::test]
    async fn missing_site_degrades_to_empty_record() {
        let node = PriceNode::new(
            StubFetch::new([]),
            Arc::new(StubExtract { plans: json!({}) }),
            ExtractorOptions::default(),
        );
        match node.run(&RunState::new("Acme Corp")).await {
            PhaseOutcome::Success(StatePatch::Price { pricing_record }) => {
                assert!(pricing_record.is_empty());
            }
            other => panic!("expected empty Price patch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_meaningful_page_wins() {
        let fetch = StubFetch::new([
            (
                "https://acme.example.com/pricing",
                Err(PortError::NotFound("404".into())),
            ),
            ("https://acme.example.com/plans", pricing_page()),
        ]);
        let node = PriceNode::new(
            Arc::clone(&fetch) as Arc<dyn FetchPort>,
            Arc::new(StubExtract {
                plans: json!({
                    "Pro": {"price": "$12/month", "billing_period": "monthly",
                            "features": ["SSO", "Audit log"]},
                }),
            }),
            ExtractorOptions::default(),
        );

        match node.run(&state_with_site()).await {
            PhaseOutcome::Success(StatePatch::Price { pricing_record }) => {
                assert_eq!(pricing_record["Pro"].price, "$12/month");
                assert_eq!(pricing_record["Pro"].features, vec!["SSO", "Audit log"]);
            }
            other => panic!("expected Price patch, got {other:?}"),
        }
        // /price was never probed once /plans matched.
        let requested = fetch.requested.lock().unwrap();
        assert!(!requested.iter().any(|u| u.ends_with("/price")));
    }

    #[tokio::test]
    async fn all_probes_failing_retries() {
        let fetch = StubFetch::new([
            (
                "https://acme.example.com/pricing",
                Err(PortError::ServiceUnavailable("503".into())),
            ),
            (
                "https://acme.example.com/plans",
                Err(PortError::ServiceUnavailable("503".into())),
            ),
            (
                "https://acme.example.com/price",
                Err(PortError::ServiceUnavailable("503".into())),
            ),
        ]);
        let node = PriceNode::new(
            fetch,
            Arc::new(StubExtract { plans: json!({}) }),
            ExtractorOptions::default(),
        );
        assert!(matches!(
            node.run(&state_with_site()).await,
            PhaseOutcome::Retry { .. }
        ));
    }

    #[tokio::test]
    async fn thin_pages_mean_no_pricing() {
        let fetch = StubFetch::new([
            ("https://acme.example.com/pricing", Ok("Menu".to_string())),
            ("https://acme.example.com/plans", Ok("Menu".to_string())),
            ("https://acme.example.com/price", Ok("Menu".to_string())),
        ]);
        let node = PriceNode::new(
            fetch,
            Arc::new(StubExtract { plans: json!({}) }),
            ExtractorOptions::default(),
        );
        match node.run(&state_with_site()).await {
            PhaseOutcome::Success(StatePatch::Price { pricing_record }) => {
                assert!(pricing_record.is_empty());
            }
            other => panic!("expected empty Price patch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_run_deadline_surfaces_as_timeout_retry() {
        let fetch = StubFetch::new([("https://acme.example.com/pricing", pricing_page())]);
        let options = ExtractorOptions {
            deadline: Some(tokio::time::Instant::now()),
            ..ExtractorOptions::default()
        };
        let node = PriceNode::new(
            fetch,
            Arc::new(StubExtract {
                plans: json!({"Pro": {"price": "$12/month"}}),
            }),
            options,
        );
        match node.run(&state_with_site()).await {
            PhaseOutcome::Retry { kind, .. } => {
                assert_eq!(kind, battlecard_shared::ErrorKind::Timeout);
            }
            other => panic!("expected Timeout retry, got {other:?}"),
        }
    }

    #[test]
    fn lenient_plan_parsing() {
        let record = parse_pricing_record(&json!({
            "Free": "0",
            "Pro": {"price": 12, "billing_period": "monthly"},
            "Broken": {"note": "no price here"},
            "": {"price": "$1"},
        }));
        assert_eq!(record.len(), 2);
        assert_eq!(record["Free"].price, "0");
        assert_eq!(record["Pro"].price, "12");
        assert_eq!(record["Pro"].billing_period.as_deref(), Some("monthly"));
    }
}
