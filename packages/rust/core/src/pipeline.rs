//! End-to-end single-run pipeline: company name → phases → artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use battlecard_engine::{
    CheckpointSink, EngineConfig, ProgressReporter, WorkflowEngine,
};
use battlecard_extract::ExtractorOptions;
use battlecard_phases::{DeliverNode, DetectNode, IntelligenceNode, PriceNode, SynthesizeNode};
use battlecard_ports::{
    DuckDuckGoSearch, ExtractPort, FetchPort, OpenRouterClient, PageFetcher, SearchPort, Throttle,
};
use battlecard_shared::{
    validate_api_key, AppConfig, BattleCardError, Phase, Result, RunConfig, RunId, RunState,
    RunStatus,
};
use battlecard_storage::{RunCheckpointer, Storage};

/// The three capability ports a run needs. Cheap to clone; bulk runs clone
/// one set so every run shares the same underlying throttle.
#[derive(Clone)]
pub struct PipelinePorts {
    pub search: Arc<dyn SearchPort>,
    pub fetch: Arc<dyn FetchPort>,
    pub extract: Arc<dyn ExtractPort>,
}

impl PipelinePorts {
    /// Build the production ports from config: DuckDuckGo search, the page
    /// fetcher, and the OpenRouter client, all behind one shared throttle.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        validate_api_key(config)?;
        let api_key = std::env::var(&config.openrouter.api_key_env)
            .map_err(|_| BattleCardError::config("OpenRouter API key missing"))?;

        let throttle = Throttle::new(
            config.defaults.max_concurrent_subcalls,
            config.defaults.rate_limit_ms,
        );
        let search = DuckDuckGoSearch::new(Arc::clone(&throttle))
            .map_err(|e| BattleCardError::Network(e.to_string()))?;
        let fetch = PageFetcher::new(Arc::clone(&throttle))
            .map_err(|e| BattleCardError::Network(e.to_string()))?;
        let extract = OpenRouterClient::new(
            throttle,
            api_key,
            config.openrouter.default_model.clone(),
        )
        .map_err(|e| BattleCardError::Network(e.to_string()))?;

        Ok(Self {
            search: Arc::new(search),
            fetch: Arc::new(fetch),
            extract: Arc::new(extract),
        })
    }
}

/// Per-run options resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub run: RunConfig,
    pub output_dir: PathBuf,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            run: RunConfig::from(config),
            output_dir: expand_home(&config.defaults.output_dir),
        }
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Assemble the workflow engine with all five phase nodes registered.
///
/// `deadline` is the run's wall-clock cutoff; the chunked extractor stops
/// dispatching new windows past it and lets in-flight ones drain.
pub fn build_engine(
    ports: &PipelinePorts,
    options: &PipelineOptions,
    deadline: Option<tokio::time::Instant>,
) -> WorkflowEngine {
    let extractor = ExtractorOptions {
        chunk_size: options.run.chunk_size,
        overlap_fraction: options.run.chunk_overlap_fraction,
        max_concurrent: options.run.max_concurrent_subcalls,
        deadline,
    };

    let mut engine = WorkflowEngine::new(EngineConfig {
        run_timeout: options.run.run_timeout,
        ..EngineConfig::default()
    });
    engine
        .register(
            Phase::Detect,
            Box::new(DetectNode::new(
                Arc::clone(&ports.search),
                Arc::clone(&ports.extract),
            )),
        )
        .register(
            Phase::Price,
            Box::new(PriceNode::new(
                Arc::clone(&ports.fetch),
                Arc::clone(&ports.extract),
                extractor,
            )),
        )
        .register(
            Phase::Intelligence,
            Box::new(IntelligenceNode::new(
                Arc::clone(&ports.search),
                Arc::clone(&ports.fetch),
                Arc::clone(&ports.extract),
                options.run.max_concurrent_subcalls,
            )),
        )
        .register(
            Phase::Synthesize,
            Box::new(SynthesizeNode::new(Arc::clone(&ports.extract))),
        )
        .register(
            Phase::Deliver,
            Box::new(DeliverNode::new(options.output_dir.clone())),
        );
    engine
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub state: RunState,
    pub elapsed: Duration,
}

/// Run the full pipeline for one company.
///
/// A `Failed` run is a normal return, carrying the partial state and its
/// error log. With storage attached, the run is registered up front, each
/// committed phase is checkpointed, and the terminal status is recorded.
#[instrument(skip_all, fields(company = %company))]
pub async fn run_pipeline(
    company: &str,
    ports: &PipelinePorts,
    options: &PipelineOptions,
    progress: &dyn ProgressReporter,
    storage: Option<Arc<Storage>>,
) -> Result<PipelineReport> {
    let run_id = RunId::new();
    let state = RunState::new(company.trim());
    info!(%run_id, company = %state.company_name, "starting run");

    if let Some(storage) = &storage {
        storage.register_run(&run_id, &state).await?;
    }

    let deadline = tokio::time::Instant::now() + options.run.run_timeout;
    let engine = build_engine(ports, options, Some(deadline));
    let checkpointer = storage
        .as_ref()
        .map(|s| RunCheckpointer::new(Arc::clone(s), run_id.clone()));
    let report = engine
        .execute(
            state,
            progress,
            checkpointer.as_ref().map(|c| c as &dyn CheckpointSink),
        )
        .await;

    if let Some(storage) = &storage {
        // Registry trouble must not discard a finished run.
        if let Err(e) = storage.finish_run(&run_id, report.status, &report.state).await {
            warn!(%run_id, error = %e, "could not record run outcome");
        }
    }

    Ok(PipelineReport {
        run_id,
        status: report.status,
        state: report.state,
        elapsed: report.elapsed,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use battlecard_ports::{
        ChunkResult, ExtractSchema, FieldCandidate, PortResult, SearchHit,
    };
    use serde_json::json;

    use super::*;

    pub struct StubSearch;

    #[async_trait]
    impl SearchPort for StubSearch {
        async fn search(&self, query: &str) -> PortResult<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: format!("Results for {query}"),
                url: "https://acme.example.com".into(),
                snippet: "Acme Corp, rocket-powered developer tooling.".into(),
            }])
        }
    }

    pub struct StubFetch;

    #[async_trait]
    impl FetchPort for StubFetch {
        async fn fetch(&self, url: &str) -> PortResult<String> {
            Ok(format!(
                "Content of {url}. Pro plan costs twelve dollars per month. {}",
                "Details. ".repeat(20)
            ))
        }
    }

    /// Answers every schema the pipeline uses, keyed by schema name.
    pub struct StubModel;

    #[async_trait]
    impl ExtractPort for StubModel {
        async fn extract(
            &self,
            _prompt_context: &str,
            _chunk_text: &str,
            schema: &ExtractSchema,
        ) -> PortResult<ChunkResult> {
            let (field, value) = match schema.name.as_str() {
                "company_identity" => (
                    None,
                    json!({
                        "website_url": "https://acme.example.com",
                        "description": "Rocket-powered developer tooling.",
                        "competitors": ["Globex", "Initech"],
                    }),
                ),
                "pricing" => (
                    Some("plans"),
                    json!({"Pro": {"price": "$12/month", "billing_period": "monthly"}}),
                ),
                "news" => (
                    Some("news_items"),
                    json!([{"headline": "Acme ships v2",
                            "url": "https://example.com/v2",
                            "sentiment_score": 0.8}]),
                ),
                other => panic!("unexpected schema {other}"),
            };

            let mut extracted_fields = BTreeMap::new();
            match field {
                Some(name) => {
                    extracted_fields.insert(
                        name.to_string(),
                        FieldCandidate {
                            value,
                            confidence: 0.9,
                        },
                    );
                }
                None => {
                    for (k, v) in value.as_object().unwrap() {
                        extracted_fields.insert(
                            k.clone(),
                            FieldCandidate {
                                value: v.clone(),
                                confidence: 0.9,
                            },
                        );
                    }
                }
            }
            Ok(ChunkResult {
                chunk_index: 0,
                extracted_fields,
            })
        }

        async fn complete(&self, _prompt: &str) -> PortResult<String> {
            Ok("# Battle Card: Acme Corp\n\nLead with reliability.".into())
        }
    }

    pub fn stub_ports() -> PipelinePorts {
        PipelinePorts {
            search: Arc::new(StubSearch),
            fetch: Arc::new(StubFetch),
            extract: Arc::new(StubModel),
        }
    }

    pub fn test_options(output_dir: PathBuf) -> PipelineOptions {
        PipelineOptions {
            run: RunConfig {
                max_concurrent_subcalls: 2,
                run_timeout: Duration::from_secs(30),
                chunk_size: 400,
                chunk_overlap_fraction: 0.1,
            },
            output_dir,
        }
    }
}
