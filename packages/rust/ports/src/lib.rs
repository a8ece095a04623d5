//! Capability ports consumed by the battle-card pipeline.
//!
//! Phase nodes never talk to the outside world directly; they go through the
//! narrow interfaces here ([`SearchPort`], [`FetchPort`], [`ExtractPort`]).
//! This crate also provides the production implementations: a DuckDuckGo HTML
//! search, a reqwest/scraper page fetcher with SSRF protection, and an
//! OpenRouter chat-completions client, all sharing one run-agnostic
//! [`Throttle`].
//!
//! Port failures surface as [`PortError`]; the owning phase node classifies
//! them into retry/abort decisions. The engine never sees a raw port error.

pub mod fetch;
pub mod llm;
pub mod search;
pub mod throttle;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use battlecard_shared::ErrorKind;

pub use fetch::PageFetcher;
pub use llm::OpenRouterClient;
pub use search::DuckDuckGoSearch;
pub use throttle::Throttle;

// ---------------------------------------------------------------------------
// PortError
// ---------------------------------------------------------------------------

/// Failure modes at the capability-port boundary.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Upstream service returned a 5xx or refused the connection.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Upstream service throttled us (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The requested document does not exist (HTTP 404/410).
    #[error("not found: {0}")]
    NotFound(String),

    /// The call exceeded its time budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Response was syntactically unusable (bad HTML, invalid JSON).
    #[error("parse error: {0}")]
    ParseError(String),

    /// The language model failed or returned an unusable payload.
    #[error("model error: {0}")]
    ModelError(String),
}

impl PortError {
    /// Classification used when this error is recorded in the run's error log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceUnavailable(_) | Self::RateLimited(_) | Self::ModelError(_) => {
                ErrorKind::Transient
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::Transient,
            Self::ParseError(_) => ErrorKind::ExtractionAmbiguity,
        }
    }
}

/// Convenience alias for port call results.
pub type PortResult<T> = std::result::Result<T, PortError>;

/// Map a reqwest error to the closest [`PortError`], tagged with the URL.
pub(crate) fn classify_reqwest(url: &str, e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout(format!("{url}: {e}"))
    } else if e.is_connect() {
        PortError::ServiceUnavailable(format!("{url}: {e}"))
    } else {
        PortError::ServiceUnavailable(format!("{url}: {e}"))
    }
}

/// Map a non-success HTTP status to the closest [`PortError`].
pub(crate) fn classify_status(url: &str, status: reqwest::StatusCode) -> PortError {
    match status.as_u16() {
        404 | 410 => PortError::NotFound(format!("{url}: HTTP {status}")),
        429 => PortError::RateLimited(format!("{url}: HTTP {status}")),
        _ => PortError::ServiceUnavailable(format!("{url}: HTTP {status}")),
    }
}

// ---------------------------------------------------------------------------
// Port interface types
// ---------------------------------------------------------------------------

/// One web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A candidate value for one field, produced by one extraction window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    /// The extracted value, still as opaque JSON until the caller shapes it.
    pub value: serde_json::Value,
    /// Model-reported confidence in [0, 1].
    pub confidence: f64,
}

/// Structured output of one extraction call over one window.
///
/// Transient: chunk results exist only until the extractor merges them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkResult {
    /// Zero-based index of the window this result came from.
    pub chunk_index: usize,
    /// Field name → candidate value. Sparse; empty is a valid outcome.
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, FieldCandidate>,
}

/// One field the extraction schema asks the model for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON key the model must use.
    pub name: String,
    /// Human description included in the prompt.
    pub description: String,
}

/// Explicit target schema for an extraction call. Whatever the model returns
/// is validated against this before it becomes a typed [`ChunkResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSchema {
    /// Short name of the record being extracted (e.g., "pricing").
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl ExtractSchema {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Port traits
// ---------------------------------------------------------------------------

/// Web search capability.
#[async_trait]
pub trait SearchPort: Send + Sync {
    async fn search(&self, query: &str) -> PortResult<Vec<SearchHit>>;
}

/// Document fetch capability. Returns cleaned page text, not raw HTML.
#[async_trait]
pub trait FetchPort: Send + Sync {
    async fn fetch(&self, url: &str) -> PortResult<String>;
}

/// Structured extraction / free-form completion via a language model.
#[async_trait]
pub trait ExtractPort: Send + Sync {
    /// Extract `schema` fields from one window of text.
    async fn extract(
        &self,
        prompt_context: &str,
        chunk_text: &str,
        schema: &ExtractSchema,
    ) -> PortResult<ChunkResult>;

    /// Free-form completion (used by the Synthesize phase).
    async fn complete(&self, prompt: &str) -> PortResult<String>;
}
