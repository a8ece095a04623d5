//! OpenRouter chat-completions client — the extraction/synthesis port.
//!
//! Model output is never trusted directly: extraction responses get their
//! markdown code fences stripped, are parsed as JSON, and are validated
//! against the caller's [`ExtractSchema`] before becoming a [`ChunkResult`].
//! Anything that survives none of that is a `ModelError`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    ChunkResult, ExtractPort, ExtractSchema, FieldCandidate, PortError, PortResult, Throttle,
};

/// Default OpenRouter API endpoint.
const DEFAULT_ENDPOINT: &str = "https://openrouter.ai";

/// Per-request timeout. Model calls are the slowest thing in the pipeline.
const MODEL_TIMEOUT_SECS: u64 = 60;

/// Temperature for structured extraction (deterministic) vs. synthesis.
const EXTRACT_TEMPERATURE: f64 = 0.0;
const COMPLETE_TEMPERATURE: f64 = 0.7;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenRouter-compatible APIs.
pub struct OpenRouterClient {
    client: Client,
    throttle: Arc<Throttle>,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(throttle: Arc<Throttle>, api_key: String, model: String) -> PortResult<Self> {
        Self::with_endpoint(throttle, api_key, model, DEFAULT_ENDPOINT)
    }

    /// Point the client at a different endpoint (for tests against a mock server).
    pub fn with_endpoint(
        throttle: Arc<Throttle>,
        api_key: String,
        model: String,
        endpoint: &str,
    ) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MODEL_TIMEOUT_SECS))
            .build()
            .map_err(|e| PortError::ModelError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            throttle,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    /// One chat round-trip: prompt in, assistant text out.
    async fn chat(&self, prompt: &str, temperature: f64) -> PortResult<String> {
        let url = format!("{}/api/v1/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let _permit = self.throttle.acquire().await;
        debug!(model = %self.model, prompt_len = prompt.len(), "dispatching model call");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout(format!("model call: {e}"))
                } else {
                    PortError::ModelError(format!("model call: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => PortError::RateLimited(format!("model API: HTTP {status}")),
                500..=599 => PortError::ServiceUnavailable(format!("model API: HTTP {status}")),
                _ => PortError::ModelError(format!("model API: HTTP {status}")),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PortError::ModelError(format!("invalid completion response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PortError::ModelError("completion had no choices".into()))?;

        Ok(content)
    }
}

#[async_trait]
impl ExtractPort for OpenRouterClient {
    async fn extract(
        &self,
        prompt_context: &str,
        chunk_text: &str,
        schema: &ExtractSchema,
    ) -> PortResult<ChunkResult> {
        let prompt = build_extract_prompt(prompt_context, chunk_text, schema);
        let raw = self.chat(&prompt, EXTRACT_TEMPERATURE).await?;
        parse_extraction(&raw, schema)
    }

    async fn complete(&self, prompt: &str) -> PortResult<String> {
        let text = self.chat(prompt, COMPLETE_TEMPERATURE).await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PortError::ModelError("model returned empty completion".into()));
        }
        Ok(trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// Prompt construction & response validation
// ---------------------------------------------------------------------------

/// Build the structured-extraction prompt for one window.
fn build_extract_prompt(context: &str, chunk_text: &str, schema: &ExtractSchema) -> String {
    let mut field_lines = String::new();
    for field in &schema.fields {
        field_lines.push_str(&format!("- \"{}\": {}\n", field.name, field.description));
    }

    format!(
        "{context}\n\n\
         TEXT:\n{chunk_text}\n\n\
         TASK:\n\
         Extract the following {name} fields from the text above.\n\
         {field_lines}\n\
         RULES:\n\
         - Return ONLY a valid JSON object, no markdown, no preamble.\n\
         - Each present field maps to {{\"value\": <extracted value>, \"confidence\": <0.0-1.0>}}.\n\
         - OMIT any field the text does not support. Never invent values.\n",
        name = schema.name,
    )
}

/// Strip a leading/trailing markdown code fence from model output.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Validate raw model output against the schema, producing a typed result.
///
/// Unknown keys are dropped, null/empty values are dropped, confidences are
/// clamped to [0, 1]. A syntactically broken payload is a `ModelError`; a
/// valid payload with nothing useful in it is an empty (valid) result.
fn parse_extraction(raw: &str, schema: &ExtractSchema) -> PortResult<ChunkResult> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| PortError::ModelError(format!("extraction was not valid JSON: {e}")))?;

    let serde_json::Value::Object(map) = value else {
        return Err(PortError::ModelError(
            "extraction was not a JSON object".into(),
        ));
    };

    let mut extracted_fields = BTreeMap::new();

    for (key, entry) in map {
        if !schema.has_field(&key) {
            continue;
        }

        let (field_value, confidence) = match entry {
            serde_json::Value::Object(ref obj) if obj.contains_key("value") => {
                let v = obj.get("value").cloned().unwrap_or(serde_json::Value::Null);
                let c = obj
                    .get("confidence")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(DEFAULT_CONFIDENCE);
                (v, c)
            }
            // Bare value without the wrapper object.
            other => (other, DEFAULT_CONFIDENCE),
        };

        if is_empty_value(&field_value) {
            continue;
        }

        extracted_fields.insert(
            key,
            FieldCandidate {
                value: field_value,
                confidence: confidence.clamp(0.0, 1.0),
            },
        );
    }

    Ok(ChunkResult {
        chunk_index: 0,
        extracted_fields,
    })
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
