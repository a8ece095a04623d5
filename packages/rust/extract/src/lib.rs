//! Chunked extraction of structured records from long documents.
//!
//! Documents too large for one model call are split into fixed-size windows
//! with fractional overlap (so a field straddling a boundary is fully visible
//! in at least one window). Each window goes through the extract port
//! independently — concurrently, bounded by a semaphore — and the sparse
//! per-window candidates are merged deterministically:
//!
//! - one candidate for a field → take it
//! - several candidates → highest confidence wins; exact tie → earliest window
//! - no candidates → field absent (a valid outcome, not an error)
//!
//! A single failing window is logged and contributes nothing; only when every
//! window fails does the extraction itself fail, so the owning phase can
//! spend a retry on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use battlecard_ports::{ChunkResult, ExtractPort, ExtractSchema};
use battlecard_shared::{BattleCardError, Result};

/// Tuning for one extraction pass.
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Fractional overlap between adjacent windows, in [0, 1).
    pub overlap_fraction: f64,
    /// Maximum concurrent extract calls.
    pub max_concurrent: u32,
    /// Optional run deadline. Checked before each window is dispatched;
    /// already-dispatched windows are allowed to drain.
    pub deadline: Option<Instant>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_fraction: 0.1,
            max_concurrent: 4,
            deadline: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Windowing
// ---------------------------------------------------------------------------

/// Split text into overlapping windows of `chunk_size` characters.
///
/// The stride is `chunk_size * (1 - overlap_fraction)`, clamped to at least
/// one character so windowing always advances. Splitting is done on char
/// boundaries; a document shorter than one window yields a single chunk.
pub fn chunk_text(text: &str, chunk_size: usize, overlap_fraction: f64) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let overlap = overlap_fraction.clamp(0.0, 0.99);
    let stride = ((chunk_size as f64) * (1.0 - overlap)).floor().max(1.0) as usize;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Deterministically merge per-window candidates into one record.
///
/// Idempotent: merging the same result set twice yields the same record.
/// Merging zero results yields an empty record.
pub fn merge_results(results: &[ChunkResult]) -> BTreeMap<String, serde_json::Value> {
    let mut merged: BTreeMap<String, (usize, f64, serde_json::Value)> = BTreeMap::new();

    for result in results {
        for (field, candidate) in &result.extracted_fields {
            match merged.get(field) {
                Some((best_index, best_confidence, _)) => {
                    let wins = candidate.confidence > *best_confidence
                        || (candidate.confidence == *best_confidence
                            && result.chunk_index < *best_index);
                    if wins {
                        merged.insert(
                            field.clone(),
                            (result.chunk_index, candidate.confidence, candidate.value.clone()),
                        );
                    }
                }
                None => {
                    merged.insert(
                        field.clone(),
                        (result.chunk_index, candidate.confidence, candidate.value.clone()),
                    );
                }
            }
        }
    }

    merged
        .into_iter()
        .map(|(field, (_, _, value))| (field, value))
        .collect()
}

// ---------------------------------------------------------------------------
// Extraction driver
// ---------------------------------------------------------------------------

/// Extract `schema` fields from `document`, windowed and merged.
///
/// Returns the merged field map; empty when the document supports none of the
/// schema's fields. Fails only when every dispatched window fails.
pub async fn extract_document(
    port: Arc<dyn ExtractPort>,
    prompt_context: &str,
    document: &str,
    schema: &ExtractSchema,
    opts: &ExtractorOptions,
) -> Result<BTreeMap<String, serde_json::Value>> {
    let chunks = chunk_text(document, opts.chunk_size, opts.overlap_fraction);
    if chunks.is_empty() {
        return Ok(BTreeMap::new());
    }

    let total = chunks.len();
    debug!(windows = total, chunk_size = opts.chunk_size, "starting chunked extraction");

    let semaphore = Arc::new(Semaphore::new(opts.max_concurrent.max(1) as usize));
    let mut handles = Vec::with_capacity(total);

    for (index, chunk) in chunks.into_iter().enumerate() {
        // Respect the run deadline: stop dispatching, let in-flight drain.
        if let Some(deadline) = opts.deadline {
            if Instant::now() >= deadline {
                warn!(dispatched = index, total, "run deadline reached, skipping remaining windows");
                break;
            }
        }

        let port = Arc::clone(&port);
        let sem = Arc::clone(&semaphore);
        let context = prompt_context.to_string();
        let schema = schema.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("extractor semaphore closed");
            let outcome = port.extract(&context, &chunk, &schema).await;
            (index, outcome)
        }));
    }

    if handles.is_empty() {
        return Err(BattleCardError::Timeout(
            "run deadline reached before any extraction window was dispatched".into(),
        ));
    }

    let mut results: Vec<ChunkResult> = Vec::new();
    let mut failures = 0usize;
    let dispatched = handles.len();

    for handle in handles {
        match handle.await {
            Ok((index, Ok(mut result))) => {
                result.chunk_index = index;
                results.push(result);
            }
            Ok((index, Err(e))) => {
                // Localized failure: this window contributes no candidates.
                warn!(window = index, error = %e, "extraction window failed");
                failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "extraction task panicked");
                failures += 1;
            }
        }
    }

    if failures == dispatched {
        return Err(BattleCardError::Model(format!(
            "all {dispatched} extraction windows failed"
        )));
    }

    // Stable order before merge so logs are reproducible; merge itself is
    // order-independent.
    results.sort_by_key(|r| r.chunk_index);

    let merged = merge_results(&results);
    debug!(
        windows_ok = results.len(),
        windows_failed = failures,
        fields = merged.len(),
        "chunked extraction complete"
    );

    Ok(merged)
}
