//! Bulk batch driver: many companies, bounded concurrency, shared throttle.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use battlecard_engine::SilentProgress;
use battlecard_shared::RunStatus;
use battlecard_storage::Storage;

use crate::pipeline::{run_pipeline, PipelineOptions, PipelinePorts};

/// Outcome of one company within a batch.
#[derive(Debug)]
pub struct CompanyOutcome {
    pub company: String,
    pub status: RunStatus,
    pub artifact_path: Option<String>,
    /// First error message for failed runs, for the batch summary.
    pub error: Option<String>,
}

/// Outcomes for the whole batch, in input order.
#[derive(Debug)]
pub struct BulkReport {
    pub outcomes: Vec<CompanyOutcome>,
}

impl BulkReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == RunStatus::Complete)
            .count()
    }

    pub fn failed_companies(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RunStatus::Failed)
            .map(|o| o.company.as_str())
            .collect()
    }
}

/// Run the pipeline for every company, at most `concurrency` runs in
/// parallel. All runs share the same ports, so the outbound rate limit
/// holds across the whole batch, not per run.
#[instrument(skip_all, fields(companies = companies.len(), concurrency = concurrency))]
pub async fn run_bulk(
    companies: Vec<String>,
    concurrency: u32,
    ports: PipelinePorts,
    options: PipelineOptions,
    storage: Option<Arc<Storage>>,
) -> BulkReport {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1) as usize));
    let mut handles = Vec::with_capacity(companies.len());

    for company in companies {
        let sem = Arc::clone(&semaphore);
        let ports = ports.clone();
        let options = options.clone();
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("bulk semaphore closed");
            info!(%company, "starting batch run");
            match run_pipeline(&company, &ports, &options, &SilentProgress, storage).await {
                Ok(report) => CompanyOutcome {
                    company,
                    status: report.status,
                    artifact_path: report.state.artifact_path.clone(),
                    error: report.state.errors.first().map(|e| e.message.clone()),
                },
                Err(e) => {
                    warn!(%company, error = %e, "batch run could not start");
                    CompanyOutcome {
                        company,
                        status: RunStatus::Failed,
                        artifact_path: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!(error = %e, "batch run task panicked"),
        }
    }

    BulkReport { outcomes }
}
