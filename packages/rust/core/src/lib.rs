//! Run controller: wires config, ports, phases, and engine into the
//! end-to-end battle-card pipeline, for single runs and bulk batches.

pub mod bulk;
pub mod pipeline;

pub use bulk::{run_bulk, BulkReport, CompanyOutcome};
pub use pipeline::{
    build_engine, run_pipeline, PipelineOptions, PipelinePorts, PipelineReport,
};
