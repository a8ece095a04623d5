//! Shared types, error model, and configuration for BattleCard.
//!
//! This crate is the foundation depended on by all other BattleCard crates.
//! It provides:
//! - [`BattleCardError`] — the unified error type, with [`ErrorKind`] classification
//! - Domain types ([`RunState`], [`PricingRecord`], [`NewsItem`], [`Phase`], [`RunId`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OpenRouterConfig, RunConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{BattleCardError, ErrorKind, Result};
pub use types::{
    ErrorEntry, NewsItem, Phase, PhaseRecord, PhaseResolution, PricingPlan, PricingRecord, RunId,
    RunState, RunStatus,
};
