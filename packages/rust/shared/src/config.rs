//! Application configuration for BattleCard.
//!
//! User config lives at `~/.battlecard/battlecard.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BattleCardError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "battlecard.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".battlecard";

// ---------------------------------------------------------------------------
// Config structs (matching battlecard.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default output directory for rendered battle cards.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum concurrent sub-calls within a single phase (chunk extraction,
    /// parallel page probes).
    #[serde(default = "default_max_concurrent_subcalls")]
    pub max_concurrent_subcalls: u32,

    /// Run-level timeout in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Window size in characters for chunked extraction.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Fractional overlap between adjacent windows, in [0, 1).
    #[serde(default = "default_chunk_overlap_fraction")]
    pub chunk_overlap_fraction: f64,

    /// Minimum ms between outbound requests (shared across runs).
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_subcalls: default_max_concurrent_subcalls(),
            run_timeout_secs: default_run_timeout_secs(),
            chunk_size: default_chunk_size(),
            chunk_overlap_fraction: default_chunk_overlap_fraction(),
            rate_limit_ms: default_rate_limit(),
        }
    }
}

fn default_output_dir() -> String {
    "~/battlecards".into()
}
fn default_max_concurrent_subcalls() -> u32 {
    4
}
fn default_run_timeout_secs() -> u64 {
    300
}
fn default_chunk_size() -> u32 {
    1000
}
fn default_chunk_overlap_fraction() -> f64 {
    0.1
}
fn default_rate_limit() -> u64 {
    200
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for extraction and synthesis.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "meta-llama/llama-3.1-8b-instruct".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime run configuration — merged from config file + CLI flags.
///
/// These are exactly the knobs a single pipeline run recognizes.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum concurrent sub-calls within a phase.
    pub max_concurrent_subcalls: u32,
    /// Run-level timeout; checked at the top of each phase attempt.
    pub run_timeout: Duration,
    /// Window size in characters for chunked extraction.
    pub chunk_size: usize,
    /// Fractional overlap between adjacent windows, in [0, 1).
    pub chunk_overlap_fraction: f64,
}

impl RunConfig {
    /// Clamp values into their valid ranges. A config file with
    /// `chunk_overlap_fraction = 1.0` would otherwise make windowing
    /// non-advancing.
    pub fn sanitized(mut self) -> Self {
        if !(0.0..1.0).contains(&self.chunk_overlap_fraction) {
            self.chunk_overlap_fraction = self.chunk_overlap_fraction.clamp(0.0, 0.9);
        }
        self.chunk_size = self.chunk_size.max(1);
        self.max_concurrent_subcalls = self.max_concurrent_subcalls.max(1);
        self
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrent_subcalls: config.defaults.max_concurrent_subcalls,
            run_timeout: Duration::from_secs(config.defaults.run_timeout_secs),
            chunk_size: config.defaults.chunk_size as usize,
            chunk_overlap_fraction: config.defaults.chunk_overlap_fraction,
        }
        .sanitized()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.battlecard/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BattleCardError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.battlecard/battlecard.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BattleCardError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BattleCardError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BattleCardError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BattleCardError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BattleCardError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(BattleCardError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.chunk_size, 1000);
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn run_config_from_app_config() {
        let app = AppConfig::default();
        let run = RunConfig::from(&app);
        assert_eq!(run.max_concurrent_subcalls, 4);
        assert_eq!(run.chunk_size, 1000);
        assert!((run.chunk_overlap_fraction - 0.1).abs() < f64::EPSILON);
        assert_eq!(run.run_timeout, Duration::from_secs(300));
    }

    #[test]
    fn run_config_sanitizes_out_of_range_overlap() {
        let run = RunConfig {
            max_concurrent_subcalls: 0,
            run_timeout: Duration::from_secs(10),
            chunk_size: 0,
            chunk_overlap_fraction: 1.5,
        }
        .sanitized();
        assert!(run.chunk_overlap_fraction < 1.0);
        assert_eq!(run.chunk_size, 1);
        assert_eq!(run.max_concurrent_subcalls, 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
chunk_size = 2000
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.chunk_size, 2000);
        assert_eq!(config.defaults.max_concurrent_subcalls, 4);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "BC_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
