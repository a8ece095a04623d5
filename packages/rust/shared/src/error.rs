//! Error types for BattleCard.
//!
//! Library crates use [`BattleCardError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every error maps to an [`ErrorKind`], which is what phase nodes report to
//! the workflow engine and what ends up in `RunState.errors`. The engine only
//! ever sees kinds; raw errors stay inside the phase that produced them.

use serde::{Deserialize, Serialize};

/// Top-level error type for all BattleCard operations.
#[derive(Debug, thiserror::Error)]
pub enum BattleCardError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error from a search or fetch port.
    #[error("network error: {0}")]
    Network(String),

    /// HTML/JSON parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// LLM port error (API failure, unusable response).
    #[error("model error: {0}")]
    Model(String),

    /// A port call or phase attempt exceeded its time budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Caller-supplied input that no amount of retrying will fix.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BattleCardError>;

impl BattleCardError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for retry policy and the run's error log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Model(_) | Self::Storage(_) => ErrorKind::Transient,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Parse { .. } | Self::Validation { .. } => ErrorKind::ExtractionAmbiguity,
            Self::InvalidInput { .. } | Self::Config { .. } | Self::Io { .. } => {
                ErrorKind::UnrecoverableInput
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse classification recorded in `RunState.errors` and used by phase
/// nodes to decide between `Retry` and `Abort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable service failure (network, rate limit, model hiccup).
    Transient,
    /// Input that retrying cannot fix; aborts the run immediately.
    UnrecoverableInput,
    /// The extractor could not settle on a value; field left absent.
    ExtractionAmbiguity,
    /// A time budget was exceeded; retryable up to the phase's attempt cap.
    Timeout,
}

impl ErrorKind {
    /// Whether a phase may retry after an error of this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::ExtractionAmbiguity)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::UnrecoverableInput => "unrecoverable_input",
            Self::ExtractionAmbiguity => "extraction_ambiguity",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BattleCardError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = BattleCardError::invalid_input("company name is empty");
        assert!(err.to_string().contains("company name is empty"));
    }

    #[test]
    fn kind_classification() {
        assert_eq!(
            BattleCardError::Network("503".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            BattleCardError::invalid_input("empty").kind(),
            ErrorKind::UnrecoverableInput
        );
        assert_eq!(
            BattleCardError::Timeout("fetch".into()).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            BattleCardError::parse("bad JSON").kind(),
            ErrorKind::ExtractionAmbiguity
        );
    }

    #[test]
    fn retryability() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::UnrecoverableInput.is_retryable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnrecoverableInput).unwrap();
        assert_eq!(json, r#""unrecoverable_input""#);
    }
}
