//! Error types for the risk engine.

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, RiskError>;

/// Errors surfaced to callers of the engine.
///
/// Signal-level failures never show up here: collectors fold them into an
/// invalid [`SignalScore`](crate::signal::SignalScore) instead.
#[derive(Error, Debug)]
pub enum RiskError {
    /// The process is not correctly configured. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request itself is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A route sample was lost before it was scored.
    #[error("route scoring interrupted: {0}")]
    Interrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RiskError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the error is the caller's fault rather than the process's.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// Failure of an external signal source (POI lookup, event corpus).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned HTTP {0}")]
    Status(u16),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}
