//! Error types for worker operations.

use thiserror::Error;

/// Errors that can occur in worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Quota exceeded writing to cache {cache}")]
    QuotaExceeded { cache: String },

    #[error("State error: {0}")]
    State(String),

    #[error("No response available for {url}")]
    NoResponse { url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Worker runtime closed")]
    Closed,
}

impl ServiceWorkerError {
    /// Whether a strategy may fall back to the cache after this error.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::Network(_) | Self::NoResponse { .. })
    }
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
