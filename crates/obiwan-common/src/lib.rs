//! # Obi-Wan Common
//!
//! Error types, logging setup, and configuration loading shared by the
//! Obi-Wan worker, the page bridge, and the shell.
//!
//! ## Features
//!
//! - Unified error type with source chaining
//! - Logging configuration and setup
//! - JSON configuration files with defaults

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::load_json;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for Obi-Wan.
#[derive(Error, Debug)]
pub enum ObiwanError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file named explicitly does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ObiwanError {
    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Short label for the `category` log field.
    pub fn category(&self) -> &'static str {
        match self {
            ObiwanError::Config { .. } => "config",
            ObiwanError::Json(_) => "json",
            ObiwanError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for Obi-Wan operations.
pub type Result<T> = std::result::Result<T, ObiwanError>;
