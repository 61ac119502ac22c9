//! Tracing setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Unless a filter
//! says otherwise, the HTTP client stack is held at `warn` so that worker
//! events stay readable at `-vv`.

use serde::Deserialize;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{ObiwanError, Result};

/// Crates whose debug output drowns the worker's own.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line of each event.
    pub source_location: bool,
    /// Log when spans open and close.
    pub span_events: bool,
    /// Replaces the level and quiet targets, e.g. `"obiwan_sw=trace"`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            source_location: false,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// `-v` count from the shell: none is info, one is debug, more is trace
    /// with spans.
    pub fn from_verbosity(verbose: u8) -> Self {
        let level = match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            source_location: verbose > 0,
            span_events: verbose > 1,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let mut directives = self.level.as_str().to_lowercase();
        for target in QUIET_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
        directives
    }

    fn env_filter(&self) -> EnvFilter {
        if self.filter.is_none() {
            if let Ok(from_env) = EnvFilter::try_from_default_env() {
                return from_env;
            }
        }
        EnvFilter::try_new(self.directives())
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }

    fn output_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        match self.format {
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_file(self.source_location)
                .with_line_number(self.source_location)
                .with_span_events(spans)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_file(self.source_location)
                .with_line_number(self.source_location)
                .with_span_events(spans)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(spans)
                .boxed(),
        }
    }
}

/// Install the global subscriber. A second call returns a config error.
pub fn init_logging(config: LogConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(config.output_layer().with_filter(config.env_filter()))
        .try_init()
        .map_err(|e| ObiwanError::config_with_source("logging already initialized", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity() {
        let quiet = LogConfig::from_verbosity(0);
        assert_eq!(quiet.level, Level::INFO);
        assert!(!quiet.source_location);

        let debug = LogConfig::from_verbosity(1);
        assert_eq!(debug.level, Level::DEBUG);
        assert!(debug.source_location);
        assert!(!debug.span_events);

        let trace = LogConfig::from_verbosity(4);
        assert_eq!(trace.level, Level::TRACE);
        assert!(trace.span_events);
    }

    #[test]
    fn test_directives_quiet_http_stack() {
        let directives = LogConfig::from_verbosity(1).directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_filter_replaces_directives() {
        let config = LogConfig::default()
            .with_filter("obiwan_sw=trace")
            .with_format(LogFormat::Json);
        assert_eq!(config.directives(), "obiwan_sw=trace");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(LogConfig::default().with_format(LogFormat::Compact));
        let err = init_logging(LogConfig::default()).unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
