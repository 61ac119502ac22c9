//! JSON configuration loading.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{ObiwanError, Result};

/// Environment variable naming a configuration file when no path is given.
pub const CONFIG_ENV: &str = "OBIWAN_CONFIG";

/// Load a JSON configuration file.
///
/// With no explicit path, falls back to the file named by `OBIWAN_CONFIG`,
/// and to `T::default()` when neither is present. Fields missing from the
/// file take their defaults when `T` is `#[serde(default)]`.
pub fn load_json<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let from_env = std::env::var_os(CONFIG_ENV);
    let path = match path {
        Some(p) => p,
        None => match from_env.as_deref() {
            Some(p) => Path::new(p),
            None => {
                debug!("No configuration file given, using defaults");
                return Ok(T::default());
            }
        },
    };

    debug!(path = %path.display(), "Loading configuration");
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ObiwanError::NotFound(path.display().to_string()),
        _ => ObiwanError::config_with_source(format!("cannot read {}", path.display()), e),
    })?;
    parse_json(&raw)
}

/// Parse configuration from a JSON string.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(ObiwanError::from)
}
