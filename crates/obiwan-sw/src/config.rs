//! Worker configuration

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::Result;
use crate::expiration::ExpirationPolicy;
use crate::message::ReplyTarget;
use crate::precache::PrecacheEntry;
use crate::registry::{CacheRegistry, CacheRole};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// First segment of every cache name
    pub cache_prefix: String,

    /// Last segment of every cache name; bump to bust all caches
    pub cache_version: String,

    /// Origin and path the worker controls
    pub scope: String,

    /// Path the application is served under
    pub document_root: String,

    /// Offline page. Not served by the catch handler.
    pub offline_page: String,

    /// Static font CDN origin
    pub font_asset_origin: String,

    /// Font stylesheet API origin
    pub font_stylesheet_origin: String,

    /// Requests under this path are never cached
    pub auth_path_prefix: String,

    /// Expiration policy per cache role
    pub expiration: HashMap<CacheRole, ExpirationPolicy>,

    /// Replies to GET_GREETING
    pub greetings: Vec<String>,

    /// Which client receives replies
    pub reply_target: ReplyTarget,

    /// Precached app shell answering navigations, if any
    pub navigation_fallback: Option<String>,

    /// Precache manifest
    pub precache: Vec<PrecacheEntry>,

    /// Storage quota in bytes (unbounded when unset)
    pub quota_bytes: Option<usize>,

    /// Period of the background expiration sweep; off when unset
    pub sweep_interval_seconds: Option<u64>,

    /// Verbose install logging. Unset means on when the scope is localhost.
    pub debug: Option<bool>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut expiration = HashMap::new();
        expiration.insert(CacheRole::Documents, ExpirationPolicy::documents());
        expiration.insert(CacheRole::Images, ExpirationPolicy::images());
        expiration.insert(CacheRole::GoogleFont, ExpirationPolicy::google_font());

        Self {
            cache_prefix: "obi-wan".to_string(),
            cache_version: "v1".to_string(),
            scope: "http://localhost/".to_string(),
            document_root: "/".to_string(),
            offline_page: "/offline.html".to_string(),
            font_asset_origin: "https://fonts.gstatic.com".to_string(),
            font_stylesheet_origin: "https://fonts.googleapis.com".to_string(),
            auth_path_prefix: "/auth/".to_string(),
            expiration,
            greetings: [
                "How was your day?",
                "You look awesome today!",
                "Be nice to your bro",
                "Pay your bills",
                "Have a glass of beer",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            reply_target: ReplyTarget::default(),
            navigation_fallback: None,
            precache: Vec::new(),
            quota_bytes: None,
            sweep_interval_seconds: Some(60 * 60),
            debug: None,
        }
    }
}

impl WorkerConfig {
    /// Settings for the deployment served under `/mina/sw/`.
    ///
    /// Debug logging stays off even when `scope` is pointed at localhost.
    pub fn production() -> Self {
        let document_root = "/mina/sw/";
        let shell = format!("{document_root}index.html");
        Self {
            document_root: document_root.to_string(),
            offline_page: format!("{document_root}offline.html"),
            precache: vec![PrecacheEntry::new(shell.clone(), None)],
            navigation_fallback: Some(shell),
            debug: Some(false),
            ..Default::default()
        }
    }

    /// Load from a JSON file; defaults when `path` is `None` and
    /// `OBIWAN_CONFIG` is unset.
    pub fn load(path: Option<&Path>) -> obiwan_common::Result<Self> {
        obiwan_common::load_json(path)
    }

    pub fn registry(&self) -> CacheRegistry {
        CacheRegistry::new(&self.cache_prefix, &self.cache_version)
    }

    pub fn scope_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.scope)?)
    }

    /// Resolve a possibly relative URL against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        Ok(self.scope_url()?.join(url)?)
    }

    /// Debug logging as configured, else whether the scope is localhost.
    pub fn is_debug(&self) -> bool {
        self.debug.unwrap_or_else(|| {
            self.scope_url()
                .map(|u| u.host_str() == Some("localhost"))
                .unwrap_or(false)
        })
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_seconds
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
