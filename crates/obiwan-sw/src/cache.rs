//! Named response caches.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (by name)
//!             └── cache key → Response
//! ```
//!
//! Each operation is atomic per key. Nothing orders two writers racing on
//! the same key: the last to finish wins.

use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{Result, ServiceWorkerError};
use crate::request::Response;

/// A single named cache.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, Response>,
    bytes: usize,
}

impl Cache {
    fn put(&mut self, key: &str, response: Response) -> usize {
        let size = response.size();
        let old = self
            .entries
            .insert(key.to_string(), response)
            .map(|r| r.size())
            .unwrap_or(0);
        self.bytes = self.bytes + size - old;
        old
    }

    fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.bytes -= old.size();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    caches: HashMap<String, Cache>,
}

impl Inner {
    fn usage(&self) -> usize {
        self.caches.values().map(|c| c.bytes).sum()
    }
}

/// Cache storage shared by every handler of a worker.
///
/// Cloning yields another handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    inner: Arc<RwLock<Inner>>,
    quota: Option<usize>,
}

impl CacheStorage {
    /// Create unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that rejects writes beyond `bytes` in total.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            inner: Arc::default(),
            quota: Some(bytes),
        }
    }

    /// Open a cache, creating it if needed.
    pub async fn open(&self, name: &str) {
        self.inner
            .write()
            .await
            .caches
            .entry(name.to_string())
            .or_default();
    }

    /// Check if a cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.caches.contains_key(name)
    }

    /// Delete a cache and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.inner.write().await.caches.remove(name).is_some();
        trace!(cache = name, removed, "Cache deleted");
        removed
    }

    /// Names of every cache.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().await.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a response in one cache.
    pub async fn match_request(&self, name: &str, key: &str) -> Option<Response> {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .and_then(|c| c.entries.get(key))
            .cloned()
    }

    /// Store a response, creating the cache if needed.
    pub async fn put(&self, name: &str, key: &str, response: Response) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(quota) = self.quota {
            let replaced = inner
                .caches
                .get(name)
                .and_then(|c| c.entries.get(key))
                .map(|r| r.size())
                .unwrap_or(0);
            if inner.usage() - replaced + response.size() > quota {
                return Err(ServiceWorkerError::QuotaExceeded {
                    cache: name.to_string(),
                });
            }
        }

        inner.caches.entry(name.to_string()).or_default().put(key, response);
        trace!(cache = name, key, "Cache put");
        Ok(())
    }

    /// Remove one entry.
    pub async fn delete_entry(&self, name: &str, key: &str) -> bool {
        self.inner
            .write()
            .await
            .caches
            .get_mut(name)
            .map(|c| c.delete(key))
            .unwrap_or(false)
    }

    /// Keys stored in a cache.
    pub async fn entry_keys(&self, name: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries in a cache (0 if it does not exist).
    pub async fn len(&self, name: &str) -> usize {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .map(|c| c.entries.len())
            .unwrap_or(0)
    }

    /// Bytes used across all caches.
    pub async fn usage(&self) -> usize {
        self.inner.read().await.usage()
    }
}
