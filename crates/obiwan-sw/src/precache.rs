//! Precaching: manifest URLs fetched at install and served cache-first.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::error::{Result, ServiceWorkerError};
use crate::registry::CacheRegistry;
use crate::request::{Request, Response};
use crate::strategy::FetchContext;

const REVISION_PARAM: &str = "__revision";

/// One manifest entry. Entries without a revision are expected to carry a
/// content hash in the URL itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,
    #[serde(default)]
    pub revision: Option<String>,
}

impl PrecacheEntry {
    pub fn new(url: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            url: url.into(),
            revision: revision.map(str::to_string),
        }
    }
}

/// Resolved manifest bound to the precache cache.
#[derive(Debug, Clone)]
pub struct Precache {
    cache_name: String,
    /// Request URL (no fragment) → cache key.
    keys: HashMap<String, String>,
    urls: Vec<Url>,
}

impl Precache {
    /// Resolve manifest URLs against the worker scope.
    pub fn new(cache_name: impl Into<String>, scope: &Url, manifest: &[PrecacheEntry]) -> Result<Self> {
        let mut keys = HashMap::new();
        let mut urls = Vec::with_capacity(manifest.len());

        for entry in manifest {
            let mut url = scope.join(&entry.url)?;
            url.set_fragment(None);

            let mut key = url.clone();
            if let Some(revision) = &entry.revision {
                key.query_pairs_mut().append_pair(REVISION_PARAM, revision);
            }
            keys.insert(url.to_string(), key.to_string());
            urls.push(url);
        }

        Ok(Self {
            cache_name: cache_name.into(),
            keys,
            urls,
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// Cache key for a precached URL.
    pub fn cache_key_for(&self, url: &Url) -> Option<&str> {
        let mut url = url.clone();
        url.set_fragment(None);
        self.keys.get(url.as_str()).map(String::as_str)
    }

    /// Fetch and store every entry not already cached under its key.
    /// Any failure fails the whole install.
    pub async fn install(&self, ctx: &FetchContext) -> Result<usize> {
        let mut stored = 0;
        for url in &self.urls {
            let key = self
                .cache_key_for(url)
                .ok_or_else(|| ServiceWorkerError::InstallFailed(url.to_string()))?;
            if ctx.storage.match_request(&self.cache_name, key).await.is_some() {
                debug!(%url, "Already precached");
                continue;
            }

            let response = ctx
                .fetcher
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed(format!("{url}: {e}")))?;
            if response.status != 200 {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{url}: status {}",
                    response.status
                )));
            }
            ctx.storage.put(&self.cache_name, key, response).await?;
            stored += 1;
        }
        info!(cache = %self.cache_name, stored, total = self.urls.len(), "Precache installed");
        Ok(stored)
    }

    /// Serve a precached URL.
    pub async fn match_url(&self, storage: &CacheStorage, url: &Url) -> Option<Response> {
        let key = self.cache_key_for(url)?;
        storage
            .match_request(&self.cache_name, key)
            .await
            .map(Response::into_cached)
    }
}

/// Delete precache caches left by other versions. Returns their names.
pub async fn cleanup_outdated_caches(storage: &CacheStorage, registry: &CacheRegistry) -> Vec<String> {
    let mut deleted = Vec::new();
    for name in storage.keys().await {
        if registry.is_outdated_precache(&name) && storage.delete(&name).await {
            info!(cache = %name, "Deleted outdated precache");
            deleted.push(name);
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubFetcher;
    use std::sync::Arc;

    fn scope() -> Url {
        Url::parse("https://app.example/mina/sw/").unwrap()
    }

    #[test]
    fn test_keys_carry_revision() {
        let precache = Precache::new(
            "p",
            &scope(),
            &[
                PrecacheEntry::new("index.html", Some("abc")),
                PrecacheEntry::new("/mina/sw/app.1f2e.js", None),
            ],
        )
        .unwrap();

        let index = Url::parse("https://app.example/mina/sw/index.html#top").unwrap();
        assert_eq!(
            precache.cache_key_for(&index),
            Some("https://app.example/mina/sw/index.html?__revision=abc")
        );
        let app = Url::parse("https://app.example/mina/sw/app.1f2e.js").unwrap();
        assert_eq!(precache.cache_key_for(&app), Some(app.as_str()));
        assert_eq!(precache.len(), 2);
    }

    #[tokio::test]
    async fn test_install_and_match() {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher
            .respond("https://app.example/mina/sw/index.html", Response::ok("<html>"))
            .await;
        let ctx = FetchContext::new(CacheStorage::new(), fetcher.clone());
        let precache = Precache::new(
            "p",
            &scope(),
            &[PrecacheEntry::new("index.html", Some("1"))],
        )
        .unwrap();

        assert_eq!(precache.install(&ctx).await.unwrap(), 1);
        // Second install finds it cached.
        assert_eq!(precache.install(&ctx).await.unwrap(), 0);
        assert_eq!(fetcher.total_calls().await, 1);

        let url = Url::parse("https://app.example/mina/sw/index.html").unwrap();
        let hit = precache.match_url(&ctx.storage, &url).await.unwrap();
        assert_eq!(hit.text(), "<html>");
        assert!(hit.from_cache);
    }

    #[tokio::test]
    async fn test_install_fails_on_missing_entry() {
        let ctx = FetchContext::new(CacheStorage::new(), Arc::new(StubFetcher::offline()));
        let precache =
            Precache::new("p", &scope(), &[PrecacheEntry::new("index.html", None)]).unwrap();

        let err = precache.install(&ctx).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed(_)));
    }

    #[tokio::test]
    async fn test_cleanup_outdated() {
        let storage = CacheStorage::new();
        let old = CacheRegistry::new("obi-wan", "v1");
        let new = CacheRegistry::new("obi-wan", "v2");
        storage.open(&old.precache_name()).await;
        storage.open(&new.precache_name()).await;
        storage.open(&old.name(crate::registry::CacheRole::Images)).await;

        let deleted = cleanup_outdated_caches(&storage, &new).await;
        assert_eq!(deleted, vec!["obi-wan-precache-v1".to_string()]);
        assert!(storage.has("obi-wan-precache-v2").await);
        assert!(storage.has("obi-wan-images-v1").await);
    }
}
