//! Caching strategies.
//!
//! | Strategy | Reads | Network | Writes |
//! |---|---|---|---|
//! | CacheFirst | first | on miss | on cacheable miss |
//! | StaleWhileRevalidate | first | always, concurrently | on cacheable response |
//! | NetworkFirst | on failure | first | on cacheable response |
//! | NetworkOnly | never | always | never |
//!
//! Writes run through the event's `wait_until` and never delay the response.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::error::{Result, ServiceWorkerError};
use crate::event::ExtendableEvent;
use crate::expiration::CacheExpiration;
use crate::fetch::Fetcher;
use crate::request::{Request, Response};

/// Which strategy a route runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CacheFirst,
    StaleWhileRevalidate,
    NetworkFirst,
    NetworkOnly,
}

/// Filter deciding which responses may be written to a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableResponse {
    statuses: Vec<u16>,
}

impl CacheableResponse {
    pub fn new(statuses: impl Into<Vec<u16>>) -> Self {
        Self {
            statuses: statuses.into(),
        }
    }

    /// Status 200 only.
    pub fn ok_only() -> Self {
        Self::new([200])
    }

    /// Status 200 and opaque (status 0) responses.
    pub fn ok_and_opaque() -> Self {
        Self::new([0, 200])
    }

    pub fn is_cacheable(&self, response: &Response) -> bool {
        !response.is_error() && self.statuses.contains(&response.status)
    }
}

/// Storage and network shared by every strategy of a worker.
#[derive(Clone)]
pub struct FetchContext {
    pub storage: CacheStorage,
    pub fetcher: Arc<dyn Fetcher>,
}

impl FetchContext {
    pub fn new(storage: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { storage, fetcher }
    }
}

/// A strategy bound to its cache, filter, and expiration policy.
#[derive(Debug, Clone)]
pub struct Strategy {
    kind: StrategyKind,
    cache_name: Option<String>,
    cacheable: CacheableResponse,
    expiration: Option<Arc<CacheExpiration>>,
}

impl Strategy {
    fn bound(kind: StrategyKind, cache_name: impl Into<String>, cacheable: CacheableResponse) -> Self {
        Self {
            kind,
            cache_name: Some(cache_name.into()),
            cacheable,
            expiration: None,
        }
    }

    /// Cache-first. Without an explicit filter only status 200 is cached.
    pub fn cache_first(cache_name: impl Into<String>) -> Self {
        Self::bound(StrategyKind::CacheFirst, cache_name, CacheableResponse::ok_only())
    }

    /// Stale-while-revalidate. Without an explicit filter, status 200 and
    /// opaque responses are cached.
    pub fn stale_while_revalidate(cache_name: impl Into<String>) -> Self {
        Self::bound(
            StrategyKind::StaleWhileRevalidate,
            cache_name,
            CacheableResponse::ok_and_opaque(),
        )
    }

    /// Network-first. Same default filter as stale-while-revalidate.
    pub fn network_first(cache_name: impl Into<String>) -> Self {
        Self::bound(
            StrategyKind::NetworkFirst,
            cache_name,
            CacheableResponse::ok_and_opaque(),
        )
    }

    pub fn network_only() -> Self {
        Self {
            kind: StrategyKind::NetworkOnly,
            cache_name: None,
            cacheable: CacheableResponse::new([]),
            expiration: None,
        }
    }

    pub fn with_cacheable(mut self, cacheable: CacheableResponse) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_expiration(mut self, expiration: Arc<CacheExpiration>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn cache_name(&self) -> Option<&str> {
        self.cache_name.as_deref()
    }

    /// Answer a request.
    pub async fn handle(
        &self,
        request: &Request,
        ctx: &FetchContext,
        event: &ExtendableEvent,
    ) -> Result<Response> {
        debug!(strategy = ?self.kind, url = %request.url, "Handling request");
        match self.kind {
            StrategyKind::CacheFirst => self.cache_first_handle(request, ctx, event).await,
            StrategyKind::StaleWhileRevalidate => self.swr_handle(request, ctx, event).await,
            StrategyKind::NetworkFirst => self.network_first_handle(request, ctx, event).await,
            StrategyKind::NetworkOnly => ctx.fetcher.fetch(request).await,
        }
    }

    async fn cache_first_handle(
        &self,
        request: &Request,
        ctx: &FetchContext,
        event: &ExtendableEvent,
    ) -> Result<Response> {
        let key = request.cache_key();
        if let Some(hit) = self.cache_match(ctx, &key).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(hit);
        }

        let response = ctx.fetcher.fetch(request).await?;
        if self.cacheable.is_cacheable(&response) {
            self.spawn_put(ctx, event, key, response.clone());
        }
        Ok(response)
    }

    async fn swr_handle(
        &self,
        request: &Request,
        ctx: &FetchContext,
        event: &ExtendableEvent,
    ) -> Result<Response> {
        let key = request.cache_key();

        let revalidate = {
            let this = self.clone();
            let ctx = ctx.clone();
            let event = event.clone();
            let request = request.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let response = ctx.fetcher.fetch(&request).await?;
                if this.cacheable.is_cacheable(&response) {
                    this.spawn_put(&ctx, &event, key, response.clone());
                }
                Ok::<_, ServiceWorkerError>(response)
            })
        };

        match self.cache_match(ctx, &key).await {
            Some(hit) => {
                debug!(url = %request.url, "Serving cached copy while revalidating");
                event.wait_until(async move {
                    match revalidate.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => debug!(error = %e, "Revalidation failed"),
                        Err(e) => warn!(error = %e, "Revalidation task failed"),
                    }
                });
                Ok(hit)
            }
            None => revalidate
                .await
                .map_err(|e| ServiceWorkerError::Network(e.to_string()))?,
        }
    }

    async fn network_first_handle(
        &self,
        request: &Request,
        ctx: &FetchContext,
        event: &ExtendableEvent,
    ) -> Result<Response> {
        let key = request.cache_key();

        match ctx.fetcher.fetch(request).await {
            Ok(response) if self.cacheable.is_cacheable(&response) => {
                self.spawn_put(ctx, event, key, response.clone());
                Ok(response)
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Response not cacheable, trying cache");
                Ok(self.cache_match(ctx, &key).await.unwrap_or(response))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                self.cache_match(ctx, &key).await.ok_or(e)
            }
        }
    }

    async fn cache_match(&self, ctx: &FetchContext, key: &str) -> Option<Response> {
        let cache = self.cache_name.as_deref()?;
        let hit = ctx.storage.match_request(cache, key).await?;

        if let Some(expiration) = &self.expiration {
            if !expiration.is_fresh(key).await {
                debug!(cache, key, "Cached entry expired");
                expiration.expire_entries().await;
                return None;
            }
        }
        Some(hit.into_cached())
    }

    fn spawn_put(&self, ctx: &FetchContext, event: &ExtendableEvent, key: String, response: Response) {
        let this = self.clone();
        let ctx = ctx.clone();
        event.wait_until(async move { this.cache_put(&ctx, key, response).await });
    }

    async fn cache_put(&self, ctx: &FetchContext, key: String, response: Response) {
        let Some(cache) = self.cache_name.as_deref() else {
            return;
        };

        match ctx.storage.put(cache, &key, response.clone()).await {
            Ok(()) => self.after_write(&key).await,
            Err(ServiceWorkerError::QuotaExceeded { .. }) if self.purges_on_quota_error() => {
                warn!(cache, "Storage quota exceeded, purging cache");
                if let Some(expiration) = &self.expiration {
                    expiration.delete_cache_and_metadata().await;
                }
                match ctx.storage.put(cache, &key, response).await {
                    Ok(()) => self.after_write(&key).await,
                    Err(e) => warn!(cache, key = %key, error = %e, "Cache write dropped after purge"),
                }
            }
            Err(e) => warn!(cache, key = %key, error = %e, "Cache write dropped"),
        }
    }

    async fn after_write(&self, key: &str) {
        if let Some(expiration) = &self.expiration {
            expiration.update_timestamp(key).await;
            expiration.expire_entries().await;
        }
    }

    fn purges_on_quota_error(&self) -> bool {
        self.expiration
            .as_ref()
            .map(|e| e.policy().purge_on_quota_error)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::ExpirationPolicy;
    use crate::testing::StubFetcher;
    use std::time::Duration;

    const URL: &str = "https://example.com/a.png";

    fn setup(storage: CacheStorage) -> (Arc<StubFetcher>, FetchContext) {
        let fetcher = Arc::new(StubFetcher::new());
        let ctx = FetchContext::new(storage, fetcher.clone());
        (fetcher, ctx)
    }

    async fn run(strategy: &Strategy, ctx: &FetchContext) -> Result<Response> {
        let event = ExtendableEvent::new();
        let request = Request::parse(URL).unwrap();
        let result = strategy.handle(&request, ctx, &event).await;
        event.settled().await;
        result
    }

    #[tokio::test]
    async fn test_cache_first_hits_network_once() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::ok("v1")).await;
        let strategy = Strategy::cache_first("images");

        let first = run(&strategy, &ctx).await.unwrap();
        assert!(!first.from_cache);

        fetcher.respond(URL, Response::ok("v2")).await;
        let second = run(&strategy, &ctx).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.text(), "v1");
        assert_eq!(fetcher.calls(URL).await, 1);
    }

    #[tokio::test]
    async fn test_cache_first_skips_uncacheable_status() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::new(404, "nope")).await;
        let strategy = Strategy::cache_first("images");

        let response = run(&strategy, &ctx).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(ctx.storage.len("images").await, 0);
    }

    #[tokio::test]
    async fn test_cache_first_caches_opaque_when_allowed() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::opaque()).await;
        let strategy =
            Strategy::cache_first("fonts").with_cacheable(CacheableResponse::ok_and_opaque());

        run(&strategy, &ctx).await.unwrap();
        assert_eq!(ctx.storage.len("fonts").await, 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cache_then_updates() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        ctx.storage.put("styles", URL, Response::ok("old")).await.unwrap();
        fetcher.respond(URL, Response::ok("new")).await;
        let strategy = Strategy::stale_while_revalidate("styles");

        let first = run(&strategy, &ctx).await.unwrap();
        assert_eq!(first.text(), "old");
        assert!(first.from_cache);

        let second = run(&strategy, &ctx).await.unwrap();
        assert_eq!(second.text(), "new");
        assert_eq!(fetcher.calls(URL).await, 2);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_miss_waits_for_network() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::ok("fresh")).await;
        let strategy = Strategy::stale_while_revalidate("styles");

        let response = run(&strategy, &ctx).await.unwrap();
        assert_eq!(response.text(), "fresh");
        assert!(!response.from_cache);
        assert_eq!(ctx.storage.len("styles").await, 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_offline_keeps_cache() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        ctx.storage.put("styles", URL, Response::ok("old")).await.unwrap();
        fetcher.set_offline(true);
        let strategy = Strategy::stale_while_revalidate("styles");

        assert_eq!(run(&strategy, &ctx).await.unwrap().text(), "old");
        assert_eq!(
            ctx.storage.match_request("styles", URL).await.unwrap().text(),
            "old"
        );
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::ok("online")).await;
        let strategy = Strategy::network_first("pages");

        assert_eq!(run(&strategy, &ctx).await.unwrap().text(), "online");

        fetcher.set_offline(true);
        let offline = run(&strategy, &ctx).await.unwrap();
        assert_eq!(offline.text(), "online");
        assert!(offline.from_cache);
    }

    #[tokio::test]
    async fn test_network_first_fails_with_empty_cache() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.set_offline(true);
        let strategy = Strategy::network_first("pages");

        let err = run(&strategy, &ctx).await.unwrap_err();
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn test_network_first_uncacheable_status_prefers_cache() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        ctx.storage.put("pages", URL, Response::ok("cached")).await.unwrap();
        fetcher.respond(URL, Response::new(500, "boom")).await;
        let strategy =
            Strategy::network_first("pages").with_cacheable(CacheableResponse::ok_only());

        assert_eq!(run(&strategy, &ctx).await.unwrap().text(), "cached");

        ctx.storage.delete("pages").await;
        assert_eq!(run(&strategy, &ctx).await.unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_network_only_never_touches_cache() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::ok("secret")).await;
        let strategy = Strategy::network_only();

        assert_eq!(run(&strategy, &ctx).await.unwrap().text(), "secret");
        assert!(ctx.storage.keys().await.is_empty());

        fetcher.set_offline(true);
        assert!(run(&strategy, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_quota_purge_and_retry() {
        let (fetcher, ctx) = setup(CacheStorage::with_quota(10));
        ctx.storage.put("docs", "https://example.com/old", Response::ok("12345678")).await.unwrap();
        fetcher.respond(URL, Response::ok("abcdefgh")).await;

        let expiration = Arc::new(CacheExpiration::new(
            "docs",
            ExpirationPolicy::documents(),
            ctx.storage.clone(),
        ));
        let strategy = Strategy::cache_first("docs").with_expiration(expiration);

        run(&strategy, &ctx).await.unwrap();
        assert_eq!(ctx.storage.entry_keys("docs").await, vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn test_quota_without_purge_drops_write() {
        let (fetcher, ctx) = setup(CacheStorage::with_quota(10));
        ctx.storage.put("images", "https://example.com/old", Response::ok("12345678")).await.unwrap();
        fetcher.respond(URL, Response::ok("abcdefgh")).await;

        let expiration = Arc::new(CacheExpiration::new(
            "images",
            ExpirationPolicy::images(),
            ctx.storage.clone(),
        ));
        let strategy = Strategy::cache_first("images").with_expiration(expiration);

        let response = run(&strategy, &ctx).await.unwrap();
        assert_eq!(response.text(), "abcdefgh");
        assert_eq!(
            ctx.storage.entry_keys("images").await,
            vec!["https://example.com/old".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_first_ignores_expired_entry() {
        let (fetcher, ctx) = setup(CacheStorage::new());
        fetcher.respond(URL, Response::ok("v1")).await;
        let policy = ExpirationPolicy {
            max_age_seconds: Some(60),
            ..ExpirationPolicy::google_font()
        };
        let expiration = Arc::new(CacheExpiration::new("fonts", policy, ctx.storage.clone()));
        let strategy = Strategy::cache_first("fonts").with_expiration(expiration);

        assert!(!run(&strategy, &ctx).await.unwrap().from_cache);

        tokio::time::advance(Duration::from_secs(30)).await;
        let within = run(&strategy, &ctx).await.unwrap();
        assert!(within.from_cache);
        assert_eq!(fetcher.calls(URL).await, 1);

        fetcher.respond(URL, Response::ok("v2")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let expired = run(&strategy, &ctx).await.unwrap();
        assert!(!expired.from_cache);
        assert_eq!(expired.text(), "v2");
        assert_eq!(fetcher.calls(URL).await, 2);
        assert_eq!(ctx.storage.match_request("fonts", URL).await.unwrap().text(), "v2");
    }
}
