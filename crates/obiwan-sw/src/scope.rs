//! The worker global scope: everything one worker version owns.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::event::ExtendableEvent;
use crate::expiration::Expirations;
use crate::fetch::Fetcher;
use crate::lifecycle::ServiceWorker;
use crate::message::Greetings;
use crate::precache::Precache;
use crate::registry::{CacheRegistry, CacheRole};
use crate::request::{Request, Response};
use crate::routing::{RouteKind, Router};
use crate::strategy::FetchContext;

/// How the worker disposed of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDisposition {
    /// The worker answered.
    Respond {
        response: Response,
        /// Route that answered; `None` for precache hits.
        route: Option<RouteKind>,
    },
    /// Not intercepted; the request goes to the network untouched.
    Passthrough,
}

/// Result of a fetch event.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub disposition: FetchDisposition,
    /// Background work (cache writes, revalidation) started by the handler.
    pub event: ExtendableEvent,
}

/// State of one named cache, for status pages.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatus {
    pub role: CacheRole,
    pub name: String,
    pub exists: bool,
    pub entries: usize,
}

/// Worker global scope.
pub struct ServiceWorkerGlobalScope {
    config: WorkerConfig,
    registry: CacheRegistry,
    ctx: FetchContext,
    expirations: Expirations,
    router: Router,
    precache: Option<Precache>,
    greetings: Greetings,
    worker: RwLock<ServiceWorker>,
    clients: RwLock<Clients>,
}

impl ServiceWorkerGlobalScope {
    /// Build a worker from its configuration and network substrate.
    pub fn new(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let storage = match config.quota_bytes {
            Some(quota) => CacheStorage::with_quota(quota),
            None => CacheStorage::new(),
        };
        Self::with_storage(config, fetcher, storage)
    }

    /// Build a worker over existing storage, e.g. the storage a previous
    /// version used.
    pub fn with_storage(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: CacheStorage,
    ) -> Result<Self> {
        let registry = config.registry();
        let expirations = Expirations::new(&config.expiration, &registry, &storage);
        let router = Router::standard(&config, &registry, &expirations);

        // The navigation fallback is only served once it is precached.
        let precache = if config.precache.is_empty() {
            None
        } else {
            Some(Precache::new(
                registry.precache_name(),
                &config.scope_url()?,
                &config.precache,
            )?)
        };

        let greetings = Greetings::new(config.greetings.clone());
        let worker = ServiceWorker::new(config.cache_version.clone());

        Ok(Self {
            registry,
            ctx: FetchContext::new(storage, fetcher),
            expirations,
            router,
            precache,
            greetings,
            worker: RwLock::new(worker),
            clients: RwLock::new(Clients::new()),
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.ctx.storage
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn expirations(&self) -> &Expirations {
        &self.expirations
    }

    pub(crate) fn fetch_context(&self) -> &FetchContext {
        &self.ctx
    }

    pub(crate) fn precache(&self) -> Option<&Precache> {
        self.precache.as_ref()
    }

    pub(crate) fn greetings(&self) -> &Greetings {
        &self.greetings
    }

    pub(crate) fn worker(&self) -> &RwLock<ServiceWorker> {
        &self.worker
    }

    pub fn clients(&self) -> &RwLock<Clients> {
        &self.clients
    }

    /// Handle a fetch event.
    ///
    /// Order: precached URLs, the navigation fallback, then the route
    /// table. A route whose strategy fails is answered with a network
    /// error; the offline page is deliberately not served.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        let event = ExtendableEvent::new();

        if !self.state().await.can_intercept_fetch() {
            return FetchOutcome {
                disposition: FetchDisposition::Passthrough,
                event,
            };
        }

        if let Some(response) = self.match_precache(request).await {
            debug!(url = %request.url, "Served from precache");
            return FetchOutcome {
                disposition: FetchDisposition::Respond {
                    response,
                    route: None,
                },
                event,
            };
        }

        let disposition = match self.router.classify(request) {
            Some(route) => {
                let response = match route.strategy.handle(request, &self.ctx, &event).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(url = %request.url, route = %route.kind, error = %e, "Route failed");
                        Response::network_error()
                    }
                };
                FetchDisposition::Respond {
                    response,
                    route: Some(route.kind),
                }
            }
            None => FetchDisposition::Passthrough,
        };

        FetchOutcome { disposition, event }
    }

    /// Answer a request the way a page sees it: through the worker, or
    /// straight from the network when not intercepted.
    pub async fn respond_to(&self, request: &Request) -> (Response, ExtendableEvent) {
        let outcome = self.handle_fetch(request).await;
        let response = match outcome.disposition {
            FetchDisposition::Respond { response, .. } => response,
            FetchDisposition::Passthrough => match self.ctx.fetcher.fetch(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Passthrough fetch failed");
                    Response::network_error()
                }
            },
        };
        (response, outcome.event)
    }

    async fn match_precache(&self, request: &Request) -> Option<Response> {
        let precache = self.precache.as_ref()?;
        if request.method != http::Method::GET {
            return None;
        }
        if let Some(hit) = precache.match_url(self.storage(), &request.url).await {
            return Some(hit);
        }
        if request.is_navigation() {
            let shell = self.config.navigation_fallback.as_deref()?;
            let shell_url = self.config.resolve(shell).ok()?;
            return precache.match_url(self.storage(), &shell_url).await;
        }
        None
    }

    /// Delete a role's cache and its expiration metadata.
    pub async fn clear_role(&self, role: CacheRole) -> bool {
        match self.expirations.get(role) {
            Some(expiration) => expiration.delete_cache_and_metadata().await,
            None => self.storage().delete(&self.registry.name(role)).await,
        }
    }

    /// Delete caches carrying our prefix that this version does not use.
    pub async fn purge_orphaned_caches(&self) -> Vec<String> {
        let mut purged = Vec::new();
        for name in self.storage().keys().await {
            if self.registry.is_orphaned(&name) && self.storage().delete(&name).await {
                info!(cache = %name, "Purged orphaned cache");
                purged.push(name);
            }
        }
        purged
    }

    /// Evict expired entries from every policy-bound cache.
    pub async fn sweep_expired(&self) -> usize {
        self.expirations.sweep().await
    }

    /// Status of every role's cache, including the unknown role.
    pub async fn cache_report(&self) -> Vec<CacheStatus> {
        let mut report = Vec::with_capacity(CacheRole::ALL.len());
        for role in CacheRole::ALL {
            let name = self.registry.name(role);
            report.push(CacheStatus {
                role,
                exists: self.storage().has(&name).await,
                entries: self.storage().len(&name).await,
                name,
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ServiceWorkerState;
    use crate::precache::PrecacheEntry;
    use crate::request::Destination;
    use crate::testing::StubFetcher;

    async fn active_scope(config: WorkerConfig) -> (ServiceWorkerGlobalScope, Arc<StubFetcher>) {
        let fetcher = Arc::new(StubFetcher::new());
        for entry in &config.precache {
            let url = config.resolve(&entry.url).unwrap();
            fetcher.respond(url.as_str(), Response::ok("<shell>")).await;
        }
        let scope = ServiceWorkerGlobalScope::new(config, fetcher.clone()).unwrap();
        scope.install().await.unwrap();
        scope.activate().await.unwrap();
        (scope, fetcher)
    }

    #[tokio::test]
    async fn test_not_intercepted_before_activation() {
        let fetcher = Arc::new(StubFetcher::new());
        let scope = ServiceWorkerGlobalScope::new(WorkerConfig::default(), fetcher).unwrap();
        scope.install().await.unwrap();
        assert_eq!(scope.state().await, ServiceWorkerState::Installed);

        let request = Request::parse("http://localhost/logo.png")
            .unwrap()
            .with_destination(Destination::Image);
        let outcome = scope.handle_fetch(&request).await;
        assert_eq!(outcome.disposition, FetchDisposition::Passthrough);
    }

    #[tokio::test]
    async fn test_route_failure_is_network_error() {
        let (scope, fetcher) = active_scope(WorkerConfig::default()).await;
        fetcher.set_offline(true);

        let request = Request::parse("http://localhost/auth/session").unwrap();
        match scope.handle_fetch(&request).await.disposition {
            FetchDisposition::Respond { response, route } => {
                assert!(response.is_error());
                assert_eq!(route, Some(RouteKind::Auth));
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_passthrough_failure() {
        let (scope, fetcher) = active_scope(WorkerConfig::default()).await;
        fetcher.set_offline(true);

        let request = Request::parse("http://localhost/api/items").unwrap();
        assert_eq!(
            scope.handle_fetch(&request).await.disposition,
            FetchDisposition::Passthrough
        );
        let (response, _) = scope.respond_to(&request).await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_navigation_fallback_serves_shell_offline() {
        let config = WorkerConfig {
            navigation_fallback: Some("/index.html".to_string()),
            precache: vec![PrecacheEntry::new("/index.html", Some("1"))],
            ..Default::default()
        };
        let (scope, fetcher) = active_scope(config).await;
        fetcher.set_offline(true);

        let request = Request::navigate(url::Url::parse("http://localhost/config").unwrap());
        match scope.handle_fetch(&request).await.disposition {
            FetchDisposition::Respond { response, route } => {
                assert_eq!(response.text(), "<shell>");
                assert_eq!(route, None);
            }
            other => panic!("expected the app shell, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cache_report_and_orphans() {
        let (scope, _) = active_scope(WorkerConfig::default()).await;
        scope
            .storage()
            .put("obi-wan-images-v0", "old", Response::ok("x"))
            .await
            .unwrap();
        scope
            .storage()
            .put("obi-wan-documents-v1", "doc", Response::ok("x"))
            .await
            .unwrap();

        let report = scope.cache_report().await;
        assert_eq!(report.len(), 7);
        let documents = report.iter().find(|s| s.role == CacheRole::Documents).unwrap();
        assert!(documents.exists);
        assert_eq!(documents.entries, 1);
        let unknown = report.iter().find(|s| s.role == CacheRole::Unknown).unwrap();
        assert_eq!(unknown.name, "obi-wan-out-of-this-world-v1");
        assert!(!unknown.exists);

        assert_eq!(
            scope.purge_orphaned_caches().await,
            vec!["obi-wan-images-v0".to_string()]
        );
        assert!(scope.storage().has("obi-wan-documents-v1").await);
    }
}
