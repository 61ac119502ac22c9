//! Route classification.
//!
//! Routes are checked in declared order and the first match wins:
//!
//! ```text
//! 1. font-asset       URL under the static font CDN    CacheFirst
//! 2. font-stylesheet  URL under the font API           StaleWhileRevalidate
//! 3. navigation       mode == navigate                 NetworkFirst
//! 4. auth             path under the auth prefix       NetworkOnly
//! 5. asset            script / style / worker          StaleWhileRevalidate
//! 6. image            destination == image             CacheFirst
//! ```

use http::Method;
use std::fmt;
use tracing::trace;

use crate::config::WorkerConfig;
use crate::expiration::Expirations;
use crate::registry::{CacheRegistry, CacheRole};
use crate::request::{Destination, Request};
use crate::strategy::{CacheableResponse, Strategy};

/// The bucket a request was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    FontAsset,
    FontStylesheet,
    Navigation,
    Auth,
    Asset,
    Image,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteKind::FontAsset => "font-asset",
            RouteKind::FontStylesheet => "font-stylesheet",
            RouteKind::Navigation => "navigation",
            RouteKind::Auth => "auth",
            RouteKind::Asset => "asset",
            RouteKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// A stateless predicate over requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
    /// The full URL starts with this prefix (an origin, usually).
    UrlPrefix(String),
    /// Top-level navigations.
    Navigation,
    /// The URL path starts with this prefix.
    PathPrefix(String),
    /// The destination is one of these.
    Destinations(Vec<Destination>),
}

impl RouteMatcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            RouteMatcher::UrlPrefix(prefix) => request.url.as_str().starts_with(prefix.as_str()),
            RouteMatcher::Navigation => request.is_navigation(),
            RouteMatcher::PathPrefix(prefix) => request.url.path().starts_with(prefix.as_str()),
            RouteMatcher::Destinations(kinds) => kinds.contains(&request.destination),
        }
    }
}

/// A predicate plus the strategy it selects.
#[derive(Debug, Clone)]
pub struct Route {
    pub kind: RouteKind,
    pub matcher: RouteMatcher,
    pub strategy: Strategy,
}

impl Route {
    pub fn new(kind: RouteKind, matcher: RouteMatcher, strategy: Strategy) -> Self {
        Self {
            kind,
            matcher,
            strategy,
        }
    }
}

/// Ordered route table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The worker's route table.
    ///
    /// Images and documents share one predicate, so a single image route
    /// is registered. It writes to the documents cache under the documents
    /// policy.
    pub fn standard(
        config: &WorkerConfig,
        registry: &CacheRegistry,
        expirations: &Expirations,
    ) -> Self {
        let bind = |strategy: Strategy, role: CacheRole| match expirations.get(role) {
            Some(expiration) => strategy.with_expiration(expiration),
            None => strategy,
        };

        let routes = vec![
            Route::new(
                RouteKind::FontAsset,
                RouteMatcher::UrlPrefix(config.font_asset_origin.clone()),
                bind(
                    Strategy::cache_first(registry.name(CacheRole::GoogleFont))
                        .with_cacheable(CacheableResponse::ok_and_opaque()),
                    CacheRole::GoogleFont,
                ),
            ),
            Route::new(
                RouteKind::FontStylesheet,
                RouteMatcher::UrlPrefix(config.font_stylesheet_origin.clone()),
                bind(
                    Strategy::stale_while_revalidate(registry.name(CacheRole::GoogleFontStyles)),
                    CacheRole::GoogleFontStyles,
                ),
            ),
            Route::new(
                RouteKind::Navigation,
                RouteMatcher::Navigation,
                bind(
                    Strategy::network_first(registry.name(CacheRole::Pages))
                        .with_cacheable(CacheableResponse::ok_only()),
                    CacheRole::Pages,
                ),
            ),
            Route::new(
                RouteKind::Auth,
                RouteMatcher::PathPrefix(config.auth_path_prefix.clone()),
                Strategy::network_only(),
            ),
            Route::new(
                RouteKind::Asset,
                RouteMatcher::Destinations(vec![
                    Destination::Script,
                    Destination::Style,
                    Destination::Worker,
                ]),
                bind(
                    Strategy::stale_while_revalidate(registry.name(CacheRole::Assets))
                        .with_cacheable(CacheableResponse::ok_only()),
                    CacheRole::Assets,
                ),
            ),
            Route::new(
                RouteKind::Image,
                RouteMatcher::Destinations(vec![Destination::Image]),
                bind(
                    Strategy::cache_first(registry.name(CacheRole::Documents))
                        .with_cacheable(CacheableResponse::ok_only()),
                    CacheRole::Documents,
                ),
            ),
        ];

        Self { routes }
    }

    /// First route matching a GET request. Other methods are never routed.
    pub fn classify(&self, request: &Request) -> Option<&Route> {
        if request.method != Method::GET {
            return None;
        }
        let route = self.routes.iter().find(|r| r.matcher.matches(request));
        trace!(url = %request.url, route = ?route.map(|r| r.kind), "Classified");
        route
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::strategy::StrategyKind;
    use url::Url;

    fn router() -> Router {
        let config = WorkerConfig::default();
        let registry = config.registry();
        let expirations = Expirations::new(&config.expiration, &registry, &CacheStorage::new());
        Router::standard(&config, &registry, &expirations)
    }

    fn kind_of(router: &Router, request: &Request) -> Option<RouteKind> {
        router.classify(request).map(|r| r.kind)
    }

    fn get(url: &str, destination: Destination) -> Request {
        Request::parse(url).unwrap().with_destination(destination)
    }

    #[test]
    fn test_declared_order() {
        let kinds: Vec<_> = router().routes().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RouteKind::FontAsset,
                RouteKind::FontStylesheet,
                RouteKind::Navigation,
                RouteKind::Auth,
                RouteKind::Asset,
                RouteKind::Image,
            ]
        );
    }

    #[test]
    fn test_font_hosts() {
        let router = router();
        let font = get("https://fonts.gstatic.com/s/roboto.woff2", Destination::Font);
        assert_eq!(kind_of(&router, &font), Some(RouteKind::FontAsset));

        let sheet = get("https://fonts.googleapis.com/css?family=Roboto", Destination::Style);
        assert_eq!(kind_of(&router, &sheet), Some(RouteKind::FontStylesheet));

        let lookalike = get("https://evil.example/https://fonts.gstatic.com", Destination::Font);
        assert_eq!(kind_of(&router, &lookalike), None);
    }

    #[test]
    fn test_navigation_beats_auth() {
        let router = router();
        let nav = Request::navigate(Url::parse("https://app.example/auth/login").unwrap());
        assert_eq!(kind_of(&router, &nav), Some(RouteKind::Navigation));

        let api = get("https://app.example/auth/token", Destination::Empty);
        assert_eq!(kind_of(&router, &api), Some(RouteKind::Auth));
    }

    #[test]
    fn test_auth_beats_asset() {
        let script = get("https://app.example/auth/sdk.js", Destination::Script);
        assert_eq!(kind_of(&router(), &script), Some(RouteKind::Auth));
    }

    #[test]
    fn test_destinations() {
        let router = router();
        for destination in [Destination::Script, Destination::Style, Destination::Worker] {
            let request = get("https://app.example/main", destination);
            assert_eq!(kind_of(&router, &request), Some(RouteKind::Asset));
        }
        let image = get("https://app.example/logo.png", Destination::Image);
        let route = router.classify(&image).unwrap();
        assert_eq!(route.kind, RouteKind::Image);
        assert_eq!(route.strategy.kind(), StrategyKind::CacheFirst);
        assert_eq!(route.strategy.cache_name(), Some("obi-wan-documents-v1"));
    }

    #[test]
    fn test_unmatched() {
        let router = router();
        let data = get("https://app.example/api/items", Destination::Empty);
        assert_eq!(kind_of(&router, &data), None);

        let post = get("https://app.example/logo.png", Destination::Image).with_method(Method::POST);
        assert_eq!(kind_of(&router, &post), None);
    }

    #[test]
    fn test_strategies_per_route() {
        let strategies: Vec<_> = router()
            .routes()
            .iter()
            .map(|r| r.strategy.kind())
            .collect();
        assert_eq!(
            strategies,
            vec![
                StrategyKind::CacheFirst,
                StrategyKind::StaleWhileRevalidate,
                StrategyKind::NetworkFirst,
                StrategyKind::NetworkOnly,
                StrategyKind::StaleWhileRevalidate,
                StrategyKind::CacheFirst,
            ]
        );
    }
}
