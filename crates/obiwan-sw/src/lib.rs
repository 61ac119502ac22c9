//! # Obi-Wan Worker
//!
//! Offline worker for the Obi-Wan web app.
//!
//! ## Features
//!
//! - **Routing**: classifies each GET by origin, destination, mode and path
//! - **Strategies**: cache-first, stale-while-revalidate, network-first, network-only
//! - **Expiration**: max-age and max-entries per cache with a periodic sweep; purge on quota errors
//! - **Lifecycle**: precache on install, cleanup and claim on activate
//! - **Messaging**: `SKIP_WAITING`, `CLIENTS_CLAIM`, `REFRESH`, `GET_GREETING`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerController ──▶ WorkerRuntime
//!                                 │
//!                                 └── ServiceWorkerGlobalScope
//!                                         ├── Router ── Route ── Strategy
//!                                         ├── Precache
//!                                         ├── Expirations ── CacheExpiration
//!                                         ├── Clients
//!                                         └── FetchContext
//!                                               ├── CacheStorage
//!                                               │     └── cache name → key → Response
//!                                               └── dyn Fetcher (HttpFetcher)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod expiration;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod precache;
pub mod registry;
pub mod request;
pub mod routing;
pub mod runtime;
pub mod scope;
pub mod strategy;
pub mod testing;

pub use cache::CacheStorage;
pub use clients::{Client, ClientId, Clients};
pub use config::WorkerConfig;
pub use error::{Result, ServiceWorkerError};
pub use event::ExtendableEvent;
pub use expiration::{CacheExpiration, ExpirationPolicy, Expirations};
pub use fetch::{Fetcher, HttpFetcher};
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};
pub use message::{ClientMessage, Greetings, ReplyTarget, WorkerMessage};
pub use precache::{Precache, PrecacheEntry};
pub use registry::{CacheRegistry, CacheRole};
pub use request::{Destination, Request, RequestMode, Response, ResponseType};
pub use routing::{Route, RouteKind, RouteMatcher, Router};
pub use runtime::{ClientConnection, ServiceWorkerController, WorkerEvent, WorkerRuntime};
pub use scope::{CacheStatus, FetchDisposition, FetchOutcome, ServiceWorkerGlobalScope};
pub use strategy::{CacheableResponse, FetchContext, Strategy, StrategyKind};
