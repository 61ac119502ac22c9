//! # Obi-Wan Page
//!
//! Page side of the worker protocol.
//!
//! - [`AppStore`]: application state, changed only through [`Action`]s
//! - [`ServiceWorkerBridge`]: posts protocol messages once the worker is
//!   ready and reduces replies into the store

pub mod bridge;
pub mod store;

pub use bridge::{BridgeError, ServiceWorkerBridge};
pub use store::{Action, AppState, AppStore};
