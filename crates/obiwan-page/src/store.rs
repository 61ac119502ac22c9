//! Application store
//!
//! State is owned by one [`AppStore`] and changes only through
//! [`AppStore::dispatch`]. Observers subscribe to snapshots.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Page-side application state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppState {
    /// A worker controls this page. Never goes back to false.
    pub service_worker_ready: bool,
    /// The worker sent `CLIENT_MESSAGE_ALLOWED`
    pub client_message_allowed: bool,
    /// Last greeting received
    pub greeting: String,
    /// The worker cleared caches and the page should reload
    pub reload_requested: bool,
}

/// State transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ServiceWorkerReady,
    SetClientMessageAllowed(bool),
    SetGreeting(String),
    RequestReload,
    ReloadHandled,
}

impl AppState {
    fn reduce(&mut self, action: Action) {
        match action {
            Action::ServiceWorkerReady => self.service_worker_ready = true,
            Action::SetClientMessageAllowed(allowed) => self.client_message_allowed = allowed,
            Action::SetGreeting(greeting) => self.greeting = greeting,
            Action::RequestReload => self.reload_requested = true,
            Action::ReloadHandled => self.reload_requested = false,
        }
    }
}

/// Shared handle to the application state
#[derive(Debug, Clone)]
pub struct AppStore {
    state: Arc<watch::Sender<AppState>>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AppState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Apply an action and notify subscribers.
    pub fn dispatch(&self, action: Action) {
        debug!(?action, "Dispatch");
        self.state.send_modify(|state| state.reduce(action));
    }

    /// Current state snapshot
    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().service_worker_ready
    }

    /// Readiness as shown on the status bar
    pub fn status_line(&self) -> &'static str {
        if self.is_ready() {
            "Service Worker is Ready"
        } else {
            "Service Worker is not ready"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_is_one_way() {
        let store = AppStore::new();
        assert_eq!(store.status_line(), "Service Worker is not ready");

        store.dispatch(Action::ServiceWorkerReady);
        store.dispatch(Action::SetClientMessageAllowed(false));
        store.dispatch(Action::ServiceWorkerReady);

        assert!(store.is_ready());
        assert_eq!(store.status_line(), "Service Worker is Ready");
    }

    #[test]
    fn test_reduce() {
        let store = AppStore::new();
        store.dispatch(Action::SetGreeting("Pay your bills".to_string()));
        store.dispatch(Action::RequestReload);

        let state = store.state();
        assert_eq!(state.greeting, "Pay your bills");
        assert!(state.reload_requested);
        assert!(!state.service_worker_ready);

        store.dispatch(Action::ReloadHandled);
        assert!(!store.state().reload_requested);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let store = AppStore::new();
        let mut rx = store.subscribe();

        store.dispatch(Action::SetClientMessageAllowed(true));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().client_message_allowed);

        let clone = store.clone();
        clone.dispatch(Action::ServiceWorkerReady);
        rx.changed().await.unwrap();
        assert!(rx.borrow().service_worker_ready);
    }
}
