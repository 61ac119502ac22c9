//! Worker lifecycle: install, activate, claim.
//!
//! ```text
//! Parsed ─install─▶ Installing ─▶ Installed ─activate─▶ Activating ─▶ Activated
//!                        │             (waiting)
//!                        └── precache failure ──▶ Redundant
//! ```
//!
//! Install never activates on its own. A new version waits until the
//! runtime activates it or a page sends `SKIP_WAITING`, so an open page
//! never runs against two worker versions at once.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceWorkerError};
use crate::message::WorkerMessage;
use crate::precache::cleanup_outdated_caches;
use crate::scope::ServiceWorkerGlobalScope;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, not yet installed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or replaced.
    Redundant,
}

impl ServiceWorkerState {
    /// Whether fetches are intercepted in this state.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// A worker version and its state.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    /// Cache version this worker writes to.
    pub version: String,
    pub state: ServiceWorkerState,
    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version: version.into(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(from = %self.state, to = %state, version = %self.version, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

impl ServiceWorkerGlobalScope {
    /// Install: populate the precache. Does not activate.
    pub async fn install(&self) -> Result<()> {
        {
            let mut worker = self.worker().write().await;
            match worker.state {
                ServiceWorkerState::Parsed | ServiceWorkerState::Redundant => {
                    worker.set_state(ServiceWorkerState::Installing)
                }
                state => {
                    return Err(ServiceWorkerError::State(format!(
                        "cannot install a worker that is {state}"
                    )))
                }
            }
        }
        info!(version = %self.config().cache_version, "[worker] :::: INSTALLING");

        if let Some(precache) = self.precache() {
            if self.config().is_debug() {
                for (i, url) in precache.urls().iter().enumerate() {
                    debug!("[worker]  manifest[{i}]: {url}");
                }
            }
            if let Err(e) = precache.install(self.fetch_context()).await {
                warn!(error = %e, "Install failed");
                self.worker()
                    .write()
                    .await
                    .set_state(ServiceWorkerState::Redundant);
                return Err(e);
            }
        }

        self.worker()
            .write()
            .await
            .set_state(ServiceWorkerState::Installed);
        info!("[worker] :::: INSTALLED");
        Ok(())
    }

    /// Activate: clean outdated precaches, claim clients, and tell the
    /// first client it may send messages. Activating twice is a no-op.
    pub async fn activate(&self) -> Result<()> {
        let worker_id = {
            let mut worker = self.worker().write().await;
            match worker.state {
                ServiceWorkerState::Installed => worker.set_state(ServiceWorkerState::Activating),
                ServiceWorkerState::Activating | ServiceWorkerState::Activated => {
                    debug!(state = %worker.state, "Already activating");
                    return Ok(());
                }
                state => {
                    return Err(ServiceWorkerError::State(format!(
                        "cannot activate a worker that is {state}"
                    )))
                }
            }
            worker.id
        };

        cleanup_outdated_caches(self.storage(), self.registry()).await;

        self.worker()
            .write()
            .await
            .set_state(ServiceWorkerState::Activated);
        info!(?worker_id, "[worker] :::: ACTIVATED");

        self.claim_clients().await;
        let first = self.clients().read().await.first().cloned();
        if let Some(client) = first {
            if let Err(e) = client.post_message(WorkerMessage::ClientMessageAllowed) {
                warn!(client = %client.id, error = %e, "Could not notify client");
            }
        }
        Ok(())
    }

    /// Activate now if installed and waiting.
    pub async fn skip_waiting(&self) -> Result<()> {
        let waiting = self.state().await == ServiceWorkerState::Installed;
        if waiting {
            info!("Skipping wait");
            self.activate().await
        } else {
            Ok(())
        }
    }

    /// Take control of every open client. Only an active worker can claim.
    pub async fn claim_clients(&self) -> usize {
        let worker = self.worker().read().await;
        if !worker.is_active() {
            debug!(state = %worker.state, "Not active, skipping claim");
            return 0;
        }
        let claimed = self.clients().write().await.claim(worker.id);
        debug!(claimed, "Clients claimed");
        claimed
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceWorkerState {
        self.worker().read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_worker_state_transitions() {
        let mut worker = ServiceWorker::new("v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);
        assert!(!worker.state.can_intercept_fetch());

        worker.set_state(ServiceWorkerState::Installing);
        assert_eq!(worker.state, ServiceWorkerState::Installing);

        worker.set_state(ServiceWorkerState::Activated);
        assert!(worker.is_active());
        assert!(worker.state.can_intercept_fetch());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceWorkerState::Installed.to_string(), "installed");
        assert_eq!(
            serde_json::to_string(&ServiceWorkerState::Activating).unwrap(),
            "\"activating\""
        );
    }
}
