//! Page ⇄ worker bridge
//!
//! Outgoing messages are refused until the store says the worker is
//! ready. Incoming worker messages are reduced into the store by a
//! listener task.

use obiwan_sw::{ClientId, ClientMessage, ServiceWorkerController, WorkerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{Action, AppStore};

/// Errors from the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Service worker is not ready")]
    NotReady,

    #[error("No controlling service worker")]
    NoController,

    #[error("Failed to post message: {0}")]
    Send(String),
}

/// A page's link to its controlling worker
#[derive(Debug, Clone)]
pub struct ServiceWorkerBridge {
    store: AppStore,
    link: Option<(ServiceWorkerController, ClientId)>,
}

impl ServiceWorkerBridge {
    /// A bridge for a page no worker controls.
    pub fn detached(store: AppStore) -> Self {
        Self { store, link: None }
    }

    /// Connect the page at `url` and start listening for worker messages.
    pub async fn connect(
        store: AppStore,
        controller: ServiceWorkerController,
        url: Url,
    ) -> Result<(Self, JoinHandle<()>), BridgeError> {
        let (client, inbox) = controller
            .connect(url)
            .await
            .map_err(|_| BridgeError::NoController)?;
        debug!(%client, "[bridge] Connected");

        let listener = tokio::spawn(listen(store.clone(), inbox));
        let bridge = Self {
            store,
            link: Some((controller, client)),
        };
        Ok((bridge, listener))
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.link.as_ref().map(|(_, id)| *id)
    }

    /// The worker is known to control this page.
    pub fn mark_ready(&self) {
        self.store.dispatch(Action::ServiceWorkerReady);
    }

    /// Post a message to the worker.
    pub fn send(&self, message: ClientMessage) -> Result<(), BridgeError> {
        if !self.store.is_ready() {
            debug!(?message, "[bridge] Service worker is not ready...");
            return Err(BridgeError::NotReady);
        }
        let (controller, client) = self.link.as_ref().ok_or(BridgeError::NoController)?;

        info!(?message, "[bridge] postMessage");
        controller
            .send_message(*client, message)
            .map_err(|e| BridgeError::Send(e.to_string()))
    }

    /// Reduce a worker message into the store.
    pub fn handle_worker_message(&self, message: WorkerMessage) {
        apply(&self.store, message);
    }

    /// Leave the worker's client list.
    pub fn disconnect(&self) {
        if let Some((controller, client)) = &self.link {
            if let Err(e) = controller.disconnect(*client) {
                warn!(error = %e, "[bridge] Disconnect failed");
            }
        }
    }
}

async fn listen(store: AppStore, mut inbox: mpsc::UnboundedReceiver<WorkerMessage>) {
    while let Some(message) = inbox.recv().await {
        apply(&store, message);
    }
    debug!("[bridge] Worker channel closed");
}

fn apply(store: &AppStore, message: WorkerMessage) {
    debug!(?message, "[bridge] Worker message");
    match message {
        WorkerMessage::ClientMessageAllowed => {
            store.dispatch(Action::ServiceWorkerReady);
            store.dispatch(Action::SetClientMessageAllowed(true));
        }
        WorkerMessage::RefreshComplete => store.dispatch(Action::RequestReload),
        WorkerMessage::GreetingMessage { message } => store.dispatch(Action::SetGreeting(message)),
    }
}
