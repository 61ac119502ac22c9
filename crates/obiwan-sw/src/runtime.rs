//! Event runtime.
//!
//! ```text
//! ServiceWorkerController ──WorkerEvent──▶ WorkerRuntime loop
//!   (cloneable handle)                        │
//!                                             ├── Connect / Disconnect (inline, in order)
//!                                             ├── Install / Activate / Fetch
//!                                             │     (one task per event)
//!                                             └── Message ──▶ per-client inbox task
//!
//! sweep task ── every `sweep_interval_seconds` ──▶ expire entries
//! ```
//!
//! A new event may start before an earlier one has finished its
//! asynchronous work. Messages from one client are handled one at a time,
//! in send order.

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use url::Url;

use crate::clients::ClientId;
use crate::error::{Result, ServiceWorkerError};
use crate::message::{ClientMessage, WorkerMessage};
use crate::request::Request;
use crate::scope::{FetchOutcome, ServiceWorkerGlobalScope};

/// Connection handed to a page: its id and its message inbox.
pub type ClientConnection = (ClientId, mpsc::UnboundedReceiver<WorkerMessage>);

/// Events delivered to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
    Install {
        reply: oneshot::Sender<Result<()>>,
    },
    Activate {
        reply: oneshot::Sender<Result<()>>,
    },
    Fetch {
        request: Box<Request>,
        reply: oneshot::Sender<FetchOutcome>,
    },
    Message {
        source: ClientId,
        data: JsonValue,
    },
    Connect {
        url: Url,
        reply: oneshot::Sender<ClientConnection>,
    },
    Disconnect {
        id: ClientId,
    },
    Shutdown,
}

/// Runs a worker scope: the event loop and the expiration sweep.
pub struct WorkerRuntime {
    scope: Arc<ServiceWorkerGlobalScope>,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    task: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl WorkerRuntime {
    /// Start the event loop, and the expiration sweep when configured, on
    /// the current tokio runtime.
    pub fn spawn(scope: ServiceWorkerGlobalScope) -> Self {
        let scope = Arc::new(scope);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(event_loop(scope.clone(), rx));
        let sweeper = scope
            .config()
            .sweep_interval()
            .map(|period| tokio::spawn(sweep_loop(scope.clone(), period)));
        Self {
            scope,
            tx,
            task,
            sweeper,
        }
    }

    /// A handle pages use to reach this worker.
    pub fn controller(&self) -> ServiceWorkerController {
        ServiceWorkerController {
            tx: self.tx.clone(),
        }
    }

    pub fn scope(&self) -> &Arc<ServiceWorkerGlobalScope> {
        &self.scope
    }

    /// Stop accepting events and sweeping. Handlers already running keep
    /// going.
    pub async fn shutdown(self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        let _ = self.tx.send(WorkerEvent::Shutdown);
        let _ = self.task.await;
    }
}

async fn sweep_loop(scope: Arc<ServiceWorkerGlobalScope>, period: Duration) {
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let evicted = scope.sweep_expired().await;
        if evicted > 0 {
            debug!(evicted, "Swept expired entries");
        }
    }
}

/// Queue for one client's messages, drained by its own task.
fn spawn_inbox(
    scope: Arc<ServiceWorkerGlobalScope>,
    source: ClientId,
) -> mpsc::UnboundedSender<JsonValue> {
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonValue>();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            scope.handle_message(source, &data).await;
        }
    });
    tx
}

async fn event_loop(
    scope: Arc<ServiceWorkerGlobalScope>,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    let mut inboxes: HashMap<ClientId, mpsc::UnboundedSender<JsonValue>> = HashMap::new();
    while let Some(event) = rx.recv().await {
        trace!(?event, "Worker event");
        match event {
            WorkerEvent::Shutdown => break,
            WorkerEvent::Connect { url, reply } => {
                let connection = scope.clients().write().await.connect(url);
                debug!(client = %connection.0, "Client connected");
                let _ = reply.send(connection);
            }
            WorkerEvent::Disconnect { id } => {
                scope.clients().write().await.disconnect(id);
                // Dropping the sender lets the inbox drain and stop.
                inboxes.remove(&id);
                debug!(client = %id, "Client disconnected");
            }
            WorkerEvent::Message { source, data } => {
                let inbox = inboxes
                    .entry(source)
                    .or_insert_with(|| spawn_inbox(scope.clone(), source));
                if inbox.send(data).is_err() {
                    warn!(client = %source, "Message inbox stopped, dropping message");
                    inboxes.remove(&source);
                }
            }
            other => {
                tokio::spawn(dispatch(scope.clone(), other));
            }
        }
    }
    debug!("Worker event loop stopped");
}

async fn dispatch(scope: Arc<ServiceWorkerGlobalScope>, event: WorkerEvent) {
    match event {
        WorkerEvent::Install { reply } => {
            let _ = reply.send(scope.install().await);
        }
        WorkerEvent::Activate { reply } => {
            let _ = reply.send(scope.activate().await);
        }
        WorkerEvent::Fetch { request, reply } => {
            let _ = reply.send(scope.handle_fetch(&request).await);
        }
        WorkerEvent::Message { .. }
        | WorkerEvent::Connect { .. }
        | WorkerEvent::Disconnect { .. }
        | WorkerEvent::Shutdown => {}
    }
}

/// Cloneable handle to a running worker.
#[derive(Debug, Clone)]
pub struct ServiceWorkerController {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorkerController {
    fn send(&self, event: WorkerEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| ServiceWorkerError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| ServiceWorkerError::Closed)
    }

    pub async fn install(&self) -> Result<()> {
        self.request(|reply| WorkerEvent::Install { reply }).await?
    }

    pub async fn activate(&self) -> Result<()> {
        self.request(|reply| WorkerEvent::Activate { reply }).await?
    }

    /// Dispatch a fetch event.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
        self.request(|reply| WorkerEvent::Fetch {
            request: Box::new(request),
            reply,
        })
        .await
    }

    /// Connect a page at `url`.
    pub async fn connect(&self, url: Url) -> Result<ClientConnection> {
        self.request(|reply| WorkerEvent::Connect { url, reply }).await
    }

    pub fn disconnect(&self, id: ClientId) -> Result<()> {
        self.send(WorkerEvent::Disconnect { id })
    }

    /// Post raw structured data, as a page's `postMessage` would.
    pub fn post_message(&self, source: ClientId, data: JsonValue) -> Result<()> {
        self.send(WorkerEvent::Message { source, data })
    }

    /// Post a typed protocol message.
    pub fn send_message(&self, source: ClientId, message: ClientMessage) -> Result<()> {
        self.post_message(source, message.to_json())
    }
}
