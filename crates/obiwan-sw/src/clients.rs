//! Connected page clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::lifecycle::ServiceWorkerId;
use crate::message::WorkerMessage;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// An open page connected to the worker.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker controlling this client, once claimed.
    pub controller: Option<ServiceWorkerId>,
    port: mpsc::UnboundedSender<WorkerMessage>,
}

impl Client {
    /// Post a message to the page.
    pub fn post_message(&self, message: WorkerMessage) -> Result<()> {
        self.port
            .send(message)
            .map_err(|_| ServiceWorkerError::State(format!("{} is gone", self.id)))
    }

    pub fn is_controlled(&self) -> bool {
        self.controller.is_some()
    }
}

/// Clients API, in connection order.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page. Messages posted to it arrive on the returned receiver.
    pub fn connect(&mut self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (port, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        self.clients.push(Client {
            id,
            url,
            controller: None,
            port,
        });
        (id, rx)
    }

    /// Remove a client.
    pub fn disconnect(&mut self, id: ClientId) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// The longest-connected client.
    pub fn first(&self) -> Option<&Client> {
        self.clients.first()
    }

    pub fn match_all(&self) -> &[Client] {
        &self.clients
    }

    /// Make `worker` the controller of every client. Returns how many
    /// changed controller.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        let mut changed = 0;
        for client in &mut self.clients {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                changed += 1;
            }
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[test]
    fn test_connect_order() {
        let mut clients = Clients::new();
        let (a, _rx_a) = clients.connect(url());
        let (b, _rx_b) = clients.connect(url());

        assert_eq!(clients.first().map(|c| c.id), Some(a));
        assert!(clients.get(b).is_some());

        clients.disconnect(a);
        assert_eq!(clients.first().map(|c| c.id), Some(b));
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_claim() {
        let mut clients = Clients::new();
        let (id, _rx) = clients.connect(url());
        let worker = ServiceWorkerId::new();

        assert!(!clients.get(id).unwrap().is_controlled());
        assert_eq!(clients.claim(worker), 1);
        assert_eq!(clients.claim(worker), 0);
        assert!(clients.get(id).unwrap().is_controlled());
    }

    #[tokio::test]
    async fn test_post_message() {
        let mut clients = Clients::new();
        let (_, mut rx) = clients.connect(url());

        clients
            .first()
            .unwrap()
            .post_message(WorkerMessage::RefreshComplete)
            .unwrap();
        assert_eq!(rx.recv().await, Some(WorkerMessage::RefreshComplete));

        drop(rx);
        assert!(clients
            .first()
            .unwrap()
            .post_message(WorkerMessage::RefreshComplete)
            .is_err());
    }
}
