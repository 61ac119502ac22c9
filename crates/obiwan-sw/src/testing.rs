//! Scripted in-memory fetcher.
//!
//! Used by tests and by the shell's `--offline` mode.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::error::{Result, ServiceWorkerError};
use crate::fetch::Fetcher;
use crate::request::{Request, Response};

/// A [`Fetcher`] answering from a table of canned responses.
///
/// Unknown URLs and every URL while offline fail with a network error.
#[derive(Debug, Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, Response>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher with no responses and the network down.
    pub fn offline() -> Self {
        let fetcher = Self::default();
        fetcher.set_offline(true);
        fetcher
    }

    /// Answer `url` with `response` from now on.
    pub async fn respond(&self, url: &str, response: Response) {
        self.responses.lock().await.insert(url.to_string(), response);
    }

    /// Make `url` fail with a network error.
    pub async fn fail(&self, url: &str) {
        self.responses.lock().await.remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches seen for `url`, including failed ones.
    pub async fn calls(&self, url: &str) -> usize {
        self.calls.lock().await.get(url).copied().unwrap_or(0)
    }

    /// Total fetches seen.
    pub async fn total_calls(&self) -> usize {
        self.calls.lock().await.values().sum()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let key = request.cache_key();
        *self.calls.lock().await.entry(key.clone()).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Network("offline".to_string()));
        }
        self.responses
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::Network(format!("no route to {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_fetcher() {
        let fetcher = StubFetcher::new();
        fetcher
            .respond("https://example.com/a", Response::ok("a"))
            .await;

        let request = Request::parse("https://example.com/a").unwrap();
        assert_eq!(fetcher.fetch(&request).await.unwrap().text(), "a");

        fetcher.set_offline(true);
        assert!(fetcher.fetch(&request).await.is_err());
        assert_eq!(fetcher.calls("https://example.com/a").await, 2);
    }
}
