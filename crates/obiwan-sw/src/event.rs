//! Extendable events: work that outlives the response.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Tracks background work started while handling an event (cache writes,
/// revalidation), the way `waitUntil` keeps a worker event alive.
///
/// Cloning yields another handle to the same event.
#[derive(Debug, Clone, Default)]
pub struct ExtendableEvent {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and keep the event open until it ends.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Number of tasks not yet awaited by [`settled`](Self::settled).
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Wait for every registered task, including tasks registered while
    /// waiting.
    pub async fn settled(&self) {
        loop {
            let next = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop();
            match next {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_settled_waits_for_nested_work() {
        let event = ExtendableEvent::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_event = event.clone();
        let counter = done.clone();
        event.wait_until(async move {
            let counter_inner = counter.clone();
            inner_event.wait_until(async move {
                tokio::task::yield_now().await;
                counter_inner.fetch_add(1, Ordering::SeqCst);
            });
            counter.fetch_add(1, Ordering::SeqCst);
        });

        event.settled().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(event.pending(), 0);
    }
}
