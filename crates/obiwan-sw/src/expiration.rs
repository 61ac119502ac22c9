//! Age and count based eviction for policy-bound caches.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::CacheStorage;
use crate::registry::{CacheRegistry, CacheRole};

const DAY: u64 = 24 * 60 * 60;

/// Eviction rules attached to a cache role.
///
/// A cache without a policy grows until it is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicy {
    /// Entries written longer ago than this are ignored and purged.
    pub max_age_seconds: Option<u64>,
    /// Oldest entries are evicted beyond this count.
    pub max_entries: Option<usize>,
    /// Delete the whole cache when a write hits the storage quota.
    pub purge_on_quota_error: bool,
}

impl ExpirationPolicy {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_seconds.map(Duration::from_secs)
    }

    /// 60 days, 50 entries, purge on quota error.
    pub fn documents() -> Self {
        Self {
            max_age_seconds: Some(60 * DAY),
            max_entries: Some(50),
            purge_on_quota_error: true,
        }
    }

    /// 30 days, 50 entries.
    pub fn images() -> Self {
        Self {
            max_age_seconds: Some(30 * DAY),
            max_entries: Some(50),
            purge_on_quota_error: false,
        }
    }

    /// One year, 30 entries, purge on quota error.
    pub fn google_font() -> Self {
        Self {
            max_age_seconds: Some(365 * DAY),
            max_entries: Some(30),
            purge_on_quota_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    written_at: Instant,
    seq: u64,
}

/// Write-time bookkeeping for one cache, enforcing its policy.
#[derive(Debug)]
pub struct CacheExpiration {
    cache_name: String,
    policy: ExpirationPolicy,
    storage: CacheStorage,
    stamps: Mutex<HashMap<String, Stamp>>,
    next_seq: AtomicU64,
}

impl CacheExpiration {
    pub fn new(cache_name: impl Into<String>, policy: ExpirationPolicy, storage: CacheStorage) -> Self {
        Self {
            cache_name: cache_name.into(),
            policy,
            storage,
            stamps: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    /// Record a write of `key`. Rewriting a key makes it the newest entry.
    pub async fn update_timestamp(&self, key: &str) {
        let stamp = Stamp {
            written_at: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.stamps.lock().await.insert(key.to_string(), stamp);
    }

    /// Whether an entry may still be served. Entries without a recorded
    /// write time are treated as fresh.
    pub async fn is_fresh(&self, key: &str) -> bool {
        let Some(max_age) = self.policy.max_age() else {
            return true;
        };
        match self.stamps.lock().await.get(key) {
            Some(stamp) => stamp.written_at.elapsed() <= max_age,
            None => true,
        }
    }

    /// Purge entries past their age, then the oldest beyond the entry limit.
    /// Returns the evicted keys.
    pub async fn expire_entries(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        {
            let mut stamps = self.stamps.lock().await;

            if let Some(max_age) = self.policy.max_age() {
                stamps.retain(|key, stamp| {
                    let fresh = stamp.written_at.elapsed() <= max_age;
                    if !fresh {
                        evicted.push(key.clone());
                    }
                    fresh
                });
            }

            if let Some(max_entries) = self.policy.max_entries {
                if stamps.len() > max_entries {
                    let mut by_age: Vec<(u64, String)> =
                        stamps.iter().map(|(k, s)| (s.seq, k.clone())).collect();
                    by_age.sort_unstable();
                    let excess = stamps.len() - max_entries;
                    for (_, key) in by_age.into_iter().take(excess) {
                        stamps.remove(&key);
                        evicted.push(key);
                    }
                }
            }
        }

        for key in &evicted {
            self.storage.delete_entry(&self.cache_name, key).await;
        }
        if !evicted.is_empty() {
            debug!(cache = %self.cache_name, count = evicted.len(), "Expired entries");
        }
        evicted
    }

    /// Forget all write times without touching the cache.
    pub async fn clear_metadata(&self) {
        self.stamps.lock().await.clear();
    }

    /// Delete the cache and its write times.
    pub async fn delete_cache_and_metadata(&self) -> bool {
        self.clear_metadata().await;
        self.storage.delete(&self.cache_name).await
    }
}

/// Expiration bookkeeping for every policy-bound role.
#[derive(Debug, Clone, Default)]
pub struct Expirations {
    by_role: HashMap<CacheRole, Arc<CacheExpiration>>,
}

impl Expirations {
    pub fn new(
        policies: &HashMap<CacheRole, ExpirationPolicy>,
        registry: &CacheRegistry,
        storage: &CacheStorage,
    ) -> Self {
        let by_role = policies
            .iter()
            .map(|(role, policy)| {
                let expiration =
                    CacheExpiration::new(registry.name(*role), policy.clone(), storage.clone());
                (*role, Arc::new(expiration))
            })
            .collect();
        Self { by_role }
    }

    pub fn get(&self, role: CacheRole) -> Option<Arc<CacheExpiration>> {
        self.by_role.get(&role).cloned()
    }

    /// Run eviction on every policy-bound cache.
    pub async fn sweep(&self) -> usize {
        let mut total = 0;
        for expiration in self.by_role.values() {
            total += expiration.expire_entries().await.len();
        }
        total
    }
}
