//! In-memory key/value cache with per-entry expiry.
//!
//! Expired entries are dropped lazily on read and by a background sweep task
//! owned by the cache. The sweep is only started when the cache is created
//! inside a tokio runtime; outside one, lazy eviction still applies.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shorter sweep intervals are raised to this.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

type Entries<K, V> = Mutex<HashMap<K, CacheEntry<V>>>;

/// A TTL cache. Values are cloned out on read.
pub struct TtlCache<K, V> {
    entries: Arc<Entries<K, V>>,
    default_ttl: Duration,
    sweeper: CancellationToken,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates a cache with [`DEFAULT_TTL`] and [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self::with_config(default_ttl, DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a cache. `sweep_interval` is raised to at least one
    /// millisecond.
    pub fn with_config(default_ttl: Duration, sweep_interval: Duration) -> Self {
        let sweep_interval = sweep_interval.max(MIN_SWEEP_INTERVAL);
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = CancellationToken::new();

        if let Ok(handle) = Handle::try_current() {
            handle.spawn(sweep_loop(
                Arc::downgrade(&entries),
                sweep_interval,
                sweeper.clone(),
            ));
        }

        Self {
            entries,
            default_ttl,
            sweeper,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` for `ttl`. A TTL too large to represent never expires.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.lock().insert(key, entry);
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn delete(&self, key: &K) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Returns the cached value, or computes, stores and returns a new one.
    ///
    /// Errors from `init` are returned and nothing is stored. Concurrent
    /// callers for the same missing key may both run `init`.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = init().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Stops the sweep task and drops every entry.
    pub fn destroy(&self) {
        self.sweeper.cancel();
        self.clear();
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.lock().len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

async fn sweep_loop<K, V>(entries: Weak<Entries<K, V>>, every: Duration, stop: CancellationToken)
where
    K: Eq + Hash,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(entries) = entries.upgrade() else { break };
                let now = Instant::now();
                let mut entries = entries.lock();
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                let swept = before - entries.len();
                if swept > 0 {
                    trace!(swept, remaining = entries.len(), "Swept expired cache entries");
                }
            }
        }
    }
}
