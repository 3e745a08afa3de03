//! Process-local key/value cache with per-entry time-to-live.
//!
//! Entries expire lazily on read and eagerly through a background sweep
//! task owned by the cache. The sweep starts when the cache is built inside
//! a tokio runtime and stops on [`TtlCache::shutdown`] or drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.stored_at) >= ttl)
    }
}

type EntryMap<V> = Mutex<HashMap<String, CacheEntry<V>>>;

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Arc<EntryMap<V>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweep_interval: Option<Duration>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + 'static,
{
    /// Builds a cache whose sweep task runs every `sweep_interval`.
    /// Outside a tokio runtime no sweep is started and expiry stays lazy.
    pub fn new(sweep_interval: Duration) -> Self {
        let entries: Arc<EntryMap<V>> = Arc::new(Mutex::new(HashMap::new()));
        let interval = sweep_interval.max(Duration::from_millis(1));
        // Anchored here, not on the task's first poll.
        let first_sweep = Instant::now() + interval;
        let sweeper = tokio::runtime::Handle::try_current().ok().map(|handle| {
            handle.spawn(sweep_loop(Arc::downgrade(&entries), first_sweep, interval))
        });
        if sweeper.is_none() {
            tracing::debug!("no tokio runtime; cache sweep disabled");
        }

        Self {
            entries,
            sweeper: Mutex::new(sweeper),
            sweep_interval: Some(interval),
        }
    }

    pub fn without_sweeper() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
            sweep_interval: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        self.lock().insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Replaces the value of a live entry. Returns false when the key is
    /// absent or already expired; an expired entry is evicted.
    pub fn update(&self, key: &str, value: V, reset_ttl: bool) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.is_expired(now) {
            entries.remove(key);
            return false;
        }
        entry.value = value;
        if reset_ttl {
            entry.stored_at = now;
        }
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn clear_expired(&self) -> usize {
        evict_expired(&self.entries)
    }

    pub fn snapshot(&self) -> HashMap<String, V> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Serialize + 'static,
{
    pub fn to_json(&self) -> Value {
        let now = Instant::now();
        let entries = self.lock();
        let mut out = serde_json::Map::new();
        for (key, entry) in entries.iter().filter(|(_, e)| !e.is_expired(now)) {
            out.insert(
                key.clone(),
                json!({
                    "value": entry.value,
                    "age_secs": now.saturating_duration_since(entry.stored_at).as_secs(),
                    "ttl_secs": entry.ttl.map(|ttl| ttl.as_secs()),
                }),
            );
        }
        Value::Object(out)
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

fn evict_expired<V>(entries: &EntryMap<V>) -> usize {
    let now = Instant::now();
    let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

async fn sweep_loop<V>(entries: Weak<EntryMap<V>>, start: Instant, period: Duration) {
    let mut ticker = tokio::time::interval_at(start, period);
    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let evicted = evict_expired(&entries);
        if evicted > 0 {
            tracing::debug!(evicted, "cache sweep evicted expired entries");
        }
    }
}
