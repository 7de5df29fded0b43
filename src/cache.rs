//! # TTL Cache
//! Keyed memo store with a fixed time-to-live window.
//!
//! Entries are superseded on `set`, evicted explicitly via `clear`, on a
//! forced refresh, or lazily on `get` once older than the TTL. There is no
//! background sweeper; `clear_expired` is meant to be called opportunistically.
//!
//! Time comes from `tokio::time::Instant`, so tests can pause and advance the
//! clock deterministically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;

/// Default window used by the dashboard: five minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    payload: T,
    stored_at: Instant,
}

/// Thread-safe TTL cache over cloneable payloads.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cache with the default five-minute window.
    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `payload` under `key`, replacing any existing entry.
    pub fn set(&self, key: impl Into<String>, payload: T) {
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
        };
        self.lock().insert(key.into(), entry);
    }

    /// Fresh payload for `key`, or `None` on a miss.
    ///
    /// With `force_refresh` the entry is evicted and `None` returned, so the
    /// caller fetches fresh data and `set`s it.
    pub fn get(&self, key: &str, force_refresh: bool) -> Option<T> {
        let mut entries = self.lock();

        if force_refresh {
            if entries.remove(key).is_some() {
                counter!("hub_cache_evictions_total").increment(1);
            }
            tracing::debug!(target: "cache", key, "forced refresh, entry evicted");
            return None;
        }

        let now = Instant::now();
        let expired = match entries.get(key) {
            None => {
                counter!("hub_cache_misses_total").increment(1);
                return None;
            }
            Some(entry) => now.saturating_duration_since(entry.stored_at) > self.ttl,
        };

        if expired {
            entries.remove(key);
            counter!("hub_cache_evictions_total").increment(1);
            counter!("hub_cache_misses_total").increment(1);
            tracing::debug!(target: "cache", key, "entry expired");
            return None;
        }

        counter!("hub_cache_hits_total").increment(1);
        entries.get(key).map(|e| e.payload.clone())
    }

    /// Remove one entry, or everything when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut entries = self.lock();
        match key {
            Some(k) => {
                entries.remove(k);
            }
            None => entries.clear(),
        }
    }

    /// Evict every entry older than the TTL. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            counter!("hub_cache_evictions_total").increment(removed as u64);
            tracing::debug!(target: "cache", removed, "swept expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_then_get_returns_payload() {
        let cache = TtlCache::with_default_ttl();
        cache.set("k", 42);
        assert_eq!(cache.get("k", false), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_only_after_ttl_is_exceeded() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set("k", "v".to_string());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k", false).as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k", false), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_evicts_fresh_entry() {
        let cache = TtlCache::with_default_ttl();
        cache.set("k", 1);
        assert_eq!(cache.get("k", true), None);
        assert_eq!(cache.get("k", false), None);
        // nothing stored: still a miss, no panic
        assert_eq!(cache.get("other", true), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_the_window() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set("k", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k", false), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_one_or_all() {
        let cache = TtlCache::with_default_ttl();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear(Some("a"));
        assert_eq!(cache.get("a", false), None);
        assert_eq!(cache.get("b", false), Some(2));
        cache.clear(None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_expired_sweeps_only_stale_entries() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set("old", 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("new", 2);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.clear_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new", false), Some(2));
    }
}
