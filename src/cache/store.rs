//! Bounded in-process store with LRU eviction and per-entry TTL

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    key::glob_match,
    types::{CacheKey, CacheStats},
};
use crate::clock::{self, Clock};
use crate::error::{CacheError, Result};
use crate::invalidation::{InvalidationEvent, InvalidationReason};
use crate::scheduler::Scheduler;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Capacity-bounded cache with LRU eviction and lazy TTL expiry
///
/// This implementation provides:
/// - O(1) get/set/delete over an access-ordered map
/// - Expiry checked on every access; the background sweep is only an
///   optimization for cold keys
/// - A single mutex around all structural mutation
///
/// Expiry is a property of the entry itself, so overwriting a key
/// implicitly cancels the previous expiry: no timer can delete the fresh
/// value.
pub struct BoundedCache<V> {
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    store: Mutex<CacheStore<V>>,
}

/// Internal cache storage
struct CacheStore<V> {
    /// Access-ordered entries: most recently used at the head
    entries: LruCache<CacheKey, CacheEntry<V>>,

    /// Current cache statistics
    stats: CacheStats,
}

impl<V> BoundedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache sized and timed by `config`
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Self::with_clock(config.capacity, config.default_ttl, clock::system())
    }

    /// Create a cache with explicit capacity and default TTL
    pub fn with_capacity(capacity: usize, default_ttl: Duration) -> Result<Self> {
        Self::with_clock(capacity, default_ttl, clock::system())
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or_else(|| {
            CacheError::Config("capacity must be greater than 0".to_string())
        })?;

        info!(
            "Initializing bounded cache (capacity: {}, default_ttl: {:?})",
            capacity, default_ttl
        );

        Ok(Self {
            capacity,
            default_ttl,
            clock,
            store: Mutex::new(CacheStore {
                entries: LruCache::new(cap),
                stats: CacheStats {
                    capacity,
                    ..Default::default()
                },
            }),
        })
    }

    /// Insert with the default TTL
    pub fn insert(&self, key: impl Into<CacheKey>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Insert or replace an entry and mark it most recently used.
    ///
    /// A zero `ttl` means the entry never expires.
    pub fn set(&self, key: impl Into<CacheKey>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let mut guard = self.store.lock();
        let store = &mut *guard;

        if let Some(existing) = store.entries.get_mut(&key) {
            debug!("Updating existing cache entry: {}", key);
            existing.update_value(value, ttl, now);
            return;
        }

        debug!("Inserting new cache entry: {}", key);
        if let Some((evicted_key, evicted)) = store.entries.push(key, CacheEntry::new(value, ttl, now)) {
            if evicted.is_expired_at(now) {
                store.stats.evictions_ttl += 1;
            } else {
                debug!("Evicting entry due to capacity limit: {}", evicted_key);
                store.stats.evictions_capacity += 1;
            }
        }
        store.stats.entries = store.entries.len();
    }

    /// Get a live value and mark it most recently used
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key, true)
    }

    /// Like [`BoundedCache::get`], but an expired entry is left in place
    /// so it can still be served by [`BoundedCache::peek_stale`]
    pub fn get_retaining_stale(&self, key: &str) -> Option<V> {
        self.lookup(key, false)
    }

    fn lookup(&self, key: &str, evict_expired: bool) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.store.lock();
        let store = &mut *guard;

        let expired = match store.entries.peek(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return None;
            }
        };

        if expired {
            debug!("Cache entry expired: {}", key);
            store.stats.misses += 1;
            if evict_expired {
                store.entries.pop(key);
                store.stats.evictions_ttl += 1;
                store.stats.entries = store.entries.len();
            }
            return None;
        }

        let entry = store.entries.get_mut(key)?;
        entry.mark_accessed();
        let value = entry.value.clone();
        store.stats.hits += 1;

        debug!("Cache hit: {}", key);
        Some(value)
    }

    /// Read a live value without touching LRU order or stats
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let store = self.store.lock();
        store
            .entries
            .peek(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Read an entry whether or not it has expired, without removing it
    pub fn peek_stale(&self, key: &str) -> Option<V> {
        let store = self.store.lock();
        store.entries.peek(key).map(|entry| entry.value.clone())
    }

    /// Check if a live entry exists; drops the entry if it has expired
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut guard = self.store.lock();
        let store = &mut *guard;

        match store.entries.peek(key) {
            Some(entry) if entry.is_expired_at(now) => {
                store.entries.pop(key);
                store.stats.evictions_ttl += 1;
                store.stats.entries = store.entries.len();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove an entry, returning its value if it was still live
    pub fn delete(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.store.lock();
        let store = &mut *guard;

        let entry = store.entries.pop(key)?;
        store.stats.entries = store.entries.len();

        if entry.is_expired_at(now) {
            store.stats.evictions_ttl += 1;
            None
        } else {
            debug!("Removed cache entry: {}", key);
            store.stats.invalidations += 1;
            Some(entry.value)
        }
    }

    /// Remaining TTL of a live entry; `None` if missing, expired or unbounded
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let store = self.store.lock();
        store
            .entries
            .peek(key)
            .and_then(|entry| entry.time_until_expiration(now))
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        let mut store = self.store.lock();
        let count = store.entries.len();
        store.entries.clear();
        store.stats.entries = 0;
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
    }

    /// Remove all expired entries
    pub fn cleanup_expired(&self) -> Vec<InvalidationEvent> {
        let now = self.clock.now();
        let mut guard = self.store.lock();
        let store = &mut *guard;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return Vec::new();
        }

        for key in &expired_keys {
            store.entries.pop(key);
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;
        store.stats.entries = store.entries.len();

        debug!("Cleaned up {} expired entries", expired_keys.len());

        let count = expired_keys.len();
        vec![InvalidationEvent::new(InvalidationReason::Expired, expired_keys)
            .with_context(format!("Cleaned up {} expired entries", count))]
    }

    /// Live keys from least to most recently used
    pub fn keys(&self) -> Vec<CacheKey> {
        let now = self.clock.now();
        let store = self.store.lock();
        let mut keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.reverse();
        keys
    }

    /// Live keys matching a prefix or glob pattern
    pub fn keys_matching(&self, pattern: &str) -> Vec<CacheKey> {
        self.keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats.clone()
    }

    /// Number of stored entries, including expired ones not yet collected
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.store.lock().entries.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL used by [`BoundedCache::insert`]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Start the periodic sweep of expired entries
    pub fn start_auto_cleanup(self: &Arc<Self>, interval: Duration) -> Scheduler {
        let cache = Arc::clone(self);
        Scheduler::start("bounded-cache-sweep", interval, move || {
            let cache = Arc::clone(&cache);
            async move {
                let events = cache.cleanup_expired();
                if !events.is_empty() {
                    debug!("Auto cleanup: {} events", events.len());
                }
            }
        })
    }
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock();
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("entries", &store.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
