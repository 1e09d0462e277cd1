//! Cache entry management with TTL support

use std::time::{Duration, Instant};

/// A bounded-cache entry with TTL and access metadata
///
/// LRU position lives in the owning cache's access-ordered map, not here.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,

    /// When the entry was written
    pub created_at: Instant,

    /// Time-to-live (zero = never expires)
    pub ttl: Duration,

    /// Number of times this entry has been read
    pub access_count: u64,

    /// Version number (incremented on overwrite)
    pub version: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new entry written at `now`
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
            access_count: 0,
            version: 1,
        }
    }

    /// Whether the entry never expires
    pub fn is_unbounded(&self) -> bool {
        self.ttl.is_zero()
    }

    /// Check if the entry has expired as of `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        !self.is_unbounded() && self.age_at(now) > self.ttl
    }

    /// Get time until expiration; `None` for unbounded or already expired entries
    pub fn time_until_expiration(&self, now: Instant) -> Option<Duration> {
        if self.is_unbounded() {
            return None;
        }
        self.ttl.checked_sub(self.age_at(now))
    }

    /// Get the age of the entry
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Mark the entry as accessed
    pub fn mark_accessed(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Replace the value and restart expiry
    pub fn update_value(&mut self, new_value: V, ttl: Duration, now: Instant) {
        self.value = new_value;
        self.ttl = ttl;
        self.created_at = now;
        self.version += 1;
    }
}
