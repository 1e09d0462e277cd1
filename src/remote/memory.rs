//! In-process [`RemoteStore`] for local development and tests

use super::{KeyTtl, RemoteStore};
use crate::cache::key::glob_match;
use crate::clock::{self, Clock};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline for `ttl` from `now`; a TTL past what `Instant` can hold never expires
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(bytes: Vec<u8>, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            bytes,
            expires_at: ttl.and_then(|ttl| expiry(now, ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// Concurrent map honouring TTLs, counters and glob scans
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    /// Store reading expiry time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value().clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired(now));
        }
        None
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key).map(|v| v.bytes))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, v)| !v.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        Ok(keys
            .iter()
            .map(|key| self.live(key).map(|v| v.bytes))
            .collect())
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        for (key, value) in entries {
            self.entries.insert(key, StoredValue::new(value, ttl, now));
        }
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(b"0".to_vec(), None, now));

        if entry.is_expired(now) {
            *entry = StoredValue::new(b"0".to_vec(), None, now);
        }

        let current: i64 = std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                CacheError::Serialization(format!("value at {} is not an integer", key))
            })?;
        let next = current
            .checked_add(amount)
            .ok_or_else(|| CacheError::Other(format!("increment overflow at {}", key)))?;

        entry.bytes = next.to_string().into_bytes();
        if let Some(ttl) = ttl {
            entry.expires_at = expiry(now, ttl);
        }
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = expiry(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = self.clock.now();
        Ok(match self.live(key) {
            None => KeyTtl::Missing,
            Some(StoredValue {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
