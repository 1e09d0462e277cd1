//! Storage tiers the strategies read from and write to
//!
//! A tier stores JSON values by key. Three are provided:
//!
//! - `BoundedCache<Value>`: in-process only
//! - [`RemoteStoreClient`]: shared remote store only
//! - [`TieredStore`]: a local L1 in front of a remote L2

use crate::cache::store::BoundedCache;
use crate::error::Result;
use crate::remote::RemoteStoreClient;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key-value tier used by the caching strategies.
///
/// A zero `ttl` on write means the value never expires.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn read(&self, key: &str) -> Result<Option<Value>>;

    /// Best-effort read used after `read` failed transiently
    async fn read_stale(&self, key: &str) -> Result<Option<Value>> {
        self.read(key).await
    }

    async fn write(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Returns whether a value was removed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Whether a live value is stored, without promoting or touching it
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    /// Keys matching a prefix or glob pattern
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl CacheTier for BoundedCache<Value> {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn read_stale(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.peek_stale(key))
    }

    async fn write(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.set(key, value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.delete(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.has(key))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(BoundedCache::keys_matching(self, pattern))
    }
}

#[async_trait]
impl CacheTier for RemoteStoreClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn read(&self, key: &str) -> Result<Option<Value>> {
        self.get::<Value>(key).await
    }

    async fn write(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.set(key, &value, Some(ttl)).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.delete(key).await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.exists(key).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.scan_by_prefix(pattern).await
    }
}

/// Local bounded cache (L1) in front of the remote store (L2).
///
/// Remote hits are promoted into L1 for at most `local_ttl`, which bounds
/// how long another process's write can go unseen.
#[derive(Debug, Clone)]
pub struct TieredStore {
    local: Arc<BoundedCache<Value>>,
    remote: RemoteStoreClient,
    local_ttl: Duration,
}

impl TieredStore {
    pub fn new(local: Arc<BoundedCache<Value>>, remote: RemoteStoreClient, local_ttl: Duration) -> Self {
        Self {
            local,
            remote,
            local_ttl,
        }
    }

    pub fn local(&self) -> &Arc<BoundedCache<Value>> {
        &self.local
    }

    pub fn remote(&self) -> &RemoteStoreClient {
        &self.remote
    }

    /// L1 lifetime for a value written with `ttl`
    fn local_ttl_for(&self, ttl: Duration) -> Duration {
        match (ttl.is_zero(), self.local_ttl.is_zero()) {
            (true, _) => self.local_ttl,
            (false, true) => ttl,
            (false, false) => ttl.min(self.local_ttl),
        }
    }
}

#[async_trait]
impl CacheTier for TieredStore {
    fn name(&self) -> &'static str {
        "tiered"
    }

    async fn read(&self, key: &str) -> Result<Option<Value>> {
        // an expired L1 copy stays until L2 answers, as the stale fallback
        if let Some(value) = self.local.get_retaining_stale(key) {
            return Ok(Some(value));
        }

        let value = self.remote.get::<Value>(key).await?;
        match value {
            Some(ref value) => {
                debug!("Promoting remote hit into local tier: {}", key);
                self.local.set(key, value.clone(), self.local_ttl);
            }
            None => {
                self.local.delete(key);
            }
        }
        Ok(value)
    }

    async fn read_stale(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.local.peek_stale(key) {
            debug!("Serving stale local copy: {}", key);
            return Ok(Some(value));
        }
        self.remote.get::<Value>(key).await
    }

    async fn write(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if let Err(e) = self.remote.set(key, &value, Some(ttl)).await {
            // L1 must not hold a value L2 rejected
            warn!("Remote write failed for {}, dropping local copy: {}", key, e);
            self.local.delete(key);
            return Err(e);
        }
        self.local.set(key, value, self.local_ttl_for(ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let local = self.local.delete(key).is_some();
        let remote = self.remote.delete(key).await?;
        Ok(local || remote)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        if self.local.peek(key).is_some() {
            return Ok(true);
        }
        self.remote.exists(key).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = self.remote.scan_by_prefix(pattern).await?;
        keys.extend(self.local.keys_matching(pattern));
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
