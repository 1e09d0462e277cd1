//! Remote key-value store access
//!
//! [`RemoteStore`] is the byte-level seam to a network store. The
//! [`RemoteStoreClient`] wraps a store with the concerns every caller needs:
//!
//! - a namespace prefix applied to every key
//! - an explicit per-operation timeout
//! - JSON encode on write and decode on read
//! - health checks with degraded-state detection

pub mod config;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::RemoteStoreConfig;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use crate::cache::key::to_glob;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Remaining lifetime of a stored key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists and never expires
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

/// Byte-level operations of a shared key-value store.
///
/// Keys passed here are already namespaced. A `ttl` of `None` stores the
/// value without expiry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()>;

    /// Add `amount` to an integer counter, creating it at zero
    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Returns whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Keys matching a glob pattern
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Health status of the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Store is healthy and responsive
    Healthy,
    /// Store is responsive but slow (above degraded threshold)
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
}

/// Namespaced, timed, typed client over a [`RemoteStore`]
#[derive(Clone)]
pub struct RemoteStoreClient {
    store: Arc<dyn RemoteStore>,
    namespace: String,
    timeout: Duration,
    degraded_threshold_ms: u64,
}

impl RemoteStoreClient {
    /// Wrap a store using the namespace and timeouts from `config`
    pub fn new(store: Arc<dyn RemoteStore>, config: &RemoteStoreConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            timeout: config.timeout,
            degraded_threshold_ms: config.degraded_threshold_ms,
        }
    }

    /// Client over a fresh in-process [`MemoryStore`]
    pub fn in_memory(config: &RemoteStoreConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Connect to a Redis server
    #[cfg(feature = "redis")]
    pub async fn connect(config: &RemoteStoreConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(config)?;
        let client = Self::new(Arc::new(store), config);
        client.timed("connect", client.store.ping()).await?;
        Ok(client)
    }

    /// Key namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn full_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    fn strip_namespace(&self, key: String) -> String {
        if self.namespace.is_empty() {
            return key;
        }
        match key.strip_prefix(&self.namespace).and_then(|k| k.strip_prefix(':')) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    async fn timed<T, F>(&self, context: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Store operation timed out after {:?}: {}", self.timeout, context);
                Err(CacheError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                    context: context.to_string(),
                })
            }
        }
    }

    /// Read and decode a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full = self.full_key(key);
        let raw = self.timed("get", self.store.get(&full)).await?;
        raw.map(|bytes| decode(key, &bytes)).transpose()
    }

    /// Encode and store a value; `None` or zero `ttl` stores without expiry
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let full = self.full_key(key);
        self.timed("set", self.store.set(&full, bytes, normalize(ttl)))
            .await
    }

    /// Delete a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        self.timed("delete", self.store.delete(&full)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        self.timed("exists", self.store.exists(&full)).await
    }

    /// Read several keys at once; missing keys yield `None` in place
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let raw = self.timed("mget", self.store.mget(&full)).await?;

        raw.into_iter()
            .zip(keys)
            .map(|(bytes, key)| bytes.map(|b| decode(key, &b)).transpose())
            .collect()
    }

    /// Store several values with a shared TTL
    pub async fn mset<T: Serialize>(
        &self,
        entries: &[(&str, T)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((self.full_key(key), serde_json::to_vec(value)?));
        }

        self.timed("mset", self.store.mset(encoded, normalize(ttl)))
            .await
    }

    /// Increment an integer counter
    pub async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let full = self.full_key(key);
        self.timed("increment", self.store.increment(&full, amount, normalize(ttl)))
            .await
    }

    /// Set a key's expiry, returning whether the key existed
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let full = self.full_key(key);
        self.timed("expire", self.store.expire(&full, ttl)).await
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let full = self.full_key(key);
        self.timed("ttl", self.store.ttl(&full)).await
    }

    /// Un-namespaced keys matching a prefix or glob pattern
    pub async fn scan_by_prefix(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = self.full_key(&to_glob(pattern));
        let keys = self.timed("scan", self.store.scan(&glob)).await?;
        Ok(keys.into_iter().map(|k| self.strip_namespace(k)).collect())
    }

    /// Ping the store under the configured timeout
    ///
    /// Never fails: errors are reported as an unhealthy result.
    pub async fn health_check(&self) -> HealthCheckResult {
        debug!("Executing store health check (PING)");
        let start = Instant::now();

        let outcome = self.timed("ping", self.store.ping()).await;
        let elapsed = start.elapsed();
        let response_time_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(()) => {
                let status = if response_time_ms > self.degraded_threshold_ms {
                    warn!(
                        "Store health check slow ({}ms > {}ms)",
                        response_time_ms, self.degraded_threshold_ms
                    );
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                HealthCheckResult {
                    status,
                    response_time_ms,
                    timestamp: Utc::now(),
                    error: None,
                }
            }
            Err(e) => {
                error!("Store health check failed: {}", e);
                HealthCheckResult {
                    status: HealthStatus::Unhealthy,
                    response_time_ms,
                    timestamp: Utc::now(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl std::fmt::Debug for RemoteStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreClient")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn normalize(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        CacheError::Serialization(format!("failed to decode value for {}: {}", key, e))
    })
}
