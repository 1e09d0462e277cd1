//! Cache-aside reads: check the tier, load from origin on miss

use super::{Fetched, GetOptions, Source};
use crate::cache::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics::{MetricsCollector, Operation};
use crate::tier::CacheTier;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Read-through over a tier with an optional stale fallback.
///
/// Also the shared read path of [`WriteThrough`](super::WriteThrough) and
/// [`WriteBehind`](super::WriteBehind).
#[derive(Clone)]
pub struct CacheAside {
    tier: Arc<dyn CacheTier>,
    metrics: Arc<MetricsCollector>,
    config: CacheConfig,
}

impl CacheAside {
    pub fn new(tier: Arc<dyn CacheTier>, metrics: Arc<MetricsCollector>, config: CacheConfig) -> Self {
        Self {
            tier,
            metrics,
            config,
        }
    }

    pub fn tier(&self) -> &Arc<dyn CacheTier> {
        &self.tier
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Effective TTL for a write: explicit or default, with jitter
    pub(crate) fn ttl_for(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(ttl) => self.config.jittered(ttl),
            None => self.config.ttl_with_jitter(),
        }
    }

    pub(crate) fn record(&self, operation: Operation, key: &str, start: Instant) {
        self.metrics.record(operation, key, start.elapsed());
    }

    /// Return the cached value or load, cache and return a fresh one.
    ///
    /// A store read that fails transiently with `fallback_on_error` set
    /// serves a stale cached value when one exists, otherwise falls through
    /// to the loader. Other store errors are returned as-is. A failure to
    /// cache the loaded value is logged and does not fail the read.
    pub async fn get<T, F, Fut>(&self, key: &str, loader: F, opts: &GetOptions) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let start = Instant::now();

        if !opts.force_refresh {
            match self.tier.read(key).await {
                Ok(Some(value)) => {
                    let value = self.decode(key, value, start)?;
                    self.record(Operation::Hit, key, start);
                    debug!("Cache-aside hit ({}): {}", self.tier.name(), key);
                    return Ok(Fetched::new(value, Source::Cache));
                }
                Ok(None) => {
                    self.record(Operation::Miss, key, start);
                    debug!("Cache-aside miss ({}): {}", self.tier.name(), key);
                }
                Err(e) if e.is_transient() && opts.fallback_on_error => {
                    self.record(Operation::Error, key, start);
                    warn!("Store read failed for {}, trying stale value: {}", key, e);

                    if let Some(stale) = self.read_stale(key).await {
                        let value = self.decode(key, stale, start)?;
                        return Ok(Fetched::new(value, Source::CacheStale));
                    }
                    debug!("No stale value for {}, loading from origin", key);
                }
                Err(e) => {
                    self.record(Operation::Error, key, start);
                    return Err(e);
                }
            }
        } else {
            debug!("Forced refresh: {}", key);
        }

        let value = match loader().await {
            Ok(value) => value,
            Err(e) => {
                self.record(Operation::Error, key, start);
                return Err(CacheError::from(e));
            }
        };

        let encoded = serde_json::to_value(&value)?;
        self.store(key, encoded, opts.ttl).await;

        Ok(Fetched::new(value, Source::Origin))
    }

    /// Read a cached value without loading
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let start = Instant::now();
        match self.tier.read(key).await {
            Ok(Some(value)) => {
                let value = self.decode(key, value, start)?;
                self.record(Operation::Hit, key, start);
                Ok(Some(value))
            }
            Ok(None) => {
                self.record(Operation::Miss, key, start);
                Ok(None)
            }
            Err(e) => {
                self.record(Operation::Error, key, start);
                Err(e)
            }
        }
    }

    /// Write a value into the tier
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let encoded = serde_json::to_value(value)?;
        let start = Instant::now();
        match self.tier.write(key, encoded, self.ttl_for(ttl)).await {
            Ok(()) => {
                self.record(Operation::Set, key, start);
                Ok(())
            }
            Err(e) => {
                self.record(Operation::Error, key, start);
                Err(e)
            }
        }
    }

    /// Remove a value from the tier
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let start = Instant::now();
        match self.tier.remove(key).await {
            Ok(removed) => {
                self.record(Operation::Delete, key, start);
                Ok(removed)
            }
            Err(e) => {
                self.record(Operation::Error, key, start);
                Err(e)
            }
        }
    }

    /// Best-effort cache write; failures are logged and counted
    pub(crate) async fn store(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        let start = Instant::now();
        match self.tier.write(key, value, self.ttl_for(ttl)).await {
            Ok(()) => {
                self.record(Operation::Set, key, start);
                true
            }
            Err(e) => {
                self.record(Operation::Error, key, start);
                warn!("Failed to cache value for {}: {}", key, e);
                false
            }
        }
    }

    async fn read_stale(&self, key: &str) -> Option<Value> {
        match self.tier.read_stale(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Stale read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, value: Value, start: Instant) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            self.record(Operation::Error, key, start);
            CacheError::Serialization(format!("cached value for {} has unexpected shape: {}", key, e))
        })
    }
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("tier", &self.tier.name())
            .field("default_ttl", &self.config.default_ttl)
            .finish()
    }
}
