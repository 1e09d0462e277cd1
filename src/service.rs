//! Cache service facade
//!
//! [`CacheService`] wires a tier, one write strategy, the invalidation graph
//! and the metrics collector together behind a single object. Nothing is
//! global: every dependency (remote store, clock, metrics, origin writer) is
//! injected through [`CacheServiceBuilder`].
//!
//! ```
//! use ouroboros_cache::{CacheConfig, CacheService, GetOptions, SetOptions, WriteMode};
//! use ouroboros_cache::strategy::writer_fn;
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let service = CacheService::builder()
//!     .config(CacheConfig::small())
//!     .mode(WriteMode::WriteThrough)
//!     .writer(writer_fn(|_key, value| async move { Ok::<_, anyhow::Error>(value) }))
//!     .build()?;
//!
//! service.set("user:1", &"ada", &SetOptions::default()).await?;
//! let fetched = service
//!     .get("user:1", || async { Ok::<_, anyhow::Error>("loaded".to_string()) }, &GetOptions::default())
//!     .await?;
//! assert_eq!(fetched.value, "ada");
//! # Ok(())
//! # }
//! ```

use crate::cache::config::CacheConfig;
use crate::cache::store::BoundedCache;
use crate::cache::types::CacheStats;
use crate::clock::{self, Clock};
use crate::error::{CacheError, Result};
use crate::invalidation::{GraphStats, InvalidationGraph};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::remote::{HealthCheckResult, RemoteStoreClient};
use crate::scheduler::Scheduler;
use crate::strategy::{
    CacheAside, Fetched, FlushReport, GetOptions, OriginWriter, SetOptions, WriteBehind,
    WriteBehindStats, WriteEvent, WriteThrough,
};
use crate::tier::{CacheTier, TieredStore};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How writes reach the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Writes populate the cache only; the caller owns origin writes
    #[default]
    CacheAside,
    /// Origin first, then cache, in the same call
    WriteThrough,
    /// Cache now, origin from a background queue
    WriteBehind,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::CacheAside => write!(f, "cache-aside"),
            WriteMode::WriteThrough => write!(f, "write-through"),
            WriteMode::WriteBehind => write!(f, "write-behind"),
        }
    }
}

enum Strategy {
    CacheAside(CacheAside),
    WriteThrough(WriteThrough),
    WriteBehind(Arc<WriteBehind>),
}

impl Strategy {
    fn reader(&self) -> &CacheAside {
        match self {
            Strategy::CacheAside(s) => s,
            Strategy::WriteThrough(s) => s.reader(),
            Strategy::WriteBehind(s) => s.reader(),
        }
    }
}

/// Builder for [`CacheService`]
#[derive(Default)]
pub struct CacheServiceBuilder {
    config: Option<CacheConfig>,
    mode: Option<WriteMode>,
    remote: Option<RemoteStoreClient>,
    tier: Option<Arc<dyn CacheTier>>,
    writer: Option<Arc<dyn OriginWriter>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CacheServiceBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Put a local L1 in front of this remote store
    pub fn remote(mut self, remote: RemoteStoreClient) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Use a custom tier instead of the built-in local or tiered store
    pub fn tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Default origin writer for write-through and write-behind
    pub fn writer(mut self, writer: Arc<dyn OriginWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<CacheService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mode = self.mode.unwrap_or_default();
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(MetricsCollector::from_config(&config)));
        let clock = self.clock.unwrap_or_else(clock::system);

        let (tier, local): (Arc<dyn CacheTier>, Option<Arc<BoundedCache<Value>>>) =
            match (self.tier, self.remote.clone()) {
                (Some(_), Some(_)) => {
                    return Err(CacheError::Config(
                        "set either a custom tier or a remote store, not both".to_string(),
                    ))
                }
                (Some(tier), None) => (tier, None),
                (None, remote) => {
                    let local = Arc::new(BoundedCache::with_clock(
                        config.capacity,
                        config.default_ttl,
                        clock,
                    )?);
                    let tier: Arc<dyn CacheTier> = match remote {
                        Some(remote) => Arc::new(TieredStore::new(
                            Arc::clone(&local),
                            remote,
                            config.local_ttl,
                        )),
                        None => local.clone(),
                    };
                    (tier, Some(local))
                }
            };

        let strategy = match mode {
            WriteMode::CacheAside => {
                Strategy::CacheAside(CacheAside::new(tier.clone(), metrics.clone(), config.clone()))
            }
            WriteMode::WriteThrough => Strategy::WriteThrough(WriteThrough::new(
                tier.clone(),
                metrics.clone(),
                config.clone(),
            )),
            WriteMode::WriteBehind => Strategy::WriteBehind(Arc::new(WriteBehind::new(
                tier.clone(),
                metrics.clone(),
                config.clone(),
            ))),
        };

        let graph = Arc::new(InvalidationGraph::new(tier.clone(), metrics.clone()));

        info!(
            "Cache service ready (mode: {}, tier: {}, capacity: {})",
            mode,
            tier.name(),
            config.capacity
        );

        Ok(CacheService {
            config,
            mode,
            strategy,
            graph,
            metrics,
            tier,
            local,
            remote: self.remote,
            default_writer: self.writer,
            schedulers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Cache facade: reads, writes, invalidation, stats and lifecycle
pub struct CacheService {
    config: CacheConfig,
    mode: WriteMode,
    strategy: Strategy,
    graph: Arc<InvalidationGraph>,
    metrics: Arc<MetricsCollector>,
    tier: Arc<dyn CacheTier>,
    local: Option<Arc<BoundedCache<Value>>>,
    remote: Option<RemoteStoreClient>,
    default_writer: Option<Arc<dyn OriginWriter>>,
    schedulers: Mutex<Vec<Scheduler>>,
    shut_down: AtomicBool,
}

impl CacheService {
    pub fn builder() -> CacheServiceBuilder {
        CacheServiceBuilder::default()
    }

    /// Return the cached value, or load it with `loader` and cache it
    pub async fn get<T, F, Fut>(&self, key: &str, loader: F, opts: &GetOptions) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.strategy.reader().get(key, loader, opts).await
    }

    /// Write a value through the configured strategy.
    ///
    /// Overwriting a key drops the dependencies and tags it was registered
    /// with; keys depending on it keep their edges.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &SetOptions) -> Result<()> {
        self.ensure_running()?;
        self.write(key, value, opts).await?;
        self.graph.forget(key);
        Ok(())
    }

    /// Write a value, then record its dependencies and tags
    pub async fn set_with_dependencies<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        dependencies: &[&str],
        tags: &[&str],
        opts: &SetOptions,
    ) -> Result<()> {
        self.ensure_running()?;
        self.write(key, value, opts).await?;
        self.graph.register(key, dependencies, tags);
        Ok(())
    }

    /// Remove a single key; its dependents are left in place
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.strategy.reader().delete(key).await?;
        self.graph.forget(key);
        Ok(removed)
    }

    /// Remove `key` and every key depending on it
    pub async fn invalidate(&self, key: &str) -> Vec<String> {
        self.graph.invalidate(key).await.keys
    }

    /// Remove every key tagged `tag`, plus dependents
    pub async fn invalidate_by_tag(&self, tag: &str) -> Vec<String> {
        self.graph.invalidate_by_tag(tag).await.keys
    }

    /// Remove keys matching a prefix or glob, plus dependents
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.graph.invalidate_by_pattern(pattern).await?.keys)
    }

    /// Operation counts and latency percentiles
    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stats of the in-process store, if the service owns one
    pub fn local_stats(&self) -> Option<CacheStats> {
        self.local.as_ref().map(|local| local.stats())
    }

    pub fn graph_stats(&self) -> GraphStats {
        self.graph.stats()
    }

    pub fn write_behind_stats(&self) -> Option<WriteBehindStats> {
        match &self.strategy {
            Strategy::WriteBehind(s) => Some(s.stats()),
            _ => None,
        }
    }

    /// Subscribe to write-behind outcome events
    pub fn write_events(&self) -> Option<broadcast::Receiver<WriteEvent>> {
        match &self.strategy {
            Strategy::WriteBehind(s) => Some(s.subscribe()),
            _ => None,
        }
    }

    /// Ping the remote store, if one is configured
    pub async fn health_check(&self) -> Option<HealthCheckResult> {
        match &self.remote {
            Some(remote) => Some(remote.health_check().await),
            None => None,
        }
    }

    /// Start background work: the write-behind flusher and, when enabled,
    /// the expired-entry sweep of the local store. Calling twice is a no-op.
    pub fn start(&self) {
        let mut schedulers = self.schedulers.lock();
        if !schedulers.is_empty() || self.is_shut_down() {
            debug!("Cache service already started or shut down");
            return;
        }

        if let Strategy::WriteBehind(s) = &self.strategy {
            schedulers.push(s.start());
        }
        if self.config.enable_auto_cleanup {
            if let Some(local) = &self.local {
                schedulers.push(local.start_auto_cleanup(self.config.cleanup_interval));
            }
            schedulers.push(self.graph.start_pruning(self.config.cleanup_interval));
        }

        info!("Cache service started {} background tasks", schedulers.len());
    }

    /// Stop background work and drain the write-behind queue.
    ///
    /// Ops not committed within `deadline` are reported as abandoned and
    /// counted in `remaining`. Later writes are rejected.
    pub async fn shutdown(&self, deadline: Option<Duration>) -> FlushReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            warn!("Cache service shutdown called twice");
        }

        let started = tokio::time::Instant::now();
        let left = |d: Duration| d.saturating_sub(started.elapsed());

        let schedulers = std::mem::take(&mut *self.schedulers.lock());
        for mut scheduler in schedulers {
            match deadline {
                // an aborted flush tick leaves its ops in flight for force_flush to claim
                Some(d) => {
                    scheduler.shutdown_within(left(d)).await;
                }
                None => scheduler.shutdown().await,
            }
        }

        let report = match &self.strategy {
            Strategy::WriteBehind(s) => {
                let report = s.force_flush(deadline.map(left)).await;
                s.close();
                report
            }
            _ => FlushReport::default(),
        };

        info!(
            "Cache service shut down: {} processed, {} remaining",
            report.processed, report.remaining
        );
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tier(&self) -> &Arc<dyn CacheTier> {
        &self.tier
    }

    pub fn local(&self) -> Option<&Arc<BoundedCache<Value>>> {
        self.local.as_ref()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn graph(&self) -> &InvalidationGraph {
        &self.graph
    }

    /// The write-behind strategy, for stepping flushes directly
    pub fn write_behind(&self) -> Option<&Arc<WriteBehind>> {
        match &self.strategy {
            Strategy::WriteBehind(s) => Some(s),
            _ => None,
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &SetOptions) -> Result<()> {
        match &self.strategy {
            Strategy::CacheAside(s) => s.set(key, value, opts.ttl).await,
            Strategy::WriteThrough(s) => {
                let writer = self.writer_for(opts)?;
                s.set(key, value, writer.as_ref(), opts).await.map(|_| ())
            }
            Strategy::WriteBehind(s) => {
                let writer = self.writer_for(opts)?;
                s.set(key, value, writer, opts).await
            }
        }
    }

    fn writer_for(&self, opts: &SetOptions) -> Result<Arc<dyn OriginWriter>> {
        opts.writer
            .clone()
            .or_else(|| self.default_writer.clone())
            .ok_or_else(|| {
                CacheError::Config(format!("{} writes need an origin writer", self.mode))
            })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(CacheError::Other("cache service is shut down".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("mode", &self.mode)
            .field("tier", &self.tier.name())
            .field("graph", &self.graph.stats())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
