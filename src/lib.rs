//! # Ouroboros Cache (ouroboros-cache)
//!
//! A multi-tier caching library for Rust: a bounded in-process store, a
//! remote key-value store client, three read/write strategies and
//! dependency-aware invalidation.
//!
//! ## Features
//!
//! - LRU eviction with per-entry TTL and lazy expiry
//! - Remote store abstraction with namespacing, timeouts and health checks
//! - Cache-aside, write-through and write-behind strategies
//! - Write-behind queue with batching, bounded retries and outcome events
//! - Cascading invalidation by key, tag and pattern
//! - Hit rate, latency percentiles, hot and slow key reports
//!
//! ## Cache-Aside Reads
//!
//! ```
//! use ouroboros_cache::{CacheService, GetOptions, Source};
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let service = CacheService::builder().build()?;
//!
//! let fetched = service
//!     .get("user:1", || async { Ok::<_, anyhow::Error>("ada".to_string()) }, &GetOptions::default())
//!     .await?;
//! assert_eq!(fetched.source, Source::Origin);
//!
//! let fetched = service
//!     .get("user:1", || async { Ok::<_, anyhow::Error>("unused".to_string()) }, &GetOptions::default())
//!     .await?;
//! assert_eq!(fetched.source, Source::Cache);
//! # Ok(())
//! # }
//! ```
//!
//! ## Write-Behind with a Remote Store
//!
//! ```no_run
//! use ouroboros_cache::{
//!     CacheConfig, CacheService, RemoteStoreClient, RemoteStoreConfig, SetOptions, WriteMode,
//! };
//! use ouroboros_cache::strategy::writer_fn;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let remote = RemoteStoreClient::in_memory(&RemoteStoreConfig::from_env()?);
//!
//!     let service = CacheService::builder()
//!         .config(CacheConfig::from_env()?)
//!         .remote(remote)
//!         .mode(WriteMode::WriteBehind)
//!         .writer(writer_fn(|key, value| async move {
//!             println!("persisting {}", key);
//!             Ok::<_, anyhow::Error>(value)
//!         }))
//!         .build()?;
//!     service.start();
//!
//!     service.set("order:42", &serde_json::json!({"total": 10}), &SetOptions::default()).await?;
//!
//!     let report = service.shutdown(Some(Duration::from_secs(5))).await;
//!     println!("Flushed {}, {} left", report.processed, report.remaining);
//!     Ok(())
//! }
//! ```
//!
//! ## Dependency Invalidation
//!
//! ```
//! use ouroboros_cache::{CacheService, SetOptions};
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let service = CacheService::builder().build()?;
//! let opts = SetOptions::default();
//!
//! service.set("user:1", &"ada", &opts).await?;
//! service.set_with_dependencies("profile:1", &"...", &["user:1"], &["profiles"], &opts).await?;
//!
//! let removed = service.invalidate("user:1").await;
//! assert_eq!(removed, vec!["user:1", "profile:1"]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod invalidation;
pub mod metrics;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod strategy;
pub mod tier;

// Re-export main types for convenience
pub use cache::{BoundedCache, CacheConfig, CacheConfigBuilder, CacheKeyBuilder, CacheStats, WriteBehindConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result};
pub use invalidation::{InvalidationEvent, InvalidationGraph, InvalidationReason};
pub use metrics::{MetricsCollector, MetricsSnapshot, Operation};
pub use remote::{
    HealthCheckResult, HealthStatus, KeyTtl, MemoryStore, RemoteStore, RemoteStoreClient,
    RemoteStoreConfig,
};
#[cfg(feature = "redis")]
pub use remote::RedisStore;
pub use scheduler::Scheduler;
pub use service::{CacheService, CacheServiceBuilder, WriteMode};
pub use strategy::{
    CacheAside, Fetched, FlushReport, GetOptions, OriginWriter, SetOptions, Source, WriteBehind,
    WriteEvent, WriteThrough,
};
pub use tier::{CacheTier, TieredStore};
