//! Read and write strategies over a [`CacheTier`](crate::tier::CacheTier)
//!
//! - [`CacheAside`]: read from the tier, load from origin on miss
//! - [`WriteThrough`]: commit to origin first, then cache
//! - [`WriteBehind`]: cache now, commit to origin from a background queue

pub mod cache_aside;
pub mod write_behind;
pub mod write_through;

pub use cache_aside::CacheAside;
pub use write_behind::{FlushReport, WriteBehind, WriteBehindStats, WriteEvent, WriteOp};
pub use write_through::WriteThrough;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Where a fetched value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Live cached value
    Cache,
    /// Possibly stale cached value served after a store failure
    CacheStale,
    /// Freshly loaded from the origin
    Origin,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Cache => write!(f, "cache"),
            Source::CacheStale => write!(f, "cache_stale"),
            Source::Origin => write!(f, "origin"),
        }
    }
}

/// A value together with its [`Source`]
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Fetched<T> {
    pub fn new(value: T, source: Source) -> Self {
        Self { value, source }
    }

    /// Whether the value was served from cache (fresh or stale)
    pub fn from_cache(&self) -> bool {
        matches!(self.source, Source::Cache | Source::CacheStale)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Options for a read
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// TTL for a value loaded on miss (`None` = configured default)
    pub ttl: Option<Duration>,

    /// Skip the cache and reload from origin
    pub force_refresh: bool,

    /// Serve a stale cached value if the store read fails transiently
    pub fallback_on_error: bool,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn fallback_on_error(mut self) -> Self {
        self.fallback_on_error = true;
        self
    }
}

/// Options for a write
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Entry TTL (`None` = configured default, zero = never expires)
    pub ttl: Option<Duration>,

    /// Write-behind only: commit to origin before returning
    pub immediate: bool,

    /// Origin writer overriding the service default
    pub writer: Option<Arc<dyn OriginWriter>>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn OriginWriter>) -> Self {
        self.writer = Some(writer);
        self
    }
}

impl fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetOptions")
            .field("ttl", &self.ttl)
            .field("immediate", &self.immediate)
            .field("writer", &self.writer.is_some())
            .finish()
    }
}

/// Commits a value to the system of record.
///
/// Returns the value as stored, which may differ from the input
/// (generated ids, timestamps).
#[async_trait]
pub trait OriginWriter: Send + Sync {
    async fn write(&self, key: &str, value: Value) -> anyhow::Result<Value>;
}

struct FnWriter<F>(F);

#[async_trait]
impl<F, Fut> OriginWriter for FnWriter<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn write(&self, key: &str, value: Value) -> anyhow::Result<Value> {
        (self.0)(key.to_string(), value).await
    }
}

/// Wrap an async closure as an [`OriginWriter`]
///
/// ```
/// use ouroboros_cache::strategy::writer_fn;
///
/// let writer = writer_fn(|_key, value| async move { Ok::<_, anyhow::Error>(value) });
/// # let _ = writer;
/// ```
pub fn writer_fn<F, Fut>(f: F) -> Arc<dyn OriginWriter>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnWriter(f))
}
