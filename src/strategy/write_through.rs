//! Write-through: commit to origin, then cache what the origin stored

use super::{CacheAside, Fetched, GetOptions, OriginWriter, SetOptions};
use crate::cache::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics::{MetricsCollector, Operation};
use crate::tier::CacheTier;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Synchronous origin-then-cache writes with cache-aside reads
#[derive(Debug, Clone)]
pub struct WriteThrough {
    reader: CacheAside,
}

impl WriteThrough {
    pub fn new(tier: Arc<dyn CacheTier>, metrics: Arc<MetricsCollector>, config: CacheConfig) -> Self {
        Self {
            reader: CacheAside::new(tier, metrics, config),
        }
    }

    /// Read path, identical to cache-aside
    pub async fn get<T, F, Fut>(&self, key: &str, loader: F, opts: &GetOptions) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.reader.get(key, loader, opts).await
    }

    /// Write to the origin, then cache the stored value.
    ///
    /// An origin failure is returned and the cache is left untouched. If the
    /// origin commits but the cache write fails, the cached copy is dropped
    /// so later reads reload the committed value.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        writer: &dyn OriginWriter,
        opts: &SetOptions,
    ) -> Result<Value> {
        let payload = serde_json::to_value(value)?;
        let start = Instant::now();

        let stored = match writer.write(key, payload).await {
            Ok(stored) => stored,
            Err(e) => {
                self.reader.record(Operation::Error, key, start);
                warn!("Origin write failed for {}: {:#}", key, e);
                return Err(CacheError::from(e));
            }
        };
        debug!("Origin committed {}", key);

        let ttl = self.reader.ttl_for(opts.ttl);
        if let Err(e) = self.reader.tier().write(key, stored.clone(), ttl).await {
            self.reader.record(Operation::Error, key, start);
            warn!("Cache write after origin commit failed for {}: {}", key, e);
            if let Err(remove_err) = self.reader.tier().remove(key).await {
                warn!("Could not drop cached copy of {}: {}", key, remove_err);
            }
            return Err(e);
        }

        self.reader.record(Operation::Set, key, start);
        Ok(stored)
    }

    pub fn reader(&self) -> &CacheAside {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::BoundedCache;
    use crate::strategy::writer_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn strategy() -> (WriteThrough, Arc<BoundedCache<Value>>) {
        let local = Arc::new(BoundedCache::with_capacity(16, Duration::ZERO).unwrap());
        let strategy = WriteThrough::new(
            local.clone(),
            Arc::new(MetricsCollector::new(100, 100)),
            CacheConfig::default(),
        );
        (strategy, local)
    }

    #[tokio::test]
    async fn test_caches_value_returned_by_origin() {
        let (strategy, local) = strategy();
        let writer = writer_fn(|_key, mut value| async move {
            value["id"] = json!(7);
            Ok::<_, anyhow::Error>(value)
        });

        let stored = strategy
            .set("user", &json!({"name": "ada"}), writer.as_ref(), &SetOptions::default())
            .await
            .unwrap();

        assert_eq!(stored, json!({"name": "ada", "id": 7}));
        assert_eq!(local.peek("user"), Some(stored));
    }

    #[tokio::test]
    async fn test_origin_failure_skips_cache() {
        let (strategy, local) = strategy();
        local.insert("user", json!("old"));
        let writer = writer_fn(|_key, _value| async move {
            Err::<Value, _>(anyhow::anyhow!("constraint violation"))
        });

        let err = strategy
            .set("user", &json!("new"), writer.as_ref(), &SetOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Origin(_)));
        assert_eq!(local.peek("user"), Some(json!("old")));
    }

    #[tokio::test]
    async fn test_origin_written_before_cache() {
        let (strategy, local) = strategy();
        let seen_in_cache = Arc::new(AtomicUsize::new(0));

        let cache = local.clone();
        let seen = seen_in_cache.clone();
        let writer = writer_fn(move |key, value| {
            let cache = cache.clone();
            let seen = seen.clone();
            async move {
                if cache.peek(&key).is_some() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, anyhow::Error>(value)
            }
        });

        strategy
            .set("k", &1u32, writer.as_ref(), &SetOptions::default())
            .await
            .unwrap();

        assert_eq!(seen_in_cache.load(Ordering::SeqCst), 0);
        assert_eq!(local.peek("k"), Some(json!(1)));
    }
}
