//! Redis-backed [`RemoteStore`] over a `deadpool-redis` pool

use super::{KeyTtl, RemoteStore, RemoteStoreConfig};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per `SCAN` round trip
const SCAN_COUNT: usize = 500;

/// Pooled Redis connection
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build the connection pool; connections are opened lazily
    pub fn connect(config: &RemoteStoreConfig) -> Result<Self> {
        info!(
            "Creating Redis pool for {}:{} (database: {}, pool_size: {})",
            config.host, config.port, config.database, config.pool_size
        );

        let mut redis_config = Config::from_url(config.url());
        let pool_config = redis_config.pool.get_or_insert_with(PoolConfig::default);
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(config.timeout);
        pool_config.timeouts.create = Some(config.timeout);
        pool_config.timeouts.recycle = Some(config.timeout);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Config(format!("failed to create Redis pool: {}", e)))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(ttl));
            }
            cmd.ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!("MSET {} keys", entries.len());
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCRBY").arg(key).arg(amount);
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let (value,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(set == 1)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.conn().await?;
        let remaining: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(match remaining {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms if ms >= 0 => KeyTtl::Expires(Duration::from_millis(ms as u64)),
            other => {
                return Err(CacheError::TransientStore(format!(
                    "unexpected PTTL reply {} for {}",
                    other, key
                )))
            }
        })
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        debug!("SCAN {} matched {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisStore")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}
