//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ouroboros_cache::remote::KeyTtl;
use ouroboros_cache::strategy::{writer_fn, OriginWriter};
use ouroboros_cache::{CacheError, MemoryStore, RemoteStore, RemoteStoreClient, RemoteStoreConfig, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness (`RUST_LOG=debug`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// [`MemoryStore`] with injectable transient failures
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` reads (get, mget, exists, ttl, scan)
    pub fn fail_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes (set, mset, delete, increment, expire)
    pub fn fail_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail every operation until brought back up
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, budget: &AtomicUsize, op: &str) -> Result<()> {
        let injected = self.down.load(Ordering::SeqCst)
            || budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(CacheError::TransientStore(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        self.check(&self.failing_reads, "read")
    }

    fn check_write(&self) -> Result<()> {
        self.check(&self.failing_writes, "write")
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_write()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_write()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_read()?;
        self.inner.exists(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_read()?;
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        self.check_write()?;
        self.inner.mset(entries, ttl).await
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        self.check_write()?;
        self.inner.increment(key, amount, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_write()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check_read()?;
        self.inner.ttl(key).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_read()?;
        self.inner.scan(pattern).await
    }

    async fn ping(&self) -> Result<()> {
        self.check_read()?;
        self.inner.ping().await
    }
}

/// Client over a [`FlakyStore`] with a short timeout
pub fn flaky_client() -> (RemoteStoreClient, Arc<FlakyStore>) {
    let store = FlakyStore::new();
    let config = RemoteStoreConfig::default().with_timeout(Duration::from_millis(500));
    (RemoteStoreClient::new(store.clone(), &config), store)
}

/// Writer that records every call and fails the first `failures` of them
pub fn recording_writer(failures: usize) -> (Arc<dyn OriginWriter>, Arc<parking_lot::Mutex<Vec<(String, Value)>>>) {
    let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let remaining = Arc::new(AtomicUsize::new(failures));

    let log = calls.clone();
    let writer = writer_fn(move |key, value| {
        let log = log.clone();
        let remaining = remaining.clone();
        async move {
            log.lock().push((key.clone(), value.clone()));
            let failed = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                anyhow::bail!("origin unavailable for {}", key);
            }
            Ok(value)
        }
    });

    (writer, calls)
}
