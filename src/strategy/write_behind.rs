//! Write-behind: cache synchronously, commit to origin from a queue
//!
//! Each `set` writes the tier and enqueues a [`WriteOp`]. A flush takes up
//! to `batch_size` ops from the front of the queue and runs their writers
//! concurrently. Per op:
//!
//! ```text
//! queued -> attempting -> committed
//!                      -> queued (retry_count + 1)
//!                      -> abandoned (retry_count reached max_retries)
//! ```
//!
//! The queue is keyed by cache key: a newer write replaces a queued one
//! for the same key, and a failed op is only requeued when nothing newer
//! arrived meanwhile. Outcomes are published on a broadcast channel of
//! [`WriteEvent`]s; the caller of `set` never sees them as errors.
//!
//! Ops taken by a flush are tracked until their attempt resolves. A
//! deadline-bound `force_flush` claims whatever is still in flight, so an
//! attempt that outlives the deadline is reported once as abandoned and its
//! late result is discarded.

use super::{CacheAside, Fetched, GetOptions, OriginWriter, SetOptions};
use crate::cache::config::{CacheConfig, WriteBehindConfig};
use crate::error::{CacheError, Result};
use crate::metrics::{MetricsCollector, Operation};
use crate::scheduler::Scheduler;
use crate::tier::CacheTier;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

/// A pending origin write
pub struct WriteOp {
    pub id: Uuid,
    pub key: String,
    pub payload: Value,
    writer: Arc<dyn OriginWriter>,
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
}

impl WriteOp {
    pub fn new(key: impl Into<String>, payload: Value, writer: Arc<dyn OriginWriter>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            payload,
            writer,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    async fn attempt(&self) -> anyhow::Result<Value> {
        self.writer.write(&self.key, self.payload.clone()).await
    }
}

impl std::fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOp")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("enqueued_at", &self.enqueued_at)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// Outcome notifications for queued writes
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEvent {
    /// Op accepted into the queue
    Queued { id: Uuid, key: String },

    /// Origin accepted the write
    Committed {
        id: Uuid,
        key: String,
        attempts: u32,
        stored: Value,
    },

    /// Attempt failed; op returned to the queue
    Retrying {
        id: Uuid,
        key: String,
        attempts: u32,
        error: String,
    },

    /// Op dropped after exhausting retries or missing the flush deadline
    Abandoned {
        id: Uuid,
        key: String,
        attempts: u32,
        error: String,
    },
}

impl WriteEvent {
    pub fn key(&self) -> &str {
        match self {
            WriteEvent::Queued { key, .. }
            | WriteEvent::Committed { key, .. }
            | WriteEvent::Retrying { key, .. }
            | WriteEvent::Abandoned { key, .. } => key,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WriteEvent::Committed { .. } | WriteEvent::Abandoned { .. })
    }

    /// The failure carried by an abandon event
    pub fn failure(&self) -> Option<CacheError> {
        match self {
            WriteEvent::Abandoned {
                key,
                attempts,
                error,
                ..
            } => Some(CacheError::WriteFailure {
                key: key.clone(),
                attempts: *attempts,
                reason: error.clone(),
            }),
            _ => None,
        }
    }
}

/// Result of a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Ops that reached a terminal state (committed or abandoned)
    pub processed: usize,
    pub committed: usize,
    /// Ops abandoned after exhausting retries
    pub failed: usize,
    /// Ops left uncommitted when the flush stopped
    pub remaining: usize,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.processed += other.processed;
        self.committed += other.committed;
        self.failed += other.failed;
        self.remaining = other.remaining;
    }
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBehindStats {
    pub pending: usize,
    pub queued: u64,
    pub superseded: u64,
    pub committed: u64,
    pub retried: u64,
    pub abandoned: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    superseded: AtomicU64,
    committed: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

/// Write-behind strategy with a keyed queue and batch flushing
pub struct WriteBehind {
    reader: CacheAside,
    config: WriteBehindConfig,
    queue: Mutex<IndexMap<String, WriteOp>>,
    /// Serializes flushes; the queue has a single consumer at a time
    flush_lock: tokio::sync::Mutex<()>,
    /// Ops taken by a flush whose attempt has not resolved: id -> (key, retry_count)
    in_flight: Mutex<HashMap<Uuid, (String, u32)>>,
    /// Set on shutdown; no new ops are queued and failed ones are not retried
    closed: AtomicBool,
    events: broadcast::Sender<WriteEvent>,
    counters: Counters,
}

impl WriteBehind {
    pub fn new(tier: Arc<dyn CacheTier>, metrics: Arc<MetricsCollector>, config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let write_behind = config.write_behind.clone();

        Self {
            reader: CacheAside::new(tier, metrics, config),
            config: write_behind,
            queue: Mutex::new(IndexMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            events,
            counters: Counters::default(),
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

    /// Cache `value` now and queue the origin write.
    ///
    /// Only serialization fails the call. A failed cache write is logged
    /// and the op is still queued. With `opts.immediate` the origin write
    /// happens before returning and its error is returned.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        writer: Arc<dyn OriginWriter>,
        opts: &SetOptions,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::Other("write-behind queue is closed".to_string()));
        }
        let payload = serde_json::to_value(value)?;

        if opts.immediate {
            return self.commit_now(key, payload, writer, opts).await;
        }

        self.reader.store(key, payload.clone(), opts.ttl).await;

        let op = WriteOp::new(key, payload, writer);
        let id = op.id;
        let replaced = self.queue.lock().insert(key.to_string(), op);

        if let Some(previous) = replaced {
            debug!("Queued write {} supersedes {} for {}", id, previous.id, key);
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.emit(WriteEvent::Queued {
            id,
            key: key.to_string(),
        });

        Ok(())
    }

    /// Synchronous origin commit that bypasses the queue
    async fn commit_now(
        &self,
        key: &str,
        payload: Value,
        writer: Arc<dyn OriginWriter>,
        opts: &SetOptions,
    ) -> Result<()> {
        // an older queued write must not land after this one
        let superseded = self.queue.lock().shift_remove(key);
        if superseded.is_some() {
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
        }

        let op = WriteOp::new(key, payload, writer);
        let start = Instant::now();

        match op.attempt().await {
            Ok(stored) => {
                self.reader.store(key, stored.clone(), opts.ttl).await;
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                self.emit(WriteEvent::Committed {
                    id: op.id,
                    key: op.key,
                    attempts: 1,
                    stored,
                });
                Ok(())
            }
            Err(e) => {
                self.reader.record(Operation::Error, key, start);
                warn!("Immediate write failed for {}: {:#}", key, e);
                Err(CacheError::from(e))
            }
        }
    }

    /// Run one batch from the front of the queue
    pub async fn flush_once(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let batch = self.take_batch();
        self.run_batch(batch).await
    }

    /// Drain the queue, stopping at `deadline` if given.
    ///
    /// Ops still queued or in flight when the deadline passes are
    /// abandoned and counted as remaining, including ops held by a flush
    /// running elsewhere.
    pub async fn force_flush(&self, deadline: Option<Duration>) -> FlushReport {
        // a deadline too far out to represent is no deadline
        let until = deadline.and_then(|d| tokio::time::Instant::now().checked_add(d));
        let mut report = FlushReport::default();

        let guard = match until {
            Some(until) => tokio::time::timeout_at(until, self.flush_lock.lock()).await.ok(),
            None => Some(self.flush_lock.lock().await),
        };

        if guard.is_some() {
            loop {
                if self.pending() == 0 {
                    break;
                }
                if until.is_some_and(|t| tokio::time::Instant::now() >= t) {
                    break;
                }

                let batch = self.take_batch();
                let outcome = match until {
                    Some(until) => tokio::time::timeout_at(until, self.run_batch(batch)).await.ok(),
                    None => Some(self.run_batch(batch).await),
                };

                match outcome {
                    Some(batch_report) => report.merge(batch_report),
                    None => {
                        warn!("Flush deadline passed with writes in flight");
                        break;
                    }
                }
            }
        } else {
            warn!("Flush deadline passed while waiting for a running flush");
        }

        let stranded: Vec<(Uuid, (String, u32))> = self.in_flight.lock().drain().collect();
        for (id, (key, attempts)) in &stranded {
            self.abandon(*id, key.clone(), *attempts, "flush deadline exceeded while in flight");
        }

        let leftover: Vec<WriteOp> = self.queue.lock().drain(..).map(|(_, op)| op).collect();
        for op in &leftover {
            self.abandon(op.id, op.key.clone(), op.retry_count, "flush deadline exceeded");
        }

        report.remaining = leftover.len() + stranded.len();
        info!(
            "Force flush finished: {} processed ({} committed, {} failed), {} remaining",
            report.processed, report.committed, report.failed, report.remaining
        );
        report
    }

    /// Stop accepting writes. Later failures are abandoned instead of requeued.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Write-behind queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start the periodic flush
    pub fn start(self: &Arc<Self>) -> Scheduler {
        let strategy = Arc::clone(self);
        Scheduler::start("write-behind-flush", self.config.flush_interval, move || {
            let strategy = Arc::clone(&strategy);
            async move {
                let report = strategy.flush_once().await;
                if report.processed > 0 || report.remaining > 0 {
                    debug!(
                        "Write-behind flush: {} processed, {} remaining",
                        report.processed, report.remaining
                    );
                }
            }
        })
    }

    /// Ops waiting for a flush
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Ops taken by a flush and not yet resolved
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Whether an op for `key` is queued
    pub fn is_pending(&self, key: &str) -> bool {
        self.queue.lock().contains_key(key)
    }

    /// Subscribe to write outcome events
    pub fn subscribe(&self) -> broadcast::Receiver<WriteEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> WriteBehindStats {
        WriteBehindStats {
            pending: self.pending(),
            queued: self.counters.queued.load(Ordering::Relaxed),
            superseded: self.counters.superseded.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }

    pub fn reader(&self) -> &CacheAside {
        &self.reader
    }

    pub fn config(&self) -> &WriteBehindConfig {
        &self.config
    }

    fn take_batch(&self) -> Vec<WriteOp> {
        let mut queue = self.queue.lock();
        let n = self.config.batch_size.max(1).min(queue.len());
        queue.drain(..n).map(|(_, op)| op).collect()
    }

    async fn run_batch(&self, batch: Vec<WriteOp>) -> FlushReport {
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }

        debug!("Flushing {} queued writes", batch.len());
        {
            let mut in_flight = self.in_flight.lock();
            for op in &batch {
                in_flight.insert(op.id, (op.key.clone(), op.retry_count));
            }
        }

        let results = join_all(batch.into_iter().map(|op| async move {
            let start = Instant::now();
            let result = op.attempt().await;
            (op, result, start.elapsed())
        }))
        .await;

        for (mut op, result, elapsed) in results {
            if self.in_flight.lock().remove(&op.id).is_none() {
                debug!("Discarding late result for {}: already abandoned", op.key);
                continue;
            }

            match result {
                Ok(stored) => {
                    let attempts = op.retry_count + 1;
                    debug!("Committed {} after {} attempt(s)", op.key, attempts);
                    self.counters.committed.fetch_add(1, Ordering::Relaxed);
                    self.emit(WriteEvent::Committed {
                        id: op.id,
                        key: op.key,
                        attempts,
                        stored,
                    });
                    report.processed += 1;
                    report.committed += 1;
                }
                Err(e) => {
                    op.retry_count += 1;
                    self.reader.metrics().record(Operation::Error, &op.key, elapsed);
                    let reason = format!("{:#}", e);

                    if self.is_closed() {
                        let reason = format!("queue closed after failed attempt: {}", reason);
                        self.abandon(op.id, op.key, op.retry_count, &reason);
                        report.processed += 1;
                        report.failed += 1;
                    } else if op.retry_count >= self.config.max_retries {
                        self.abandon(op.id, op.key, op.retry_count, &reason);
                        report.processed += 1;
                        report.failed += 1;
                    } else {
                        self.requeue(op, reason);
                    }
                }
            }
        }

        report.remaining = self.pending();
        report
    }

    fn requeue(&self, op: WriteOp, reason: String) {
        let (id, key, attempts) = (op.id, op.key.clone(), op.retry_count);

        let requeued = {
            let mut queue = self.queue.lock();
            if queue.contains_key(&op.key) {
                false
            } else {
                queue.insert(op.key.clone(), op);
                true
            }
        };

        if !requeued {
            debug!("Dropping failed write {} for {}: superseded by a newer write", id, key);
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        warn!(
            "Write for {} failed (attempt {}/{}), will retry: {}",
            key, attempts, self.config.max_retries, reason
        );
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        self.emit(WriteEvent::Retrying {
            id,
            key,
            attempts,
            error: reason,
        });
    }

    fn abandon(&self, id: Uuid, key: String, attempts: u32, reason: &str) {
        error!("Abandoning write for {} after {} attempt(s): {}", key, attempts, reason);
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        self.emit(WriteEvent::Abandoned {
            id,
            key,
            attempts,
            error: reason.to_string(),
        });
    }

    fn emit(&self, event: WriteEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for WriteBehind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehind")
            .field("pending", &self.pending())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .field("config", &self.config)
            .finish()
    }
}
