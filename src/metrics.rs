//! Operation metrics: hit rate, latency percentiles, hot and slow keys
//!
//! The collector is purely observational. Recording never fails and never
//! feeds back into cache behaviour.

use crate::cache::config::CacheConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Number of keys reported in hot/slow key lists
pub const DEFAULT_TOP_KEYS: usize = 10;

/// Kind of recorded cache operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

impl Operation {
    fn index(self) -> usize {
        match self {
            Operation::Hit => 0,
            Operation::Miss => 1,
            Operation::Set => 2,
            Operation::Delete => 3,
            Operation::Error => 4,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Hit => "hit",
            Operation::Miss => "miss",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One recorded operation in the rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub operation: Operation,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Per-key activity used for hot/slow key reports
#[derive(Debug, Clone, Default)]
struct KeyStats {
    requests: u64,
    operations: u64,
    total_latency: Duration,
    max_latency: Duration,
}

/// Per-key line in a metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyReport {
    pub key: String,
    /// Read requests (hits + misses)
    pub requests: u64,
    pub mean_latency: Duration,
    pub max_latency: Duration,
}

/// Point-in-time view of collected metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    /// Samples currently in the latency window
    pub samples: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub hot_keys: Vec<KeyReport>,
    pub slow_keys: Vec<KeyReport>,
    /// Start of the collection period
    pub since: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total operations recorded
    pub fn total_operations(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes + self.errors
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Metrics {{ hits: {}, misses: {}, hit_rate: {:.2}%, sets: {}, deletes: {}, errors: {}, p50: {:?}, p95: {:?}, p99: {:?} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.sets,
            self.deletes,
            self.errors,
            self.p50,
            self.p95,
            self.p99
        )
    }
}

struct MetricsState {
    samples: VecDeque<MetricSample>,
    keys: HashMap<String, KeyStats>,
    since: DateTime<Utc>,
}

/// Records cache operations and exposes aggregated snapshots
pub struct MetricsCollector {
    enabled: bool,
    window: usize,
    max_tracked_keys: usize,
    counters: [AtomicU64; 5],
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    /// Create a collector with an explicit window and key bound
    pub fn new(window: usize, max_tracked_keys: usize) -> Self {
        Self {
            enabled: true,
            window: window.max(1),
            max_tracked_keys,
            counters: Default::default(),
            state: Mutex::new(MetricsState {
                samples: VecDeque::with_capacity(window.clamp(1, 4096)),
                keys: HashMap::new(),
                since: Utc::now(),
            }),
        }
    }

    /// Create a collector from cache configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut collector = Self::new(config.metrics_window, config.max_tracked_keys);
        collector.enabled = config.enable_metrics;
        collector
    }

    /// A collector that drops everything
    pub fn disabled() -> Self {
        let mut collector = Self::new(1, 0);
        collector.enabled = false;
        collector
    }

    /// Whether recording is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one operation on `key`
    pub fn record(&self, operation: Operation, key: &str, latency: Duration) {
        if !self.enabled {
            return;
        }

        self.counters[operation.index()].fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if state.samples.len() >= self.window {
            state.samples.pop_front();
        }
        state.samples.push_back(MetricSample {
            operation,
            latency,
            timestamp: Utc::now(),
        });

        if key.is_empty() {
            return;
        }

        if !state.keys.contains_key(key) && state.keys.len() >= self.max_tracked_keys {
            return;
        }
        let stats = state.keys.entry(key.to_string()).or_default();

        stats.operations = stats.operations.saturating_add(1);
        if matches!(operation, Operation::Hit | Operation::Miss) {
            stats.requests = stats.requests.saturating_add(1);
        }
        stats.total_latency = stats.total_latency.saturating_add(latency);
        stats.max_latency = stats.max_latency.max(latency);
    }

    /// Count for one operation kind
    pub fn count(&self, operation: Operation) -> u64 {
        self.counters[operation.index()].load(Ordering::Relaxed)
    }

    /// Snapshot with the default number of hot/slow keys
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_with_top(DEFAULT_TOP_KEYS)
    }

    /// Snapshot reporting the `top` hottest and slowest keys
    pub fn snapshot_with_top(&self, top: usize) -> MetricsSnapshot {
        let state = self.state.lock();

        let mut latencies: Vec<Duration> = state.samples.iter().map(|s| s.latency).collect();
        latencies.sort_unstable();

        let mut reports: Vec<KeyReport> = state
            .keys
            .iter()
            .map(|(key, stats)| KeyReport {
                key: key.clone(),
                requests: stats.requests,
                mean_latency: mean(stats.total_latency, stats.operations),
                max_latency: stats.max_latency,
            })
            .collect();

        reports.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.key.cmp(&b.key)));
        let hot_keys: Vec<KeyReport> = reports
            .iter()
            .filter(|r| r.requests > 0)
            .take(top)
            .cloned()
            .collect();

        reports.sort_by(|a, b| {
            b.mean_latency
                .cmp(&a.mean_latency)
                .then_with(|| a.key.cmp(&b.key))
        });
        reports.truncate(top);

        MetricsSnapshot {
            hits: self.count(Operation::Hit),
            misses: self.count(Operation::Miss),
            sets: self.count(Operation::Set),
            deletes: self.count(Operation::Delete),
            errors: self.count(Operation::Error),
            samples: latencies.len(),
            p50: percentile(&latencies, 50.0),
            p95: percentile(&latencies, 95.0),
            p99: percentile(&latencies, 99.0),
            hot_keys,
            slow_keys: reports,
            since: state.since,
        }
    }

    /// Clear all counters, samples and key statistics
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }

        let mut state = self.state.lock();
        state.samples.clear();
        state.keys.clear();
        state.since = Utc::now();

        debug!("Metrics reset");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.enabled)
            .field("window", &self.window)
            .field("hits", &self.count(Operation::Hit))
            .field("misses", &self.count(Operation::Miss))
            .finish()
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / count as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
