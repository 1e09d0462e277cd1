//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the cache subsystem
///
/// A `default_ttl` of zero means entries never expire. Jitter is off by
/// default; enable it to spread expiry of keys written together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default time-to-live for cache entries (zero = never expires)
    pub default_ttl: Duration,

    /// Maximum number of entries held by the in-process bounded cache
    pub capacity: usize,

    /// TTL jitter factor (0.0 - 1.0)
    /// Adds random variation to prevent cache stampede
    pub ttl_jitter: f64,

    /// Enable the background sweep of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for the background sweep
    pub cleanup_interval: Duration,

    /// TTL of entries promoted from the remote tier into the local tier
    pub local_ttl: Duration,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Number of latency samples kept for percentile computation
    pub metrics_window: usize,

    /// Upper bound on distinct keys tracked for hot/slow key reports
    pub max_tracked_keys: usize,

    /// Write-behind queue settings
    pub write_behind: WriteBehindConfig,
}

/// Write-behind queue and flush scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBehindConfig {
    /// How often the flush scheduler wakes up
    pub flush_interval: Duration,

    /// Maximum ops attempted per flush
    pub batch_size: usize,

    /// Failed attempts after which an op is abandoned
    pub max_retries: u32,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 3,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 1 hour default TTL
            default_ttl: Duration::from_secs(3600),
            capacity: 10_000,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            local_ttl: Duration::from_secs(60),
            enable_metrics: true,
            metrics_window: 10_000,
            max_tracked_keys: 10_000,
            write_behind: WriteBehindConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::Config(
                "capacity must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::Config(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        if self.metrics_window == 0 {
            return Err(CacheError::Config(
                "metrics_window must be greater than 0".to_string(),
            ));
        }

        if self.write_behind.batch_size == 0 {
            return Err(CacheError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.write_behind.flush_interval.is_zero() {
            return Err(CacheError::Config(
                "flush_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        self.jittered(self.default_ttl)
    }

    /// Apply the configured jitter to an arbitrary TTL.
    ///
    /// Zero stays zero: an unbounded entry must not acquire an expiry.
    pub fn jittered(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 || ttl.is_zero() {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }

    /// Load configuration from `CACHE_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = CacheConfig::default();
        let mut builder = CacheConfig::builder();

        if let Some(secs) = env_parse::<u64>("CACHE_TTL_SECS")? {
            builder = builder.default_ttl(Duration::from_secs(secs));
        }
        if let Some(capacity) = env_parse::<usize>("CACHE_CAPACITY")? {
            builder = builder.capacity(capacity);
        }
        if let Some(jitter) = env_parse::<f64>("CACHE_TTL_JITTER")? {
            builder = builder.ttl_jitter(jitter);
        }
        if let Some(secs) = env_parse::<u64>("CACHE_CLEANUP_INTERVAL_SECS")? {
            builder = builder.cleanup_interval(Duration::from_secs(secs));
        }

        let mut write_behind = defaults.write_behind;
        if let Some(ms) = env_parse::<u64>("CACHE_FLUSH_INTERVAL_MS")? {
            write_behind.flush_interval = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse::<usize>("CACHE_BATCH_SIZE")? {
            write_behind.batch_size = size;
        }
        if let Some(retries) = env_parse::<u32>("CACHE_MAX_RETRIES")? {
            write_behind.max_retries = retries;
        }

        let config = builder.write_behind(write_behind).build();
        config.validate()?;
        Ok(config)
    }
}

/// Read and parse an optional environment variable
pub(crate) fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    capacity: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    local_ttl: Option<Duration>,
    enable_metrics: Option<bool>,
    metrics_window: Option<usize>,
    max_tracked_keys: Option<usize>,
    write_behind: Option<WriteBehindConfig>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries (zero = never expires)
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of in-process entries
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable the background sweep
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set TTL used when promoting remote hits into the local tier
    pub fn local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = Some(ttl);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Set number of latency samples retained
    pub fn metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = Some(window);
        self
    }

    /// Set upper bound on distinct keys tracked by metrics
    pub fn max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = Some(max);
        self
    }

    /// Replace the write-behind settings
    pub fn write_behind(mut self, config: WriteBehindConfig) -> Self {
        self.write_behind = Some(config);
        self
    }

    /// Set write-behind flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.write_behind
            .get_or_insert_with(WriteBehindConfig::default)
            .flush_interval = interval;
        self
    }

    /// Set write-behind batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.write_behind
            .get_or_insert_with(WriteBehindConfig::default)
            .batch_size = size;
        self
    }

    /// Set write-behind retry bound
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.write_behind
            .get_or_insert_with(WriteBehindConfig::default)
            .max_retries = retries;
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            local_ttl: self.local_ttl.unwrap_or(defaults.local_ttl),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
            metrics_window: self.metrics_window.unwrap_or(defaults.metrics_window),
            max_tracked_keys: self.max_tracked_keys.unwrap_or(defaults.max_tracked_keys),
            write_behind: self.write_behind.unwrap_or(defaults.write_behind),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Rapidly changing data: short TTL, frequent flushes
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300), // 5 minutes
            capacity: 5_000,
            ttl_jitter: 0.15,
            cleanup_interval: Duration::from_secs(30),
            local_ttl: Duration::from_secs(10),
            write_behind: WriteBehindConfig {
                flush_interval: Duration::from_millis(200),
                batch_size: 50,
                max_retries: 5,
            },
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800), // 30 minutes
            capacity: 1_000,
            metrics_window: 1_000,
            max_tracked_keys: 1_000,
            ..Default::default()
        }
    }

    /// Large-scale deployments
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200), // 2 hours
            capacity: 1_000_000,
            ttl_jitter: 0.10,
            metrics_window: 100_000,
            max_tracked_keys: 100_000,
            write_behind: WriteBehindConfig {
                flush_interval: Duration::from_secs(1),
                batch_size: 1_000,
                max_retries: 3,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.capacity, 10_000);
        assert!(config.enable_auto_cleanup);
        assert_eq!(config.write_behind.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = CacheConfig::default();
        invalid_config.capacity = 0;
        assert!(matches!(
            invalid_config.validate(),
            Err(CacheError::Config(_))
        ));

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.write_behind.batch_size = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.write_behind.flush_interval = Duration::ZERO;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .capacity(5000)
            .flush_interval(Duration::from_millis(50))
            .batch_size(10)
            .max_retries(7)
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.capacity, 5000);
        assert_eq!(config.write_behind.flush_interval, Duration::from_millis(50));
        assert_eq!(config.write_behind.batch_size, 10);
        assert_eq!(config.write_behind.max_retries, 7);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_with_jitter();
        let base_secs = 3600.0;
        let jitter_range = base_secs * 0.1;

        assert!(ttl.as_secs_f64() >= base_secs - jitter_range);
        assert!(ttl.as_secs_f64() <= base_secs + jitter_range);
    }

    #[test]
    fn test_jitter_keeps_unbounded_ttl() {
        let config = CacheConfig {
            ttl_jitter: 0.5,
            ..Default::default()
        };
        assert_eq!(config.jittered(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_preset_configs() {
        let realtime = CacheConfig::realtime();
        assert_eq!(realtime.default_ttl, Duration::from_secs(300));
        assert!(realtime.validate().is_ok());

        let small = CacheConfig::small();
        assert_eq!(small.capacity, 1_000);

        let large = CacheConfig::large();
        assert_eq!(large.capacity, 1_000_000);
        assert!(large.validate().is_ok());
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("OUROBOROS_CACHE_TEST_BAD", "not-a-number");
        let parsed = env_parse::<u64>("OUROBOROS_CACHE_TEST_BAD");
        assert!(matches!(parsed, Err(CacheError::Config(_))));
        std::env::remove_var("OUROBOROS_CACHE_TEST_BAD");

        let missing = env_parse::<u64>("OUROBOROS_CACHE_TEST_MISSING").unwrap();
        assert!(missing.is_none());
    }
}
