//! # Bounded In-Process Cache
//!
//! The local tier of the caching subsystem: a capacity-bounded store with
//! least-recently-used eviction and per-entry time-to-live.
//!
//! ## Features
//!
//! - **LRU Eviction**: the least recently accessed entry goes first once capacity is reached
//! - **TTL Expiration**: checked lazily on every access, with an optional background sweep
//! - **Unbounded Entries**: a TTL of zero means the entry never expires
//! - **Key Helpers**: structured key building and prefix/glob matching
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{BoundedCache, CacheConfig};
//! use std::time::Duration;
//!
//! # fn example() -> ouroboros_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .capacity(10_000)
//!     .build();
//!
//! let cache = BoundedCache::new(&config)?;
//!
//! cache.insert("query:123", "cached response".to_string());
//!
//! if let Some(value) = cache.get("query:123") {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod key;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, WriteBehindConfig};
pub use entry::CacheEntry;
pub use key::{glob_match, CacheKeyBuilder, KeyKind};
pub use store::BoundedCache;
pub use types::{CacheKey, CacheStats};
