//! Integration tests for the bounded cache
//!
//! These tests verify the in-process store including:
//! - Basic cache operations
//! - TTL expiration
//! - LRU eviction
//! - Background cleanup
//! - Concurrent access

mod common;

use ouroboros_cache::cache::{BoundedCache, CacheConfig, CacheKeyBuilder, KeyKind};
use ouroboros_cache::ManualClock;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_basic_cache_operations() {
    common::init_tracing();
    let config = CacheConfig::builder()
        .default_ttl(Duration::from_secs(60))
        .capacity(100)
        .build();

    let cache = BoundedCache::new(&config).unwrap();

    cache.insert("key1", "value1".to_string());

    assert_eq!(cache.get("key1"), Some("value1".to_string()));
    assert!(cache.has("key1"));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_round_trip_preserves_value() {
    let cache = BoundedCache::with_capacity(10, Duration::from_secs(60)).unwrap();
    let value = serde_json::json!({
        "id": 7,
        "tags": ["a", "b"],
        "nested": { "score": 0.5, "empty": null }
    });

    cache.insert("doc", value.clone());
    assert_eq!(cache.get("doc"), Some(value));
}

#[tokio::test]
async fn test_ttl_expiration() {
    let cache = BoundedCache::with_capacity(10, Duration::from_secs(60)).unwrap();

    cache.set("expiring_key", "expiring_value", Duration::from_millis(100));

    // Should be available immediately
    assert!(cache.get("expiring_key").is_some());

    // Wait for expiration
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Should be expired now
    assert!(cache.get("expiring_key").is_none());

    let stats = cache.stats();
    assert_eq!(stats.evictions_ttl, 1);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_ttl_with_manual_clock() {
    let clock = ManualClock::new();
    let cache = BoundedCache::with_clock(10, Duration::ZERO, Arc::new(clock.clone())).unwrap();

    cache.set("short", 1, Duration::from_millis(100));
    cache.set("forever", 2, Duration::ZERO);

    clock.advance(Duration::from_millis(99));
    assert_eq!(cache.get("short"), Some(1));

    clock.advance(Duration::from_millis(1));
    assert_eq!(cache.get("short"), None);

    // zero TTL never expires
    clock.advance(Duration::from_secs(365 * 24 * 3600));
    assert_eq!(cache.get("forever"), Some(2));
}

#[test]
fn test_overwrite_restarts_expiry() {
    let clock = ManualClock::new();
    let cache = BoundedCache::with_clock(10, Duration::ZERO, Arc::new(clock.clone())).unwrap();

    cache.set("k", "old", Duration::from_millis(100));
    clock.advance(Duration::from_millis(80));
    cache.set("k", "new", Duration::from_millis(100));
    clock.advance(Duration::from_millis(80));

    // the first write's expiry must not remove the second write
    assert_eq!(cache.get("k"), Some("new"));
}

#[tokio::test]
async fn test_lru_eviction() {
    let cache = BoundedCache::with_capacity(3, Duration::from_secs(300)).unwrap();

    cache.insert("key1", 1);
    cache.insert("key2", 2);
    cache.insert("key3", 3);

    // Access key1 to make it most recently used
    assert_eq!(cache.get("key1"), Some(1));

    // Insert key4, should evict key2 (least recently used)
    cache.insert("key4", 4);

    assert_eq!(cache.get("key1"), Some(1));
    assert_eq!(cache.get("key2"), None);
    assert_eq!(cache.get("key3"), Some(3));
    assert_eq!(cache.get("key4"), Some(4));

    let stats = cache.stats();
    assert_eq!(stats.evictions_capacity, 1);
    assert_eq!(stats.entries, 3);
}

#[test]
fn test_capacity_n_plus_one_evicts_exactly_one() {
    let n = 50;
    let cache = BoundedCache::with_capacity(n, Duration::ZERO).unwrap();

    for i in 0..=n {
        cache.insert(format!("key_{}", i), i);
    }

    assert_eq!(cache.len(), n);
    assert_eq!(cache.get("key_0"), None);
    for i in 1..=n {
        assert_eq!(cache.get(&format!("key_{}", i)), Some(i));
    }
}

#[test]
fn test_capacity_two_scenario() {
    let cache = BoundedCache::with_capacity(2, Duration::ZERO).unwrap();

    cache.insert("a", 1);
    cache.insert("b", 2);
    cache.insert("c", 3);

    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.get("c"), Some(3));
}

#[test]
fn test_zero_capacity_is_rejected() {
    assert!(BoundedCache::<u32>::with_capacity(0, Duration::ZERO).is_err());
}

#[test]
fn test_delete_and_clear() {
    let cache = BoundedCache::with_capacity(10, Duration::ZERO).unwrap();
    cache.insert("a", 1);
    cache.insert("b", 2);

    assert_eq!(cache.delete("a"), Some(1));
    assert_eq!(cache.delete("a"), None);
    assert!(!cache.has("a"));

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.stats().invalidations, 2);
}

#[test]
fn test_cleanup_expired() {
    let clock = ManualClock::new();
    let cache = BoundedCache::with_clock(10, Duration::ZERO, Arc::new(clock.clone())).unwrap();

    cache.set("short1", 1, Duration::from_millis(50));
    cache.set("short2", 2, Duration::from_millis(50));
    cache.set("long", 3, Duration::from_secs(60));

    clock.advance(Duration::from_millis(100));

    let events = cache.cleanup_expired();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].keys.len(), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.keys(), vec!["long"]);
}

#[tokio::test]
async fn test_background_sweep() {
    let cache = Arc::new(BoundedCache::with_capacity(10, Duration::ZERO).unwrap());
    cache.set("cold", 1, Duration::from_millis(20));
    cache.set("warm", 2, Duration::ZERO);

    let mut sweeper = cache.start_auto_cleanup(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    sweeper.shutdown().await;

    // removed without any access to the key
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().evictions_ttl, 1);
}

#[test]
fn test_keys_matching() {
    let cache = BoundedCache::with_capacity(10, Duration::ZERO).unwrap();
    cache.insert("user:1", 1);
    cache.insert("user:2", 2);
    cache.insert("order:1", 3);

    let mut users = cache.keys_matching("user:");
    users.sort();
    assert_eq!(users, vec!["user:1", "user:2"]);
    assert_eq!(cache.keys_matching("*:1").len(), 2);
}

#[test]
fn test_cache_key_builder() {
    let key = CacheKeyBuilder::new(KeyKind::Query)
        .identifier("users")
        .param("page", "2")
        .param("limit", "10")
        .build();

    assert!(key.starts_with("query:users"));
    assert!(key.contains("limit=10"));
    assert!(key.contains("page=2"));
}

#[tokio::test]
async fn test_concurrent_cache_access() {
    use tokio::task;

    let cache = Arc::new(BoundedCache::with_capacity(1000, Duration::from_secs(60)).unwrap());

    // Spawn multiple concurrent tasks
    let mut handles = vec![];

    for i in 0..10 {
        let cache_clone = cache.clone();
        let handle = task::spawn(async move {
            for j in 0..10 {
                let key = format!("key_{}_{}", i, j);
                let value = format!("value_{}_{}", i, j);
                cache_clone.insert(key.clone(), value.clone());
                assert_eq!(cache_clone.get(&key), Some(value));
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.hits, 100);
}

#[tokio::test]
async fn test_concurrent_inserts_respect_capacity() {
    let cache = Arc::new(BoundedCache::with_capacity(16, Duration::ZERO).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for j in 0..100 {
                    cache.insert(format!("k_{}_{}", i, j), j);
                    assert!(cache.len() <= 16);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len(), 16);
    assert_eq!(cache.stats().evictions_capacity, 800 - 16);
}

#[test]
fn test_preset_configurations() {
    for config in [CacheConfig::realtime(), CacheConfig::small(), CacheConfig::large()] {
        config.validate().unwrap();
        let cache = BoundedCache::<String>::new(&config).unwrap();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.capacity(), config.capacity);
    }
}

#[test]
fn test_cache_performance_characteristics() {
    let cache = BoundedCache::with_capacity(10_000, Duration::from_secs(60)).unwrap();

    let start = std::time::Instant::now();
    for i in 0..1000 {
        cache.insert(format!("key_{}", i), format!("value_{}", i));
    }
    let insert_duration = start.elapsed();

    let start = std::time::Instant::now();
    for i in 0..1000 {
        cache.get(&format!("key_{}", i));
    }
    let read_duration = start.elapsed();

    println!("Insert 1000 entries: {:?}", insert_duration);
    println!("Read 1000 entries: {:?}", read_duration);

    assert!(insert_duration.as_millis() < 5000);
    assert!(read_duration.as_millis() < 5000);

    let stats = cache.stats();
    assert_eq!(stats.entries, 1000);
    assert_eq!(stats.hits, 1000);
}
