//! Integration tests for the remote store client over the in-process store

mod common;

use ouroboros_cache::remote::KeyTtl;
use ouroboros_cache::{
    CacheError, ManualClock, MemoryStore, RemoteStoreClient, RemoteStoreConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
}

fn client_with_clock() -> (RemoteStoreClient, ManualClock) {
    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let client = RemoteStoreClient::new(Arc::new(store), &RemoteStoreConfig::default());
    (client, clock)
}

#[tokio::test]
async fn test_typed_round_trip() {
    common::init_tracing();
    let client = RemoteStoreClient::in_memory(&RemoteStoreConfig::default());
    let profile = Profile {
        id: 1,
        name: "ada".to_string(),
    };

    assert_ok!(client.set("profile:1", &profile, None).await);
    assert_eq!(assert_ok!(client.get::<Profile>("profile:1").await), Some(profile));
    assert!(assert_ok!(client.exists("profile:1").await));
    assert!(assert_ok!(client.delete("profile:1").await));
    assert_eq!(assert_ok!(client.get::<Profile>("profile:1").await), None);
}

#[tokio::test]
async fn test_decode_failure_is_serialization_error() {
    let client = RemoteStoreClient::in_memory(&RemoteStoreConfig::default());
    assert_ok!(client.set("k", &"not a profile", None).await);

    let err = assert_err!(client.get::<Profile>("k").await);
    assert!(matches!(err, CacheError::Serialization(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    let a = RemoteStoreClient::new(store.clone(), &RemoteStoreConfig::default().with_namespace("a"));
    let b = RemoteStoreClient::new(store.clone(), &RemoteStoreConfig::default().with_namespace("b"));

    assert_ok!(a.set("shared", &1, None).await);
    assert_eq!(assert_ok!(b.get::<u32>("shared").await), None);
    assert_eq!(assert_ok!(a.scan_by_prefix("sh").await), vec!["shared"]);
    assert!(assert_ok!(b.scan_by_prefix("sh").await).is_empty());
}

#[tokio::test]
async fn test_batch_operations() {
    let client = RemoteStoreClient::in_memory(&RemoteStoreConfig::default());

    assert_ok!(client.mset(&[("a", 1u32), ("b", 2u32)], None).await);
    let values = assert_ok!(client.mget::<u32>(&["a", "missing", "b"]).await);
    assert_eq!(values, vec![Some(1), None, Some(2)]);
}

#[tokio::test]
async fn test_counter_and_ttl() {
    let (client, clock) = client_with_clock();

    assert_eq!(assert_ok!(client.increment("hits", 1, Some(Duration::from_secs(10))).await), 1);
    assert_eq!(assert_ok!(client.increment("hits", 5, None).await), 6);

    match assert_ok!(client.ttl("hits").await) {
        KeyTtl::Expires(remaining) => assert!(remaining <= Duration::from_secs(10)),
        other => panic!("expected expiring key, got {:?}", other),
    }

    clock.advance(Duration::from_secs(11));
    assert_eq!(assert_ok!(client.ttl("hits").await), KeyTtl::Missing);
    assert_eq!(assert_ok!(client.increment("hits", 1, None).await), 1);
    assert_eq!(assert_ok!(client.ttl("hits").await), KeyTtl::Persistent);
}

#[tokio::test]
async fn test_expire_existing_key() {
    let (client, clock) = client_with_clock();
    assert_ok!(client.set("k", &"v", None).await);

    assert!(assert_ok!(client.expire("k", Duration::from_secs(1)).await));
    assert!(!assert_ok!(client.expire("missing", Duration::from_secs(1)).await));

    clock.advance(Duration::from_secs(2));
    assert!(!assert_ok!(client.exists("k").await));
}

#[tokio::test]
async fn test_transient_failures_surface_as_typed_errors() {
    let (client, store) = common::flaky_client();
    store.fail_reads(1);

    let err = assert_err!(client.get::<u32>("k").await);
    assert!(matches!(err, CacheError::TransientStore(_)));
    assert!(err.is_transient());

    assert_eq!(assert_ok!(client.get::<u32>("k").await), None);
}

#[tokio::test]
async fn test_effectively_forever_ttl_is_persistent() {
    let client = RemoteStoreClient::in_memory(&RemoteStoreConfig::default());

    assert_ok!(client.set("k", &1u8, Some(Duration::MAX)).await);
    assert_eq!(assert_ok!(client.get::<u8>("k").await), Some(1));
    assert_eq!(assert_ok!(client.ttl("k").await), KeyTtl::Persistent);
}
