//! Integration tests for the read/write strategies
//!
//! - Cache-aside stale fallback over a failing remote store
//! - Write-through ordering and error propagation
//! - Write-behind delivery, retries and abandonment with the real scheduler

mod common;

use common::{flaky_client, recording_writer};
use ouroboros_cache::strategy::{writer_fn, CacheAside, WriteBehind, WriteEvent, WriteThrough};
use ouroboros_cache::{
    CacheConfig, CacheError, CacheTier, GetOptions, MetricsCollector, SetOptions, Source,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(1000, 1000))
}

#[tokio::test]
async fn test_cache_aside_serves_stale_on_transient_failure() {
    common::init_tracing();
    let (client, store) = flaky_client();
    let strategy = CacheAside::new(Arc::new(client.clone()), metrics(), CacheConfig::default());

    client.set("user:1", &json!({"name": "ada"}), None).await.unwrap();
    store.fail_reads(1);

    let fetched = assert_ok!(
        strategy
            .get(
                "user:1",
                || async { Ok::<_, anyhow::Error>(json!({"name": "loader"})) },
                &GetOptions::new().fallback_on_error(),
            )
            .await
    );

    assert_eq!(fetched.source, Source::CacheStale);
    assert_eq!(fetched.value, json!({"name": "ada"}));
    assert_eq!(strategy.metrics().snapshot().errors, 1);
}

#[tokio::test]
async fn test_cache_aside_falls_back_to_loader_without_stale_value() {
    let (client, store) = flaky_client();
    let strategy = CacheAside::new(Arc::new(client), metrics(), CacheConfig::default());

    store.fail_reads(2);

    let fetched = assert_ok!(
        strategy
            .get(
                "user:1",
                || async { Ok::<_, anyhow::Error>("fresh".to_string()) },
                &GetOptions::new().fallback_on_error(),
            )
            .await
    );
    assert_eq!(fetched.source, Source::Origin);
    assert_eq!(fetched.value, "fresh");
}

#[tokio::test]
async fn test_cache_aside_fallback_returns_loader_error() {
    let (client, store) = flaky_client();
    let strategy = CacheAside::new(Arc::new(client), metrics(), CacheConfig::default());

    store.set_down(true);

    let err = assert_err!(
        strategy
            .get::<String, _, _>(
                "user:1",
                || async { Err::<String, _>(anyhow::anyhow!("origin down")) },
                &GetOptions::new().fallback_on_error(),
            )
            .await
    );
    assert!(matches!(err, CacheError::Origin(_)));
}

#[tokio::test]
async fn test_cache_aside_without_fallback_propagates_store_error() {
    let (client, store) = flaky_client();
    let strategy = CacheAside::new(Arc::new(client), metrics(), CacheConfig::default());

    store.fail_reads(1);

    let err = assert_err!(
        strategy
            .get::<String, _, _>(
                "user:1",
                || async { Ok::<_, anyhow::Error>("unused".to_string()) },
                &GetOptions::default(),
            )
            .await
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_write_through_skips_cache_when_origin_fails() {
    let (client, _store) = flaky_client();
    let tier: Arc<dyn CacheTier> = Arc::new(client.clone());
    let strategy = WriteThrough::new(tier, metrics(), CacheConfig::default());
    let (writer, calls) = recording_writer(1);

    let err = assert_err!(
        strategy
            .set("order:1", &json!({"total": 5}), writer.as_ref(), &SetOptions::default())
            .await
    );
    assert!(matches!(err, CacheError::Origin(_)));
    assert_eq!(client.get::<Value>("order:1").await.unwrap(), None);

    assert_ok!(
        strategy
            .set("order:1", &json!({"total": 5}), writer.as_ref(), &SetOptions::default())
            .await
    );
    assert_eq!(client.get::<Value>("order:1").await.unwrap(), Some(json!({"total": 5})));
    assert_eq!(calls.lock().len(), 2);
}

#[tokio::test]
async fn test_write_through_drops_cache_when_store_write_fails() {
    let (client, store) = flaky_client();
    let strategy = WriteThrough::new(Arc::new(client.clone()), metrics(), CacheConfig::default());
    let (writer, calls) = recording_writer(0);

    store.fail_writes(1);
    let err = assert_err!(
        strategy
            .set("k", &1, writer.as_ref(), &SetOptions::default())
            .await
    );

    assert!(err.is_transient());
    // origin committed even though caching failed
    assert_eq!(calls.lock().len(), 1);
    assert_eq!(client.get::<Value>("k").await.unwrap(), None);
}

fn write_behind(max_retries: u32) -> (Arc<WriteBehind>, ouroboros_cache::RemoteStoreClient) {
    let (client, _store) = flaky_client();
    let config = CacheConfig::builder()
        .flush_interval(Duration::from_millis(20))
        .max_retries(max_retries)
        .batch_size(10)
        .build();
    let strategy = Arc::new(WriteBehind::new(Arc::new(client.clone()), metrics(), config));
    (strategy, client)
}

#[tokio::test]
async fn test_write_behind_eventual_delivery() {
    common::init_tracing();
    let (strategy, client) = write_behind(3);
    let (writer, calls) = recording_writer(2);
    let mut events = strategy.subscribe();
    let mut scheduler = strategy.start();

    assert_ok!(
        strategy
            .set("user:9", &json!({"name": "grace"}), writer, &SetOptions::default())
            .await
    );

    // readable before the origin sees it
    assert_eq!(client.get::<Value>("user:9").await.unwrap(), Some(json!({"name": "grace"})));

    // flush_interval * (max_retries + 1), with slack for scheduling
    let committed = tokio::time::timeout(Duration::from_millis(20 * 4 + 500), async {
        loop {
            match events.recv().await {
                Ok(WriteEvent::Committed { attempts, .. }) => break attempts,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("commit event within the retry window");

    scheduler.shutdown().await;

    assert_eq!(committed, 3);
    let calls = calls.lock();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(key, value)| key == "user:9" && *value == json!({"name": "grace"})));
    assert_eq!(strategy.pending(), 0);
    assert_eq!(strategy.stats().retried, 2);
}

#[tokio::test]
async fn test_write_behind_abandons_after_max_retries() {
    let (strategy, _client) = write_behind(3);
    let (writer, calls) = recording_writer(usize::MAX);
    let mut events = strategy.subscribe();
    let mut scheduler = strategy.start();

    assert_ok!(strategy.set("k", &1, writer, &SetOptions::default()).await);

    let failure = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event @ WriteEvent::Abandoned { .. }) => break event.failure(),
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("abandon event");

    scheduler.shutdown().await;

    match failure {
        Some(CacheError::WriteFailure { key, attempts, reason }) => {
            assert_eq!(key, "k");
            assert_eq!(attempts, 3);
            assert!(reason.contains("origin unavailable"));
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert_eq!(calls.lock().len(), 3);
    assert!(!strategy.is_pending("k"));
    assert_eq!(strategy.stats().abandoned, 1);
}

#[tokio::test]
async fn test_write_behind_last_write_wins() {
    let (strategy, client) = write_behind(3);
    let (writer, calls) = recording_writer(0);

    for version in 1..=3 {
        assert_ok!(strategy.set("doc", &version, writer.clone(), &SetOptions::default()).await);
    }
    assert_eq!(strategy.pending(), 1);

    let report = strategy.force_flush(None).await;
    assert_eq!(report.committed, 1);
    assert_eq!(*calls.lock(), vec![("doc".to_string(), json!(3))]);
    assert_eq!(client.get::<u32>("doc").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_write_behind_immediate_bypasses_queue() {
    let (strategy, client) = write_behind(3);
    let writer = writer_fn(|_key, mut value| async move {
        value["version"] = json!(2);
        Ok::<_, anyhow::Error>(value)
    });

    assert_ok!(
        strategy
            .set("doc", &json!({"body": "x"}), writer, &SetOptions::new().immediate())
            .await
    );

    assert_eq!(strategy.pending(), 0);
    // the stored form returned by the origin is what gets cached
    assert_eq!(
        client.get::<Value>("doc").await.unwrap(),
        Some(json!({"body": "x", "version": 2}))
    );
}
