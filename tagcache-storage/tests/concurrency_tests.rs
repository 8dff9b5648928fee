//! Concurrency Tests
//!
//! Single-flight coalescing of cold reads, deduplication of background
//! refreshes, and invalidation racing recomputes of the same key, all under a
//! multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use tagcache_core::{CacheKey, EngineConfig, InvalidationMode, Tag};
use tagcache_storage::ReadOutcome;
use tagcache_test_utils::assertions::assert_index_consistent;
use tagcache_test_utils::fixtures::{engine, engine_with_config, flaky_engine, settle};
use tagcache_test_utils::{init_test_tracing, text, CountingProducer, ManualClock};
use tokio::sync::Barrier;

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_callers_run_producer_once() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine(&clock);
    let producer = CountingProducer::new();
    let barrier = Arc::new(Barrier::new(CALLERS));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let engine = engine.clone();
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                engine
                    .get_or_compute(
                        "hot",
                        producer.slow_versioned(Duration::from_millis(50)),
                        ["t"],
                        "minutes",
                    )
                    .await
            })
        })
        .collect();

    let mut computed = 0;
    for task in tasks {
        let read = task
            .await
            .expect("task should not panic")
            .expect("read should succeed");
        assert_eq!(text(read.value()), "v1");
        if read.outcome() == ReadOutcome::Computed {
            computed += 1;
        }
    }

    assert_eq!(producer.calls(), 1);
    assert_eq!(computed, 1);
    assert_eq!(engine.active_flights(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_without_single_flight_callers_compute_independently() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine_with_config(&clock, EngineConfig::default().with_single_flight(false));
    let producer = CountingProducer::new();
    let barrier = Arc::new(Barrier::new(4));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                engine
                    .get_or_compute(
                        "hot",
                        producer.slow_versioned(Duration::from_millis(50)),
                        ["t"],
                        "minutes",
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("read should succeed");
    }

    assert!(producer.calls() > 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_readers_share_one_refresh() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine(&clock);
    let producer = CountingProducer::new();

    engine
        .get_or_compute("k", producer.versioned(), ["t"], "short")
        .await
        .expect("compute should succeed");
    clock.advance_millis(1500);

    let barrier = Arc::new(Barrier::new(CALLERS));
    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let engine = engine.clone();
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                engine
                    .get_or_compute(
                        "k",
                        producer.slow_versioned(Duration::from_millis(50)),
                        ["t"],
                        "short",
                    )
                    .await
            })
        })
        .collect();

    for task in tasks {
        let read = task
            .await
            .expect("task should not panic")
            .expect("read should succeed");
        // Either the stale value or, if the refresh already landed, the new one.
        assert!(matches!(read.outcome(), ReadOutcome::Stale | ReadOutcome::Fresh));
    }

    settle(&engine).await;
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_do_not_coalesce() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine(&clock);
    let producer = CountingProducer::new();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                engine
                    .get_or_compute(
                        format!("key-{}", i),
                        producer.slow_versioned(Duration::from_millis(10)),
                        ["t"],
                        "minutes",
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("read should succeed");
    }

    assert_eq!(producer.calls(), 8);
    assert_eq!(engine.index().keys_for(&"t".into()).len(), 8);
}

// ============================================================================
// INVALIDATION RACING RECOMPUTES
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_demotion_cannot_resurrect_an_older_value() {
    init_test_tracing();
    let clock = ManualClock::new();
    let (engine, transport) = flaky_engine(&clock);
    let producer = CountingProducer::new();
    let key = CacheKey::from("k");

    engine
        .get_or_compute("k", producer.versioned(), ["old"], "minutes")
        .await
        .expect("compute should succeed");

    // The demotion reads v1, then stalls before writing it back.
    transport.delay_next_get(Duration::from_millis(200));
    let demoting = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .invalidate(&Tag::from("old"), InvalidationMode::StaleWhileRevalidate)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine
        .invalidate_key(&key)
        .await
        .expect("delete should succeed");
    let committed = engine
        .get_or_compute("k", producer.versioned(), ["new"], "minutes")
        .await
        .expect("compute should succeed");
    assert_eq!(text(committed.value()), "v2");

    demoting
        .await
        .expect("task should not panic")
        .expect("invalidate should succeed");

    let read = engine
        .get_or_compute("k", producer.versioned(), ["new"], "minutes")
        .await
        .expect("read should succeed");
    assert_eq!(read.outcome(), ReadOutcome::Fresh);
    assert_eq!(text(read.value()), "v2");
    assert_eq!(
        engine.index().tags_for(&key).into_iter().collect::<Vec<_>>(),
        vec![Tag::from("new")]
    );
    assert_index_consistent(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_immediate_invalidation_racing_a_background_refresh() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine(&clock);
    let producer = CountingProducer::new();

    engine
        .get_or_compute("k", producer.versioned(), ["t"], "short")
        .await
        .expect("compute should succeed");
    clock.advance_millis(1500);

    let stale = engine
        .get_or_compute(
            "k",
            producer.slow_versioned(Duration::from_millis(100)),
            ["t"],
            "short",
        )
        .await
        .expect("read should succeed");
    assert_eq!(stale.outcome(), ReadOutcome::Stale);

    let report = engine
        .invalidate(&Tag::from("t"), InvalidationMode::Immediate)
        .await
        .expect("invalidate should succeed");
    assert_eq!(report.affected, 1);
    settle(&engine).await;

    let read = engine
        .get_or_compute("k", producer.versioned(), ["t"], "short")
        .await
        .expect("read should succeed");
    assert_ne!(text(read.value()), "v1");
    assert_index_consistent(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_swr_invalidation_racing_a_background_refresh() {
    init_test_tracing();
    let clock = ManualClock::new();
    let engine = engine(&clock);
    let producer = CountingProducer::new();

    engine
        .get_or_compute("k", producer.versioned(), ["t"], "minutes")
        .await
        .expect("compute should succeed");
    clock.advance_millis(90_000);

    engine
        .get_or_compute(
            "k",
            producer.slow_versioned(Duration::from_millis(100)),
            ["t"],
            "minutes",
        )
        .await
        .expect("read should succeed");
    engine
        .invalidate(&Tag::from("t"), InvalidationMode::StaleWhileRevalidate)
        .await
        .expect("invalidate should succeed");
    settle(&engine).await;

    let read = engine
        .get_or_compute("k", producer.versioned(), ["t"], "minutes")
        .await
        .expect("read should succeed");
    assert_ne!(text(read.value()), "v1");
    settle(&engine).await;
    assert_index_consistent(&engine).await;
}
