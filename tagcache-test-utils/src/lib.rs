//! TAGCACHE Test Utilities
//!
//! Shared test infrastructure for the TAGCACHE workspace:
//! - A manually driven clock for freshness tests
//! - Counting producers and a transport with injectable failures
//! - Proptest generators for keys, tags and profiles
//! - Fixtures and custom assertions

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Re-export core types for convenience
pub use tagcache_core::{
    CacheError, CacheKey, CacheResult, Clock, InvalidationMode, LifetimeProfile, ProfileRef,
    ProfileRegistry, SharedClock, StoreError, Tag, Timestamp,
};
pub use tagcache_storage::{CacheEngine, InMemoryTransport, KvTransport, ReadOutcome};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG`, once per process.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Start at the current wall-clock time, truncated to whole milliseconds
    /// so stored timestamps compare equal to the ones handed out.
    pub fn new() -> Arc<Self> {
        let now = Utc::now();
        Self::at(DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now))
    }

    pub fn at(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// This clock as the engine's shared clock type.
    pub fn shared(self: &Arc<Self>) -> SharedClock {
        Arc::clone(self) as SharedClock
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// PRODUCERS
// ============================================================================

/// Boxed producer future used by the helpers below.
pub type ProducerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>;

/// Hands out producers that all bump one shared call counter.
#[derive(Debug, Clone, Default)]
pub struct CountingProducer {
    calls: Arc<AtomicUsize>,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many producers have been invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Producer returning `value`.
    pub fn value(&self, value: &str) -> impl FnOnce() -> ProducerFuture + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let value = value.as_bytes().to_vec();
        move || -> ProducerFuture {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok::<_, String>(value) })
        }
    }

    /// Producer returning `"v{n}"`, where `n` is this invocation's 1-based
    /// call number, so each recompute yields a distinguishable value.
    pub fn versioned(&self) -> impl FnOnce() -> ProducerFuture + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move || -> ProducerFuture {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok::<_, String>(format!("v{}", n).into_bytes()) })
        }
    }

    /// Like [`versioned`](Self::versioned) but sleeps first, so concurrent
    /// callers overlap with the producer.
    pub fn slow_versioned(&self, delay: Duration) -> impl FnOnce() -> ProducerFuture + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move || -> ProducerFuture {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok::<_, String>(format!("v{}", n).into_bytes())
            })
        }
    }

    /// Producer that fails with `reason`.
    pub fn failing(&self, reason: &str) -> impl FnOnce() -> ProducerFuture + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let reason = reason.to_string();
        move || -> ProducerFuture {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err::<Vec<u8>, _>(reason) })
        }
    }
}

/// Decode a value produced by the helpers above.
pub fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// FLAKY TRANSPORT
// ============================================================================

/// In-memory transport whose reads and writes can be switched to fail, and
/// whose next `get` can be slowed down to widen race windows.
#[derive(Debug)]
pub struct FlakyTransport {
    inner: InMemoryTransport,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failed_ops: AtomicUsize,
    next_get_delay: Mutex<Option<Duration>>,
}

impl FlakyTransport {
    pub fn new(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTransport::with_clock(clock),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            failed_ops: AtomicUsize::new(0),
            next_get_delay: Mutex::new(None),
        })
    }

    /// Make `get` and `scan_prefix` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `set`, `delete`, `delete_prefix` and `purge_expired` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold the next `get` for `delay` after it has read its value.
    pub fn delay_next_get(&self, delay: Duration) {
        *self.next_get_delay.lock().expect("delay lock poisoned") = Some(delay);
    }

    pub fn failed_ops(&self) -> usize {
        self.failed_ops.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryTransport {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            self.failed_ops.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::unavailable(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvTransport for FlakyTransport {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(&self.fail_reads, "get")?;
        let value = self.inner.get(key).await?;
        let delay = self.next_get_delay.lock().expect("delay lock poisoned").take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }

    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check(&self.fail_writes, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.check(&self.fail_writes, "delete")?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.check(&self.fail_reads, "scan_prefix")?;
        self.inner.scan_prefix(prefix, limit).await
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StoreError> {
        self.check(&self.fail_writes, "delete_prefix")?;
        self.inner.delete_prefix(prefix).await
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.check(&self.fail_writes, "purge_expired")?;
        self.inner.purge_expired().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a printable cache key.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        "[a-z]{1,8}(:[a-z0-9]{1,6}){0,2}".prop_map(CacheKey::from)
    }

    /// Generate a tag from a small alphabet, so tags collide across keys.
    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        "[a-e]".prop_map(Tag::from)
    }

    /// Generate a tag set of up to three tags.
    pub fn arb_tag_set() -> impl Strategy<Value = Vec<Tag>> {
        prop::collection::vec(arb_tag(), 0..4)
    }

    /// Generate a valid profile with `stale <= revalidate <= expire`.
    pub fn arb_profile() -> impl Strategy<Value = LifetimeProfile> {
        (0u64..100, 0u64..100, prop::option::of(0u64..1000), any::<bool>()).prop_filter_map(
            "windows must be ordered",
            |(stale, extra, expire_extra, background)| {
                let revalidate = stale + extra;
                let expire = expire_extra.map(|e| revalidate + e);
                LifetimeProfile::from_secs(stale, revalidate, expire)
                    .ok()
                    .map(|p| p.with_background_refresh(background))
            },
        )
    }

    /// Generate a reference to a built-in profile or an inline one.
    pub fn arb_profile_ref() -> impl Strategy<Value = ProfileRef> {
        prop_oneof![
            prop::sample::select(vec!["default", "seconds", "minutes", "hours", "days", "weeks", "max"])
                .prop_map(ProfileRef::from),
            arb_profile().prop_map(ProfileRef::from),
        ]
    }

    /// Generate an invalidation mode.
    pub fn arb_invalidation_mode() -> impl Strategy<Value = InvalidationMode> {
        prop_oneof![
            Just(InvalidationMode::Immediate),
            Just(InvalidationMode::StaleWhileRevalidate),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use tagcache_core::EngineConfig;

    /// The {1s, 2s, 3s} profile used by scenario tests.
    pub fn short_profile() -> LifetimeProfile {
        LifetimeProfile::from_secs(1, 2, Some(3)).expect("short profile is valid")
    }

    /// Built-in profiles plus `short`.
    pub fn registry() -> Arc<ProfileRegistry> {
        let mut builder = ProfileRegistry::builder();
        builder
            .register("short", short_profile())
            .expect("short is not a built-in name");
        Arc::new(builder.build())
    }

    /// Engine over an in-memory transport that shares `clock`.
    pub fn engine(clock: &Arc<ManualClock>) -> CacheEngine<InMemoryTransport> {
        engine_with_config(clock, EngineConfig::default())
    }

    pub fn engine_with_config(
        clock: &Arc<ManualClock>,
        config: EngineConfig,
    ) -> CacheEngine<InMemoryTransport> {
        let transport = Arc::new(InMemoryTransport::with_clock(clock.shared()));
        CacheEngine::new(transport, registry(), config, clock.shared())
            .expect("test engine config is valid")
    }

    /// Engine over a [`FlakyTransport`], returned alongside it.
    pub fn flaky_engine(
        clock: &Arc<ManualClock>,
    ) -> (CacheEngine<FlakyTransport>, Arc<FlakyTransport>) {
        let transport = FlakyTransport::new(clock.shared());
        let engine = CacheEngine::new(
            Arc::clone(&transport),
            registry(),
            EngineConfig::default(),
            clock.shared(),
        )
        .expect("test engine config is valid");
        (engine, transport)
    }

    /// Wait until every spawned background refresh has finished.
    pub async fn settle<T: KvTransport + ?Sized + 'static>(engine: &CacheEngine<T>) {
        for _ in 0..500 {
            if engine.pending_refreshes() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("background refreshes did not settle");
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is a producer failure.
    pub fn assert_compute_failed<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.is_compute_failed() => {}
            other => panic!("Expected ComputeFailed, got {:?}", other),
        }
    }

    /// Assert that a result is a store-unavailable error.
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Store(e)) if e.is_unavailable() => {}
            other => panic!("Expected StoreUnavailable, got {:?}", other),
        }
    }

    /// Assert that the engine's tag index agrees with its store.
    pub async fn assert_index_consistent<T: KvTransport + ?Sized + 'static>(
        engine: &CacheEngine<T>,
    ) {
        let problems = engine
            .check_index_consistency()
            .await
            .unwrap_or_else(|e| panic!("consistency check failed: {}", e));
        assert!(problems.is_empty(), "Tag index inconsistent: {:#?}", problems);
    }
}
