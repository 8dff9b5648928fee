//! Cache engine.
//!
//! [`CacheEngine`] ties the entry store, the tag index and the profile
//! registry together:
//!
//! - `get_or_compute` classifies the stored entry against its own profile and
//!   serves it, serves it while refreshing in the background, or recomputes
//!   it synchronously under a per-key single-flight lock.
//! - `invalidate` finds every key carrying a tag and either deletes it or
//!   demotes it to stale.
//!
//! Store failures never reach callers of `get_or_compute`: reads degrade to a
//! miss and writes degrade to "serve but don't persist". Both are logged and
//! counted in [`EngineStats`].
//!
//! # Example
//!
//! ```ignore
//! let engine = CacheEngine::with_defaults(Arc::new(InMemoryTransport::new()))?;
//!
//! let read = engine
//!     .get_or_compute("posts:recent", || async { load_posts().await }, ["posts"], "minutes")
//!     .await?;
//!
//! engine.invalidate(&Tag::from("posts"), InvalidationMode::StaleWhileRevalidate).await?;
//! ```

mod flight;
mod invalidate;
mod maintenance;
mod refresh;
mod stats;

pub use invalidate::InvalidationReport;
pub use maintenance::ReapReport;
pub use refresh::RefreshEvent;
pub use stats::{EngineStats, EngineStatsSnapshot};

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use tagcache_core::constants::REFRESH_EVENT_CAPACITY;
use tagcache_core::{
    CacheEntry, CacheKey, CacheResult, ComputeError, EngineConfig, FreshnessState,
    LifetimeProfile, ProfileRef, ProfileRegistry, SharedClock, StoreError, SystemClock, Tag,
    Timestamp,
};
use tokio::sync::broadcast;

use crate::entry_store::EntryStore;
use crate::freshness::{CacheRead, ReadOutcome};
use crate::namespace::Namespace;
use crate::tag_index::TagIndex;
use crate::transport::KvTransport;

use flight::{FlightGroup, FlightGuard};
use refresh::RefreshPool;

/// Tag-indexed, profile-driven cache over a [`KvTransport`].
///
/// Cloning is cheap and every clone shares the same state.
pub struct CacheEngine<T: KvTransport + ?Sized + 'static> {
    inner: Arc<EngineInner<T>>,
}

impl<T: KvTransport + ?Sized + 'static> Clone for CacheEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: KvTransport + ?Sized + 'static> fmt::Debug for CacheEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.inner.config)
            .field("indexed_keys", &self.inner.index.key_count())
            .field("indexed_tags", &self.inner.index.tag_count())
            .finish()
    }
}

struct EngineInner<T: KvTransport + ?Sized> {
    store: EntryStore<T>,
    index: TagIndex,
    profiles: Arc<ProfileRegistry>,
    config: EngineConfig,
    clock: SharedClock,
    flights: FlightGroup,
    refresh: RefreshPool,
    stats: EngineStats,
}

impl<T: KvTransport + ?Sized> EngineInner<T> {
    /// Current time truncated to what the codec persists.
    fn now_millis(&self) -> Timestamp {
        let now = self.clock.now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    /// Read an entry, degrading every failure to a miss.
    async fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e @ StoreError::Codec { .. }) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable entry");
                if let Err(e) = self.store.delete(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to delete undecodable entry");
                }
                self.index.remove_key(key);
                None
            }
            Err(e) => {
                EngineStats::bump(&self.stats.store_read_failures);
                tracing::warn!(key = %key, error = %e, "Store read failed, treating as miss");
                None
            }
        }
    }
}

impl<T: KvTransport + ?Sized + 'static> CacheEngine<T> {
    /// Create an engine.
    ///
    /// Fails if the configuration is invalid or names a default profile the
    /// registry does not know.
    pub fn new(
        transport: Arc<T>,
        profiles: Arc<ProfileRegistry>,
        config: EngineConfig,
        clock: SharedClock,
    ) -> CacheResult<Self> {
        config.validate()?;
        profiles.resolve(&config.default_profile)?;

        let store = EntryStore::new(transport, Namespace::new(config.key_prefix.as_bytes()));
        let refresh = RefreshPool::new(config.refresh_concurrency, REFRESH_EVENT_CAPACITY);

        tracing::debug!(
            key_prefix = %config.key_prefix,
            single_flight = config.single_flight,
            refresh_concurrency = config.refresh_concurrency,
            profiles = profiles.len(),
            "Cache engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                index: TagIndex::new(),
                profiles,
                config,
                clock,
                flights: FlightGroup::new(),
                refresh,
                stats: EngineStats::new(),
            }),
        })
    }

    /// Engine with the built-in profiles, default config and the system clock.
    pub fn with_defaults(transport: Arc<T>) -> CacheResult<Self> {
        Self::new(
            transport,
            Arc::new(ProfileRegistry::default()),
            EngineConfig::default(),
            SystemClock::shared(),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.inner.profiles
    }

    pub fn index(&self) -> &TagIndex {
        &self.inner.index
    }

    pub fn store(&self) -> &EntryStore<T> {
        &self.inner.store
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Receive the outcome of every background refresh from now on.
    pub fn subscribe_refresh_events(&self) -> broadcast::Receiver<RefreshEvent> {
        self.inner.refresh.subscribe()
    }

    /// Background refreshes spawned but not yet finished.
    pub fn pending_refreshes(&self) -> usize {
        self.inner.refresh.pending()
    }

    /// Keys with a recompute in progress.
    pub fn active_flights(&self) -> usize {
        self.inner.flights.len()
    }

    /// Raw stored entry, without freshness handling or fallbacks.
    pub async fn peek(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.inner.store.get(key).await?)
    }

    /// Return the cached value for `key`, computing it with `producer` when
    /// there is no usable entry.
    ///
    /// `tags` and `profile` describe the entry written on a recompute; an
    /// existing entry is always judged against the profile it was stored
    /// with. The producer runs at most once per call, either inline or on a
    /// background task when a stale entry is served.
    ///
    /// # Errors
    ///
    /// - [`ProfileError`](tagcache_core::ProfileError) if `profile` does not resolve
    /// - [`ComputeError::Failed`] if the producer fails on the caller's path;
    ///   nothing is cached and an existing entry is left untouched
    pub async fn get_or_compute<K, P, Fut, E, I, G>(
        &self,
        key: K,
        producer: P,
        tags: I,
        profile: impl Into<ProfileRef>,
    ) -> CacheResult<CacheRead>
    where
        K: Into<CacheKey>,
        P: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        I: IntoIterator<Item = G>,
        G: Into<Tag>,
    {
        let key = key.into();
        let profile = self.inner.profiles.resolve_ref(&profile.into())?;
        let tags: BTreeSet<Tag> = tags.into_iter().map(Into::into).collect();

        let Some(entry) = self.inner.load(&key).await else {
            EngineStats::bump(&self.inner.stats.misses);
            tracing::debug!(key = %key, "Cache miss");
            return self
                .recompute(key, producer, tags, profile, ReadOutcome::Computed)
                .await;
        };

        match entry.freshness(self.inner.clock.now()) {
            FreshnessState::Fresh => {
                EngineStats::bump(&self.inner.stats.hits);
                tracing::debug!(key = %key, "Cache hit");
                Ok(CacheRead::new(entry.value, entry.created_at, ReadOutcome::Fresh))
            }
            FreshnessState::Stale => {
                EngineStats::bump(&self.inner.stats.stale_hits);
                tracing::debug!(key = %key, "Stale hit, scheduling refresh");
                self.schedule_refresh(key, producer, tags, profile);
                Ok(CacheRead::new(entry.value, entry.created_at, ReadOutcome::Stale))
            }
            FreshnessState::Expired => {
                EngineStats::bump(&self.inner.stats.misses);
                tracing::debug!(key = %key, "Entry expired, recomputing");
                self.recompute(key, producer, tags, profile, ReadOutcome::Recomputed)
                    .await
            }
        }
    }

    /// [`get_or_compute`](Self::get_or_compute) with the configured default profile.
    pub async fn get_or_compute_default<K, P, Fut, E, I, G>(
        &self,
        key: K,
        producer: P,
        tags: I,
    ) -> CacheResult<CacheRead>
    where
        K: Into<CacheKey>,
        P: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        I: IntoIterator<Item = G>,
        G: Into<Tag>,
    {
        let profile = ProfileRef::Named(self.inner.config.default_profile.clone());
        self.get_or_compute(key, producer, tags, profile).await
    }

    async fn begin_flight(&self, key: &CacheKey) -> Option<FlightGuard<'_>> {
        if self.inner.config.single_flight {
            Some(self.inner.flights.acquire(key).await)
        } else {
            None
        }
    }

    /// Synchronous recompute under the key's flight lock.
    async fn recompute<P, Fut, E>(
        &self,
        key: CacheKey,
        producer: P,
        tags: BTreeSet<Tag>,
        profile: LifetimeProfile,
        outcome: ReadOutcome,
    ) -> CacheResult<CacheRead>
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: fmt::Display,
    {
        let flight = self.begin_flight(&key).await;

        // Whoever held the flight before us may already have written it.
        if flight.is_some() {
            if let Some(entry) = self.inner.load(&key).await {
                if entry.freshness(self.inner.clock.now()) != FreshnessState::Expired {
                    EngineStats::bump(&self.inner.stats.coalesced);
                    tracing::debug!(key = %key, "Served by concurrent recompute");
                    return Ok(CacheRead::new(
                        entry.value,
                        entry.created_at,
                        ReadOutcome::Coalesced,
                    ));
                }
            }
        }

        EngineStats::bump(&self.inner.stats.computes);
        let value = match producer().await {
            Ok(value) => value,
            Err(e) => {
                EngineStats::bump(&self.inner.stats.compute_failures);
                tracing::warn!(key = %key, error = %e, "Producer failed");
                return Err(ComputeError::Failed {
                    key,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let created_at = self.commit(&key, value.clone(), &tags, &profile).await;
        drop(flight);
        Ok(CacheRead::new(value, created_at, outcome))
    }

    /// Persist a freshly computed value and retag its key.
    ///
    /// A failed write is logged and counted; the index is left as it was so
    /// it keeps describing what the store actually holds.
    async fn commit(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        tags: &BTreeSet<Tag>,
        profile: &LifetimeProfile,
    ) -> Timestamp {
        let created_at = self.inner.now_millis();
        let entry = CacheEntry::new(key.clone(), value, tags.clone(), *profile, created_at);

        match self.inner.store.put(&entry, profile.ttl()).await {
            // Dead on arrival: nothing live to index.
            Ok(()) if profile.ttl() == Some(Duration::ZERO) => {
                self.inner.index.remove_key(key);
            }
            Ok(()) => self.inner.index.retag(key, tags),
            Err(e) => {
                EngineStats::bump(&self.inner.stats.store_write_failures);
                tracing::warn!(key = %key, error = %e, "Store write failed, value not persisted");
            }
        }
        created_at
    }
}
