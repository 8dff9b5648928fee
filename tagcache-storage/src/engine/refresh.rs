//! Background refresh of stale entries.
//!
//! A stale read returns immediately and hands the producer to a spawned
//! task. Tasks are deduplicated per key, bounded by a semaphore, and report
//! their outcome on a broadcast channel of [`RefreshEvent`]s. The stale
//! entry stays in place until a refresh succeeds.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use dashmap::DashMap;
use tagcache_core::{
    CacheError, CacheKey, ComputeError, FreshnessState, LifetimeProfile, Tag,
};
use tokio::sync::{broadcast, Semaphore};

use super::stats::EngineStats;
use super::CacheEngine;
use crate::transport::KvTransport;

/// Outcome of one background refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// The producer succeeded and the new value was committed.
    Refreshed { key: CacheKey },
    /// The producer failed; the stale entry was kept.
    Failed { key: CacheKey, error: CacheError },
}

impl RefreshEvent {
    pub fn key(&self) -> &CacheKey {
        match self {
            RefreshEvent::Refreshed { key } | RefreshEvent::Failed { key, .. } => key,
        }
    }
}

/// Bounded worker pool state shared by all refresh tasks of one engine.
#[derive(Debug)]
pub(crate) struct RefreshPool {
    permits: Semaphore,
    pending: DashMap<CacheKey, ()>,
    events: broadcast::Sender<RefreshEvent>,
}

impl RefreshPool {
    pub(crate) fn new(concurrency: usize, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            permits: Semaphore::new(concurrency),
            pending: DashMap::new(),
            events,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    fn publish(&self, event: RefreshEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Clears the pending marker even if the refresh task panics.
struct PendingGuard<'a> {
    pool: &'a RefreshPool,
    key: CacheKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pool.pending.remove(&self.key);
    }
}

impl<T: KvTransport + ?Sized + 'static> CacheEngine<T> {
    /// Spawn a refresh for `key` unless one is already pending.
    ///
    /// Returns whether a new task was spawned.
    pub(super) fn schedule_refresh<P, Fut, E>(
        &self,
        key: CacheKey,
        producer: P,
        tags: BTreeSet<Tag>,
        profile: LifetimeProfile,
    ) -> bool
    where
        P: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if self.inner.refresh.pending.insert(key.clone(), ()).is_some() {
            tracing::debug!(key = %key, "Refresh already pending");
            return false;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let _pending = PendingGuard {
                pool: &engine.inner.refresh,
                key: key.clone(),
            };
            engine.run_refresh(key, producer, tags, profile).await;
        });
        true
    }

    async fn run_refresh<P, Fut, E>(
        &self,
        key: CacheKey,
        producer: P,
        tags: BTreeSet<Tag>,
        profile: LifetimeProfile,
    ) where
        P: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let Ok(_permit) = self.inner.refresh.permits.acquire().await else {
            return;
        };
        let _flight = self.begin_flight(&key).await;

        // A synchronous recompute may have won the race while we queued.
        if let Some(entry) = self.inner.load(&key).await {
            if entry.freshness(self.inner.clock.now()) == FreshnessState::Fresh {
                tracing::debug!(key = %key, "Entry already fresh, skipping refresh");
                return;
            }
        }

        match producer().await {
            Ok(value) => {
                self.commit(&key, value, &tags, &profile).await;
                EngineStats::bump(&self.inner.stats.background_refreshes);
                tracing::debug!(key = %key, "Background refresh completed");
                self.inner.refresh.publish(RefreshEvent::Refreshed { key });
            }
            Err(e) => {
                EngineStats::bump(&self.inner.stats.refresh_failures);
                let error = CacheError::from(ComputeError::Failed {
                    key: key.clone(),
                    reason: e.to_string(),
                });
                tracing::warn!(key = %key, error = %error, "Background refresh failed, keeping stale entry");
                self.inner.refresh.publish(RefreshEvent::Failed { key, error });
            }
        }
    }
}
