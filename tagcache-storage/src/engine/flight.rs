//! Per-key single-flight locks.
//!
//! One async mutex per key that is currently being recomputed. The map slot
//! is released as soon as the last holder or waiter lets go, so the map only
//! ever holds keys with work in progress.

use std::sync::Arc;

use dashmap::DashMap;
use tagcache_core::CacheKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct FlightGroup {
    flights: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl FlightGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`'s flight.
    pub(crate) async fn acquire(&self, key: &CacheKey) -> FlightGuard<'_> {
        // The shard guard must be gone before awaiting.
        let lock = Arc::clone(self.flights.entry(key.clone()).or_default().value());
        let guard = lock.lock_owned().await;
        FlightGuard {
            group: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a flight in progress or waited on.
    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

pub(crate) struct FlightGuard<'a> {
    group: &'a FlightGroup,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the Arc, so a count of one means
        // only the map still references the lock.
        self.group
            .flights
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
