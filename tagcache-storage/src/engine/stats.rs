//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters for one engine. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Fresh entries served from the store
    pub hits: AtomicU64,
    /// Stale entries served while a refresh was scheduled
    pub stale_hits: AtomicU64,
    /// Reads that found no usable entry (absent or expired)
    pub misses: AtomicU64,
    /// Reads satisfied by another caller's in-flight recompute
    pub coalesced: AtomicU64,
    /// Producer runs on the caller's path
    pub computes: AtomicU64,
    /// Producer runs that failed on the caller's path
    pub compute_failures: AtomicU64,
    /// Background refreshes that completed and were written
    pub background_refreshes: AtomicU64,
    /// Background refreshes whose producer failed
    pub refresh_failures: AtomicU64,
    /// Store reads that failed and were degraded to a miss
    pub store_read_failures: AtomicU64,
    /// Store writes that failed; the value was served but not persisted
    pub store_write_failures: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            store_read_failures: self.store_read_failures.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub computes: u64,
    pub compute_failures: u64,
    pub background_refreshes: u64,
    pub refresh_failures: u64,
    pub store_read_failures: u64,
    pub store_write_failures: u64,
}

impl EngineStatsSnapshot {
    /// Fraction of reads served without running the producer inline.
    ///
    /// Stale hits count as hits. Returns 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
