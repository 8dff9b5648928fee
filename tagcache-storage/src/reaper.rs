//! Reaper Background Task
//!
//! Periodically removes hard-expired entries and detaches index keys whose
//! entries have already left the store (for example through transport TTL).
//! Without it the tag index only shrinks when entries are invalidated or
//! recomputed.
//!
//! # Configuration
//!
//! The reaper is configured via [`ReaperConfig`]:
//!
//! ```rust
//! use tagcache_core::ReaperConfig;
//! use std::time::Duration;
//!
//! let config = ReaperConfig {
//!     interval: Duration::from_secs(300), // Every five minutes
//!     batch_size: 1000,                   // Look at up to 1000 keys per cycle
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tagcache_core::ReaperConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::CacheEngine;
use crate::transport::KvTransport;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reaper activity since startup.
#[derive(Debug, Default)]
pub struct ReaperMetrics {
    /// Total expired entries deleted
    pub entries_reaped: AtomicU64,

    /// Total index keys detached because their entry was gone
    pub orphans_detached: AtomicU64,

    /// Total reaper cycles completed
    pub cycles: AtomicU64,

    /// Total errors encountered (failed keys and failed cycles)
    pub errors: AtomicU64,
}

impl ReaperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ReaperSnapshot {
        ReaperSnapshot {
            entries_reaped: self.entries_reaped.load(Ordering::Relaxed),
            orphans_detached: self.orphans_detached.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of reaper metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSnapshot {
    pub entries_reaped: u64,
    pub orphans_detached: u64,
    pub cycles: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that reaps expired entries until shutdown is signalled.
///
/// # Arguments
///
/// * `engine` - Engine whose store and index are maintained
/// * `config` - Tick interval and per-cycle batch size
/// * `shutdown_rx` - Watch receiver for shutdown signal
///
/// # Returns
///
/// Metrics collected during the task's lifetime
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(reaper_task(engine.clone(), ReaperConfig::default(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn reaper_task<T: KvTransport + ?Sized + 'static>(
    engine: CacheEngine<T>,
    config: ReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ReaperMetrics> {
    let metrics = Arc::new(ReaperMetrics::new());

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        batch_size = config.batch_size,
        "Reaper task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Reaper task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                reap_cycle(&engine, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        entries_reaped = snapshot.entries_reaped,
        orphans_detached = snapshot.orphans_detached,
        cycles = snapshot.cycles,
        errors = snapshot.errors,
        "Reaper task completed"
    );

    metrics
}

/// Perform one reaper cycle.
async fn reap_cycle<T: KvTransport + ?Sized + 'static>(
    engine: &CacheEngine<T>,
    config: &ReaperConfig,
    metrics: &ReaperMetrics,
) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let report = match engine.reap_expired(config.batch_size).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "Reaper cycle failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    metrics
        .entries_reaped
        .fetch_add(report.expired as u64, Ordering::Relaxed);
    metrics
        .entries_reaped
        .fetch_add(report.purged, Ordering::Relaxed);
    metrics
        .orphans_detached
        .fetch_add(report.orphans as u64, Ordering::Relaxed);
    metrics
        .errors
        .fetch_add(report.failures.len() as u64, Ordering::Relaxed);

    for (key, e) in &report.failures {
        tracing::warn!(key = %key, error = %e, "Failed to reap entry");
    }

    if report.expired > 0 || report.orphans > 0 || report.purged > 0 {
        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            orphans = report.orphans,
            purged = report.purged,
            "Reaper cycle completed"
        );
    } else {
        tracing::trace!(scanned = report.scanned, "Reaper cycle completed with nothing to reap");
    }
}
