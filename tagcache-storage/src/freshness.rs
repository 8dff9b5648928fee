//! Read results with staleness metadata.
//!
//! Every value the engine hands out is wrapped in a [`CacheRead`] that
//! records where the value came from and when it was produced, so callers
//! can tell a fresh hit from a stale one that is being refreshed.

use std::fmt;
use std::time::Duration;

use tagcache_core::Timestamp;

/// How a read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOutcome {
    /// Stored entry younger than its `stale` window.
    Fresh,
    /// Stored entry past `stale`; a background refresh was scheduled.
    Stale,
    /// No usable entry; the producer ran.
    Computed,
    /// Entry had expired; the producer ran synchronously to replace it.
    Recomputed,
    /// Another caller's recompute finished while this one waited.
    Coalesced,
}

impl ReadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadOutcome::Fresh => "fresh",
            ReadOutcome::Stale => "stale",
            ReadOutcome::Computed => "computed",
            ReadOutcome::Recomputed => "recomputed",
            ReadOutcome::Coalesced => "coalesced",
        }
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value returned by the engine, together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead<T = Vec<u8>> {
    value: T,
    created_at: Timestamp,
    outcome: ReadOutcome,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, created_at: Timestamp, outcome: ReadOutcome) -> Self {
        Self {
            value,
            created_at,
            outcome,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn outcome(&self) -> ReadOutcome {
        self.outcome
    }

    /// When the value was produced. For demoted entries this is the
    /// rewritten timestamp, not the original compute time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// False only when this caller ran the producer itself.
    pub fn was_cache_hit(&self) -> bool {
        !matches!(self.outcome, ReadOutcome::Computed | ReadOutcome::Recomputed)
    }

    /// Age of the value at `now`.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Transform the value while keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            created_at: self.created_at,
            outcome: self.outcome,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
