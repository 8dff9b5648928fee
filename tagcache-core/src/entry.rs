//! Cache entries and their derived freshness state.

use crate::profile::LifetimeProfile;
use crate::{CacheKey, Tag, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Freshness of an entry relative to its profile. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreshnessState {
    /// Serve as-is.
    Fresh,
    /// Serve, and refresh in the background.
    Stale,
    /// Recompute before serving.
    Expired,
}

impl fmt::Display for FreshnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FreshnessState::Fresh => "fresh",
            FreshnessState::Stale => "stale",
            FreshnessState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A stored computation result.
///
/// Entries are never mutated in place: a refresh writes a new entry at the
/// same key, and stale-while-revalidate demotion produces a copy with an
/// older `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Vec<u8>,
    pub tags: BTreeSet<Tag>,
    pub profile: LifetimeProfile,
    pub created_at: Timestamp,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        value: Vec<u8>,
        tags: BTreeSet<Tag>,
        profile: LifetimeProfile,
        created_at: Timestamp,
    ) -> Self {
        Self {
            key,
            value,
            tags,
            profile,
            created_at,
        }
    }

    /// Age at `now`. An entry stamped in the future has age zero.
    pub fn age(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn freshness(&self, now: Timestamp) -> FreshnessState {
        self.profile.classify(self.age(now))
    }

    /// True once `age >= expire`; unbounded profiles never hard-expire.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.profile.is_unbounded() && self.age(now) >= self.profile.expire
    }

    /// Copy of this entry aged to exactly `stale` at `now`.
    ///
    /// Returns `None` when the entry is already at least that old, so a
    /// demotion never makes an entry fresher.
    pub fn demoted(&self, now: Timestamp) -> Option<CacheEntry> {
        let stale = chrono::Duration::from_std(self.profile.stale).ok()?;
        let demoted_at = now.checked_sub_signed(stale)?;
        if demoted_at >= self.created_at {
            return None;
        }
        Some(CacheEntry {
            created_at: demoted_at,
            ..self.clone()
        })
    }

    /// Time left before the backing store may drop this entry.
    pub fn remaining_ttl(&self, now: Timestamp) -> Option<Duration> {
        self.profile
            .ttl()
            .map(|ttl| ttl.saturating_sub(self.age(now)))
    }
}
