//! Tag-driven invalidation.

use tagcache_core::{
    CacheError, CacheKey, CacheResult, InvalidationMode, ProfileRef, StoreError, Tag,
};

use super::CacheEngine;
use crate::transport::KvTransport;

/// What one invalidation did.
///
/// Per-key failures never abort the run; they are collected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub tag: Tag,
    pub mode: InvalidationMode,
    /// Keys deleted or demoted.
    pub affected: usize,
    /// Keys left untouched: already older than `stale`, or no longer stored.
    pub skipped: usize,
    pub failures: Vec<(CacheKey, StoreError)>,
}

impl InvalidationReport {
    fn new(tag: Tag, mode: InvalidationMode) -> Self {
        Self {
            tag,
            mode,
            affected: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total keys the tag mapped to when the run started.
    pub fn total(&self) -> usize {
        self.affected + self.skipped + self.failures.len()
    }

    /// The transport failed for every key, so nothing was processed.
    fn transport_down(&self) -> Option<StoreError> {
        let all_unavailable = !self.failures.is_empty()
            && self.affected == 0
            && self.skipped == 0
            && self.failures.iter().all(|(_, e)| e.is_unavailable());
        if all_unavailable {
            self.failures.first().map(|(_, e)| e.clone())
        } else {
            None
        }
    }
}

enum KeyAction {
    Affected,
    Skipped,
}

impl<T: KvTransport + ?Sized + 'static> CacheEngine<T> {
    /// Invalidate every entry carrying `tag`.
    ///
    /// - [`InvalidationMode::Immediate`] deletes each entry and detaches it
    ///   from all of its tags; the next read recomputes synchronously.
    /// - [`InvalidationMode::StaleWhileRevalidate`] rewrites each entry's
    ///   `created_at` to `now - stale`, so the next read serves it once more
    ///   and refreshes in the background. Entries already at least that old
    ///   are left alone. Tag membership is unchanged. An entry whose profile
    ///   has no stale window (`stale == 0`) is deleted instead, so its next
    ///   read recomputes synchronously.
    ///
    /// An unknown tag is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] only if the transport failed for
    /// every key. Partial failures are reported in the returned report.
    pub async fn invalidate(
        &self,
        tag: &Tag,
        mode: InvalidationMode,
    ) -> CacheResult<InvalidationReport> {
        let mut report = InvalidationReport::new(tag.clone(), mode);
        let keys = self.inner.index.keys_for(tag);
        if keys.is_empty() {
            tracing::debug!(tag = %tag, mode = %mode, "No entries for tag");
            return Ok(report);
        }

        for key in keys {
            let action = match mode {
                InvalidationMode::Immediate => self.evict(&key).await,
                InvalidationMode::StaleWhileRevalidate => self.demote(&key).await,
            };
            match action {
                Ok(KeyAction::Affected) => report.affected += 1,
                Ok(KeyAction::Skipped) => report.skipped += 1,
                Err(e) => report.failures.push((key, e)),
            }
        }

        if let Some(e) = report.transport_down() {
            tracing::warn!(tag = %tag, mode = %mode, error = %e, "Invalidation failed, store unavailable");
            return Err(CacheError::Store(e));
        }
        if !report.is_clean() {
            tracing::warn!(
                tag = %tag,
                mode = %mode,
                affected = report.affected,
                failed = report.failures.len(),
                "Invalidation completed with failures"
            );
        } else {
            tracing::info!(
                tag = %tag,
                mode = %mode,
                affected = report.affected,
                skipped = report.skipped,
                "Invalidation completed"
            );
        }
        Ok(report)
    }

    /// Hard-expire every entry carrying `tag`.
    ///
    /// Always behaves as [`InvalidationMode::Immediate`]. The profile hint is
    /// accepted for call-site compatibility and not used.
    pub async fn expire_tag(
        &self,
        tag: &Tag,
        hint: Option<ProfileRef>,
    ) -> CacheResult<InvalidationReport> {
        if let Some(hint) = hint {
            tracing::debug!(tag = %tag, hint = ?hint, "Ignoring profile hint on expire_tag");
        }
        self.invalidate(tag, InvalidationMode::Immediate).await
    }

    /// Invalidate several tags in order, stopping at the first tag whose
    /// invalidation fails outright.
    pub async fn invalidate_tags<'a, I>(
        &self,
        tags: I,
        mode: InvalidationMode,
    ) -> CacheResult<Vec<InvalidationReport>>
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        let mut reports = Vec::new();
        for tag in tags {
            reports.push(self.invalidate(tag, mode).await?);
        }
        Ok(reports)
    }

    /// Delete one entry regardless of its tags. Returns whether it existed.
    pub async fn invalidate_key(&self, key: &CacheKey) -> CacheResult<bool> {
        let _flight = self.begin_flight(key).await;
        let existed = self.inner.store.delete(key).await?;
        self.inner.index.remove_key(key);
        tracing::debug!(key = %key, existed, "Key invalidated");
        Ok(existed)
    }

    // evict and demote run under the key's flight so a concurrent recompute
    // or background refresh cannot interleave between read and write.

    async fn evict(&self, key: &CacheKey) -> Result<KeyAction, StoreError> {
        let _flight = self.begin_flight(key).await;
        self.remove_entry(key).await
    }

    async fn demote(&self, key: &CacheKey) -> Result<KeyAction, StoreError> {
        let _flight = self.begin_flight(key).await;
        let entry = match self.inner.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                // Expired out of the store since it was indexed.
                self.inner.index.remove_key(key);
                return Ok(KeyAction::Skipped);
            }
            Err(StoreError::Codec { .. }) => return self.remove_entry(key).await,
            Err(e) => return Err(e),
        };

        // No stale window to demote into: next access recomputes.
        if entry.profile.stale.is_zero() {
            return self.remove_entry(key).await;
        }

        let now = self.inner.clock.now();
        let Some(demoted) = entry.demoted(now) else {
            return Ok(KeyAction::Skipped);
        };
        if demoted.is_expired(now) {
            // stale == expire: demotion would land past expiry.
            return self.remove_entry(key).await;
        }
        self.inner.store.put(&demoted, demoted.remaining_ttl(now)).await?;
        Ok(KeyAction::Affected)
    }

    /// Delete and detach. Callers hold the key's flight.
    async fn remove_entry(&self, key: &CacheKey) -> Result<KeyAction, StoreError> {
        self.inner.store.delete(key).await?;
        self.inner.index.remove_key(key);
        Ok(KeyAction::Affected)
    }
}
