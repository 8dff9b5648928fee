//! Whole-cache maintenance: clearing, rebuilding the tag index from the
//! store, and reaping hard-expired entries.

use std::collections::BTreeSet;

use tagcache_core::{CacheKey, CacheResult, StoreError};

use super::CacheEngine;
use crate::transport::KvTransport;

/// Result of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Keys looked at, from the store and from the index.
    pub scanned: usize,
    /// Entries deleted because `age >= expire`.
    pub expired: usize,
    /// Index keys whose entry had already left the store.
    pub orphans: usize,
    /// Records past their TTL that the transport held and has now dropped.
    pub purged: u64,
    pub failures: Vec<(CacheKey, StoreError)>,
}

impl<T: KvTransport + ?Sized + 'static> CacheEngine<T> {
    /// Drop every entry under this engine's namespace and reset the index.
    pub async fn clear(&self) -> CacheResult<u64> {
        let removed = self.inner.store.delete_matching_prefix(b"").await?;
        self.inner.index.clear();
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Re-attach the tags of every live stored entry.
    ///
    /// Used after a restart against a persistent transport, when the store
    /// still holds entries but the in-memory index is empty. Returns the
    /// number of entries indexed.
    pub async fn rebuild_tag_index(&self) -> CacheResult<usize> {
        let keys = self.inner.store.keys(None).await?;
        let now = self.inner.clock.now();
        self.inner.index.clear();

        let mut indexed = 0usize;
        for key in keys {
            match self.inner.store.get(&key).await {
                Ok(Some(entry)) if !entry.is_expired(now) => {
                    self.inner.index.retag(&key, &entry.tags);
                    indexed += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping entry during index rebuild");
                }
            }
        }

        tracing::info!(
            indexed,
            tags = self.inner.index.tag_count(),
            "Tag index rebuilt"
        );
        Ok(indexed)
    }

    /// Delete up to `batch_size` hard-expired entries, detach index keys
    /// whose entries are gone, and have the transport purge records whose
    /// TTL has elapsed.
    pub async fn reap_expired(&self, batch_size: usize) -> CacheResult<ReapReport> {
        let now = self.inner.clock.now();
        let mut report = ReapReport {
            purged: self.inner.store.transport().purge_expired().await?,
            ..ReapReport::default()
        };

        let mut candidates: BTreeSet<CacheKey> =
            self.inner.store.keys(Some(batch_size)).await?.into_iter().collect();
        candidates.extend(self.inner.index.keys().into_iter().take(batch_size));

        for key in candidates {
            report.scanned += 1;
            match self.inner.store.get(&key).await {
                Ok(Some(entry)) if entry.is_expired(now) => {
                    match self.inner.store.delete(&key).await {
                        Ok(_) => {
                            self.inner.index.remove_key(&key);
                            report.expired += 1;
                        }
                        Err(e) => report.failures.push((key, e)),
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    if !self.inner.index.remove_key(&key).is_empty() {
                        report.orphans += 1;
                    }
                }
                Err(StoreError::Codec { .. }) => {
                    if let Err(e) = self.inner.store.delete(&key).await {
                        report.failures.push((key, e));
                    } else {
                        self.inner.index.remove_key(&key);
                        report.expired += 1;
                    }
                }
                Err(e) => report.failures.push((key, e)),
            }
        }

        Ok(report)
    }

    /// Compare the tag index against the stored entries.
    ///
    /// Returns a description of every mismatch: index inconsistencies, index
    /// keys with no live entry, and entries whose tags differ from the index.
    /// Only meaningful while no other operation runs.
    pub async fn check_index_consistency(&self) -> CacheResult<Vec<String>> {
        let mut problems = self.inner.index.check_consistency();
        let now = self.inner.clock.now();

        for key in self.inner.index.keys() {
            match self.inner.store.get(&key).await? {
                Some(entry) if !entry.is_expired(now) => {
                    let indexed = self.inner.index.tags_for(&key);
                    if indexed != entry.tags {
                        problems.push(format!(
                            "{} indexed with {:?} but stored with {:?}",
                            key, indexed, entry.tags
                        ));
                    }
                }
                _ => problems.push(format!("{} indexed without a live entry", key)),
            }
        }

        for key in self.inner.store.keys(None).await? {
            let Some(entry) = self.inner.store.get(&key).await? else {
                continue;
            };
            if !entry.tags.is_empty() && self.inner.index.tags_for(&key).is_empty() {
                problems.push(format!("{} stored with tags but not indexed", key));
            }
        }

        Ok(problems)
    }
}
