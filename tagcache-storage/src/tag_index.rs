//! Bidirectional tag index.
//!
//! Tracks tag → keys and key → tags so that "invalidate every entry carrying
//! tag T" does not scan the store, and so a key can be detached from all of
//! its tags when its entry is deleted.
//!
//! # Concurrency
//!
//! Both directions are `DashMap`s. Every mutation takes the key's slot in the
//! reverse map first and holds it while touching tag buckets, which
//! serializes work on one key. Buckets are only ever locked after a key slot,
//! never the other way round, so there is no lock-order cycle. Work on
//! different keys only contends on the shard of a shared tag bucket, and each
//! bucket update is atomic.

use std::collections::BTreeSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tagcache_core::{CacheKey, Tag};

/// Many-to-many relation between tags and cache keys.
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: DashMap<Tag, BTreeSet<CacheKey>>,
    by_key: DashMap<CacheKey, BTreeSet<Tag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key` to every tag's bucket. Idempotent.
    pub fn attach<'a, I>(&self, key: &CacheKey, tags: I)
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        let mut slot = self.by_key.entry(key.clone()).or_default();
        for tag in tags {
            if slot.insert(tag.clone()) || !self.bucket_contains(tag, key) {
                self.by_tag.entry(tag.clone()).or_default().insert(key.clone());
            }
        }
    }

    /// Remove `key` from every tag's bucket, dropping emptied buckets.
    pub fn detach<'a, I>(&self, key: &CacheKey, tags: I)
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        let Entry::Occupied(mut slot) = self.by_key.entry(key.clone()) else {
            // Nothing attached for this key; still scrub stray bucket members.
            for tag in tags {
                self.remove_from_bucket(tag, key);
            }
            return;
        };
        for tag in tags {
            slot.get_mut().remove(tag);
            self.remove_from_bucket(tag, key);
        }
        if slot.get().is_empty() {
            slot.remove();
        }
    }

    /// Replace the tag set of `key`: detach tags not in `tags`, attach new ones.
    pub fn retag(&self, key: &CacheKey, tags: &BTreeSet<Tag>) {
        let mut slot = self.by_key.entry(key.clone()).or_default();
        let previous = std::mem::replace(slot.value_mut(), tags.clone());
        for gone in previous.difference(tags) {
            self.remove_from_bucket(gone, key);
        }
        for tag in tags {
            self.by_tag.entry(tag.clone()).or_default().insert(key.clone());
        }
        if slot.is_empty() {
            drop(slot);
            self.by_key.remove_if(key, |_, t| t.is_empty());
        }
    }

    /// Detach `key` from all of its tags. Returns the tags it had.
    pub fn remove_key(&self, key: &CacheKey) -> BTreeSet<Tag> {
        let Entry::Occupied(slot) = self.by_key.entry(key.clone()) else {
            return BTreeSet::new();
        };
        let (_, tags) = slot.remove_entry();
        for tag in &tags {
            self.remove_from_bucket(tag, key);
        }
        tags
    }

    /// Current members of a tag; empty for unknown tags.
    pub fn keys_for(&self, tag: &Tag) -> BTreeSet<CacheKey> {
        self.by_tag
            .get(tag)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Tags currently attached to a key.
    pub fn tags_for(&self, key: &CacheKey) -> BTreeSet<Tag> {
        self.by_key
            .get(key)
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }

    /// Every key with at least one tag.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.by_key.iter().map(|e| e.key().clone()).collect()
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn clear(&self) {
        self.by_key.clear();
        self.by_tag.clear();
    }

    /// Describe every place where the two directions disagree.
    ///
    /// Empty when the index is consistent. Only meaningful when no mutation
    /// runs concurrently.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for entry in self.by_key.iter() {
            for tag in entry.value() {
                if !self.bucket_contains(tag, entry.key()) {
                    problems.push(format!("{} -> {} missing from tag bucket", entry.key(), tag));
                }
            }
        }
        // Snapshot the buckets so no bucket guard is held while a key slot is
        // read.
        let buckets: Vec<(Tag, BTreeSet<CacheKey>)> = self
            .by_tag
            .iter()
            .map(|bucket| (bucket.key().clone(), bucket.value().clone()))
            .collect();
        for (tag, keys) in buckets {
            if keys.is_empty() {
                problems.push(format!("empty bucket retained for {}", tag));
            }
            for key in keys {
                let attached = self
                    .by_key
                    .get(&key)
                    .is_some_and(|tags| tags.contains(&tag));
                if !attached {
                    problems.push(format!("{} lists {} without reverse mapping", tag, key));
                }
            }
        }
        problems
    }

    fn bucket_contains(&self, tag: &Tag, key: &CacheKey) -> bool {
        self.by_tag
            .get(tag)
            .is_some_and(|keys| keys.contains(key))
    }

    fn remove_from_bucket(&self, tag: &Tag, key: &CacheKey) {
        if let Entry::Occupied(mut bucket) = self.by_tag.entry(tag.clone()) {
            bucket.get_mut().remove(key);
            if bucket.get().is_empty() {
                bucket.remove();
            }
        }
    }
}
