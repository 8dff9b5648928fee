//! Entry store: typed cache entries over a raw [`KvTransport`].
//!
//! Adds namespacing and the entry codec on top of the transport. Errors are
//! passed through untouched; deciding whether a failure is a miss or a
//! reported write failure is the engine's job.

use std::sync::Arc;
use std::time::Duration;

use tagcache_core::{CacheEntry, CacheKey, StoreError};

use crate::codec::{decode_entry, encode_entry};
use crate::namespace::Namespace;
use crate::transport::KvTransport;

/// Namespaced entry storage.
pub struct EntryStore<T: KvTransport + ?Sized> {
    transport: Arc<T>,
    namespace: Namespace,
}

impl<T: KvTransport + ?Sized> Clone for EntryStore<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            namespace: self.namespace.clone(),
        }
    }
}

impl<T: KvTransport + ?Sized> EntryStore<T> {
    pub fn new(transport: Arc<T>, namespace: Namespace) -> Self {
        Self {
            transport,
            namespace,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Load an entry. Corrupt records surface as [`StoreError::Codec`].
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let store_key = self.namespace.key(key);
        match self.transport.get(store_key.as_bytes()).await? {
            Some(bytes) => decode_entry(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write an entry, replacing whatever is stored at its key.
    pub async fn put(&self, entry: &CacheEntry, ttl: Option<Duration>) -> Result<(), StoreError> {
        let bytes = encode_entry(entry)?;
        let store_key = self.namespace.key(&entry.key);
        self.transport.set(store_key.as_bytes(), bytes, ttl).await
    }

    /// Remove an entry. Returns whether one was present.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let store_key = self.namespace.key(key);
        self.transport.delete(store_key.as_bytes()).await
    }

    /// Remove every entry whose cache key starts with `key_prefix`.
    pub async fn delete_matching_prefix(&self, key_prefix: &[u8]) -> Result<u64, StoreError> {
        let prefix = self.namespace.scoped_prefix(key_prefix);
        self.transport.delete_prefix(&prefix).await
    }

    /// Cache keys of live entries in this namespace, at most `limit`.
    pub async fn keys(&self, limit: Option<usize>) -> Result<Vec<CacheKey>, StoreError> {
        let raw = self
            .transport
            .scan_prefix(self.namespace.prefix(), limit)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|k| self.namespace.decode(k))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use chrono::{DateTime, Utc};
    use tagcache_core::{LifetimeProfile, Tag};

    fn store() -> EntryStore<InMemoryTransport> {
        EntryStore::new(Arc::new(InMemoryTransport::new()), Namespace::new("tc:"))
    }

    fn entry(key: &str) -> CacheEntry {
        let created_at =
            DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).expect("valid millis");
        CacheEntry::new(
            CacheKey::from(key),
            key.as_bytes().to_vec(),
            [Tag::from("t")].into_iter().collect(),
            LifetimeProfile::from_secs(10, 20, Some(30)).expect("valid"),
            created_at,
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = store();
        let e = entry("a");
        store.put(&e, e.profile.ttl()).await.expect("put should succeed");
        assert_eq!(store.get(&e.key).await.expect("get should succeed"), Some(e.clone()));
        assert!(store.delete(&e.key).await.expect("delete should succeed"));
        assert_eq!(store.get(&e.key).await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let transport = Arc::new(InMemoryTransport::new());
        let ours = EntryStore::new(Arc::clone(&transport), Namespace::new("a:"));
        let theirs = EntryStore::new(Arc::clone(&transport), Namespace::new("b:"));

        ours.put(&entry("x"), None).await.expect("put should succeed");
        theirs.put(&entry("y"), None).await.expect("put should succeed");

        let keys = ours.keys(None).await.expect("keys should succeed");
        assert_eq!(keys, vec![CacheKey::from("x")]);
        assert!(theirs
            .get(&CacheKey::from("x"))
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_matching_prefix() {
        let store = store();
        for key in ["user:1", "user:2", "post:1"] {
            store.put(&entry(key), None).await.expect("put should succeed");
        }
        let removed = store
            .delete_matching_prefix(b"user:")
            .await
            .expect("delete should succeed");
        assert_eq!(removed, 2);
        assert_eq!(
            store.keys(None).await.expect("keys should succeed"),
            vec![CacheKey::from("post:1")]
        );
    }

    #[tokio::test]
    async fn test_corrupt_record_is_codec_error() {
        let transport = Arc::new(InMemoryTransport::new());
        transport
            .set(b"tc:bad", vec![7, 7, 7], None)
            .await
            .expect("set should succeed");
        let store = EntryStore::new(transport, Namespace::new("tc:"));
        let err = store.get(&CacheKey::from("bad")).await.unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }
}
