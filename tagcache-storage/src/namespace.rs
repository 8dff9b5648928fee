//! Namespaced store keys.
//!
//! Every record the engine writes lives under a configurable prefix, so a
//! shared backing store can host several caches and `clear` can drop one
//! cache with a single prefix delete. A [`StoreKey`] can only be built from a
//! [`Namespace`], which keeps un-prefixed writes out of the store.

use tagcache_core::CacheKey;

/// Key prefix owned by one engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    prefix: Vec<u8>,
}

impl Namespace {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Store key for a cache key: `[prefix][key bytes]`.
    pub fn key(&self, key: &CacheKey) -> StoreKey {
        let mut bytes = Vec::with_capacity(self.prefix.len() + key.len());
        bytes.extend_from_slice(&self.prefix);
        bytes.extend_from_slice(key.as_bytes());
        StoreKey { bytes }
    }

    /// Recover the cache key from a raw store key.
    ///
    /// Returns `None` for keys outside this namespace.
    pub fn decode(&self, raw: &[u8]) -> Option<CacheKey> {
        raw.strip_prefix(self.prefix.as_slice())
            .map(CacheKey::from)
    }

    /// Prefix covering every cache key that starts with `key_prefix`.
    pub fn scoped_prefix(&self, key_prefix: &[u8]) -> Vec<u8> {
        let mut bytes = self.prefix.clone();
        bytes.extend_from_slice(key_prefix);
        bytes
    }
}

/// A raw key inside a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    bytes: Vec<u8>,
}

impl StoreKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_prefixed() {
        let ns = Namespace::new("tc:");
        let key = ns.key(&CacheKey::from("posts"));
        assert_eq!(key.as_bytes(), b"tc:posts");
    }

    #[test]
    fn test_decode_roundtrip() {
        let ns = Namespace::new("tc:");
        let key = CacheKey::new(vec![0u8, 1, 2, 255]);
        let store_key = ns.key(&key);
        assert_eq!(ns.decode(store_key.as_bytes()), Some(key));
    }

    #[test]
    fn test_decode_foreign_key() {
        let ns = Namespace::new("tc:");
        assert_eq!(ns.decode(b"other:posts"), None);
    }

    #[test]
    fn test_namespace_isolation() {
        let a = Namespace::new("a:");
        let b = Namespace::new("b:");
        let key = CacheKey::from("same");
        assert_ne!(a.key(&key), b.key(&key));
        assert!(b.decode(a.key(&key).as_bytes()).is_none());
    }

    #[test]
    fn test_scoped_prefix() {
        let ns = Namespace::new("tc:");
        assert_eq!(ns.scoped_prefix(b"user:"), b"tc:user:".to_vec());
    }
}
