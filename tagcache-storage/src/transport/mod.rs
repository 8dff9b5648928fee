//! Backing key-value transport capability.
//!
//! The cache engine never talks to a concrete store. It consumes the
//! [`KvTransport`] capability: byte keys, byte values, an optional TTL per
//! key, and prefix scans for bulk cleanup. Any transport failure surfaces as
//! [`StoreError::Unavailable`]; the engine decides how to degrade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tagcache_core::StoreError;

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbTransport, LmdbTransportError};
pub use memory::InMemoryTransport;

/// Minimal key-value capability the entry store is built on.
///
/// Implementations must be safe for concurrent use. Operations on different
/// keys are independent; no cross-key atomicity is expected.
#[async_trait]
pub trait KvTransport: Send + Sync {
    /// Read a value. Keys whose TTL has elapsed read as absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one. `None` TTL keeps it forever.
    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    /// Remove a key. Returns whether a value was present.
    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// List live keys starting with `prefix`, at most `limit` when given.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StoreError>;

    /// Physically remove records whose TTL has elapsed. Returns how many were
    /// removed. Transports that evict on their own keep the default.
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[async_trait]
impl<T: KvTransport + ?Sized> KvTransport for Arc<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        (**self).scan_prefix(prefix, limit).await
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StoreError> {
        (**self).delete_prefix(prefix).await
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        (**self).purge_expired().await
    }
}
