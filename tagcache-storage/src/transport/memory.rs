//! In-process transport.
//!
//! Keeps records in an ordered map so prefix scans are range reads. TTLs are
//! evaluated against the injected clock, which lets tests expire records
//! without sleeping.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tagcache_core::{SharedClock, StoreError, SystemClock, Timestamp};
use tokio::sync::RwLock;

use super::KvTransport;

#[derive(Debug, Clone)]
struct Record {
    value: Vec<u8>,
    expires_at: Option<Timestamp>,
}

impl Record {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory [`KvTransport`].
#[derive(Debug)]
pub struct InMemoryTransport {
    records: RwLock<BTreeMap<Vec<u8>, Record>>,
    clock: SharedClock,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<Timestamp> {
        let ttl = chrono::Duration::from_std(ttl?).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }
}

#[async_trait]
impl KvTransport for InMemoryTransport {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .records
            .read()
            .await
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.value.clone()))
    }

    async fn set(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let record = Record {
            value,
            expires_at: self.expiry(ttl),
        };
        self.records.write().await.insert(key.to_vec(), record);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .records
            .write()
            .await
            .remove(key)
            .is_some_and(|r| r.is_live(now)))
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let records = self.records.read().await;
        let keys = records
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, r)| r.is_live(now))
            .map(|(k, _)| k.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let doomed: Vec<Vec<u8>> = records
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            records.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.is_live(now));
        Ok((before - records.len()) as u64)
    }
}
