//! LMDB-backed transport.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a durable, memory-mapped
//! key-value store, so cached entries survive a process restart.
//!
//! # Record Format
//!
//! LMDB has no native expiry, so each record carries its own deadline:
//! `[expires_at: i64 millis LE][value]`, with `i64::MAX` meaning "never".
//! Expired records read as absent. They stay on disk until overwritten,
//! deleted, or removed by `purge_expired`, which the reaper runs each cycle.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The transport uses read transactions for
//! `get` and `scan_prefix` and write transactions for every mutation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tagcache_core::{SharedClock, StoreError, SystemClock, Timestamp};

use super::KvTransport;

const NEVER: i64 = i64::MAX;
const HEADER_LEN: usize = 8;

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTransportError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTransportError> for StoreError {
    fn from(e: LmdbTransportError) -> Self {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> StoreError {
    StoreError::Unavailable {
        reason: format!("LMDB transaction error: {}", e),
    }
}

/// LMDB [`KvTransport`].
///
/// # Example
///
/// ```ignore
/// let transport = LmdbTransport::open("/var/cache/tagcache", 256)?;
/// transport.set(b"tc:key", bytes, Some(Duration::from_secs(60))).await?;
/// ```
pub struct LmdbTransport {
    env: Env,
    db: Database<Bytes, Bytes>,
    clock: SharedClock,
}

impl std::fmt::Debug for LmdbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbTransport")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbTransport {
    /// Open (or create) an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbTransportError> {
        Self::open_with_clock(path, max_size_mb, SystemClock::shared())
    }

    /// Open with an explicit clock for TTL evaluation.
    pub fn open_with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: SharedClock,
    ) -> Result<Self, LmdbTransportError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is not modified outside of heed transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTransportError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbTransportError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTransportError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTransportError::Transaction(e.to_string()))?;

        Ok(Self { env, db, clock })
    }

    fn deadline(&self, ttl: Option<Duration>) -> i64 {
        let Some(ttl) = ttl else {
            return NEVER;
        };
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .map(|at| at.timestamp_millis())
            .unwrap_or(NEVER)
    }

    /// Split a raw record into its value if it is still live at `now`.
    fn live_value(raw: &[u8], now: Timestamp) -> Option<&[u8]> {
        if raw.len() < HEADER_LEN {
            return None;
        }
        let deadline_bytes: [u8; HEADER_LEN] = raw[0..HEADER_LEN].try_into().ok()?;
        let deadline = i64::from_le_bytes(deadline_bytes);
        if deadline != NEVER && now.timestamp_millis() >= deadline {
            return None;
        }
        Some(&raw[HEADER_LEN..])
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(
        &self,
        prefix: &[u8],
        live_only: bool,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = self.clock.now();

        let mut keys = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        for result in iter {
            if keys.len() >= limit {
                break;
            }
            let Ok((key, raw)) = result else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            if live_only && Self::live_value(raw, now).is_none() {
                continue;
            }
            keys.push(key.to_vec());
        }

        Ok(keys)
    }
}

#[async_trait]
impl KvTransport for LmdbTransport {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = self.clock.now();
        match self.db.get(&rtxn, key).map_err(txn_error)? {
            Some(raw) => Ok(Self::live_value(raw, now).map(<[u8]>::to_vec)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut record = Vec::with_capacity(HEADER_LEN + value.len());
        record.extend_from_slice(&self.deadline(ttl).to_le_bytes());
        record.extend_from_slice(&value);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.put(&mut wtxn, key, &record).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let was_live = self
            .db
            .get(&wtxn, key)
            .map_err(txn_error)?
            .is_some_and(|raw| Self::live_value(raw, now).is_some());
        self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(was_live)
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.collect_keys_with_prefix(prefix, true, limit.unwrap_or(usize::MAX))
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StoreError> {
        let keys_to_delete = self.collect_keys_with_prefix(prefix, false, usize::MAX)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let expired: Vec<Vec<u8>> = self
            .db
            .iter(&wtxn)
            .map_err(txn_error)?
            .filter_map(Result::ok)
            .filter(|(_, raw)| Self::live_value(raw, now).is_none())
            .map(|(key, _)| key.to_vec())
            .collect();

        let mut purged = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                purged += 1;
            }
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_transport() -> (LmdbTransport, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let transport =
            LmdbTransport::open(temp_dir.path(), 10).expect("transport creation should succeed");
        (transport, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set(b"tc:a", b"hello".to_vec(), None)
            .await
            .expect("set should succeed");
        let value = transport.get(b"tc:a").await.expect("get should succeed");
        assert_eq!(value, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (transport, _temp_dir) = create_test_transport();
        assert_eq!(
            transport.get(b"missing").await.expect("get should succeed"),
            None
        );
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set(b"tc:a", b"v".to_vec(), Some(Duration::ZERO))
            .await
            .expect("set should succeed");
        assert_eq!(transport.get(b"tc:a").await.expect("get should succeed"), None);
        assert!(transport
            .scan_prefix(b"tc:", None)
            .await
            .expect("scan should succeed")
            .is_empty());
        assert!(!transport.delete(b"tc:a").await.expect("delete should succeed"));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_records() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set(b"tc:gone", b"v".to_vec(), Some(Duration::ZERO))
            .await
            .expect("set should succeed");
        transport
            .set(b"tc:kept", b"v".to_vec(), None)
            .await
            .expect("set should succeed");

        assert_eq!(transport.purge_expired().await.expect("purge should succeed"), 1);
        assert_eq!(transport.purge_expired().await.expect("purge should succeed"), 0);
        // Raw count, live or not: only the unexpired record remains on disk.
        assert_eq!(transport.delete_prefix(b"tc:").await.expect("delete_prefix"), 1);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set(b"k", b"one".to_vec(), None)
            .await
            .expect("set should succeed");
        transport
            .set(b"k", b"two".to_vec(), Some(Duration::from_secs(60)))
            .await
            .expect("set should succeed");
        assert_eq!(
            transport.get(b"k").await.expect("get should succeed"),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_delete_prefix_isolates_namespaces() {
        let (transport, _temp_dir) = create_test_transport();
        for key in ["a:1", "a:2", "a:3", "b:1"] {
            transport
                .set(key.as_bytes(), b"v".to_vec(), None)
                .await
                .expect("set should succeed");
        }

        let deleted = transport
            .delete_prefix(b"a:")
            .await
            .expect("delete_prefix should succeed");
        assert_eq!(deleted, 3);
        assert!(transport
            .get(b"b:1")
            .await
            .expect("get should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn test_reopen_preserves_records() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let transport =
                LmdbTransport::open(temp_dir.path(), 10).expect("open should succeed");
            transport
                .set(b"persist", b"yes".to_vec(), None)
                .await
                .expect("set should succeed");
        }
        let reopened = LmdbTransport::open(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            reopened.get(b"persist").await.expect("get should succeed"),
            Some(b"yes".to_vec())
        );
    }
}
