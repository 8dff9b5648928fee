//! Persisted entry encoding.
//!
//! Binary layout:
//!
//! ```text
//! [version: 1 byte][created_at millis: i64 LE][header_len: u32 LE][header JSON][value]
//! ```
//!
//! The JSON header carries the tag set and the lifetime profile so that
//! freshness and invalidation keep working after a restart. The value is
//! stored raw, after the header.

use std::collections::BTreeSet;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheEntry, CacheKey, LifetimeProfile, StoreError, Tag};

const FORMAT_VERSION: u8 = 1;
const FIXED_LEN: usize = 1 + 8 + 4;

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    tags: BTreeSet<Tag>,
    profile: LifetimeProfile,
}

fn corrupt(key: &CacheKey, reason: impl Into<String>) -> StoreError {
    StoreError::Codec {
        key: key.clone(),
        reason: reason.into(),
    }
}

/// Encode an entry for the backing store.
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, StoreError> {
    let header = serde_json::to_vec(&EntryHeader {
        tags: entry.tags.clone(),
        profile: entry.profile,
    })
    .map_err(|e| corrupt(&entry.key, e.to_string()))?;

    let header_len = u32::try_from(header.len())
        .map_err(|_| corrupt(&entry.key, "entry header exceeds 4 GiB"))?;

    let mut bytes = Vec::with_capacity(FIXED_LEN + header.len() + entry.value.len());
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&entry.created_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&header_len.to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&entry.value);
    Ok(bytes)
}

/// Decode an entry read back for `key`.
pub fn decode_entry(key: &CacheKey, bytes: &[u8]) -> Result<CacheEntry, StoreError> {
    if bytes.len() < FIXED_LEN {
        return Err(corrupt(key, "record shorter than fixed header"));
    }
    if bytes[0] != FORMAT_VERSION {
        return Err(corrupt(
            key,
            format!("unsupported format version {}", bytes[0]),
        ));
    }

    let millis_bytes: [u8; 8] = bytes[1..9]
        .try_into()
        .map_err(|_| corrupt(key, "invalid timestamp"))?;
    let created_at = DateTime::from_timestamp_millis(i64::from_le_bytes(millis_bytes))
        .ok_or_else(|| corrupt(key, "timestamp out of range"))?;

    let len_bytes: [u8; 4] = bytes[9..13]
        .try_into()
        .map_err(|_| corrupt(key, "invalid header length"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_end = FIXED_LEN
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| corrupt(key, "truncated header"))?;

    let header: EntryHeader = serde_json::from_slice(&bytes[FIXED_LEN..header_end])
        .map_err(|e| corrupt(key, e.to_string()))?;
    header
        .profile
        .validate()
        .map_err(|e| corrupt(key, e.to_string()))?;

    Ok(CacheEntry::new(
        key.clone(),
        bytes[header_end..].to_vec(),
        header.tags,
        header.profile,
        created_at,
    ))
}
