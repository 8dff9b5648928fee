//! TAGCACHE Core - Data Types
//!
//! Pure data structures and validation for the tag-indexed cache engine.
//! No I/O lives here: storage, indexing and orchestration are in
//! `tagcache-storage`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

pub mod clock;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod profile;

pub use clock::{Clock, SharedClock, SystemClock};
pub use config::{EngineConfig, ReaperConfig};
pub use entry::{CacheEntry, FreshnessState};
pub use error::{
    CacheError, CacheResult, ComputeError, ConfigError, ProfileError, StoreError,
};
pub use profile::{
    builtin_profiles, LifetimeProfile, ProfileRef, ProfileRegistry, ProfileRegistryBuilder,
    ProfileSpec,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identity of a cacheable computation (including its effective arguments).
///
/// Keys are opaque bytes. They render as UTF-8 when possible and as hex
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for CacheKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for CacheKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Label enabling invalidation of a group of entries.
///
/// A tag has no lifecycle of its own: it exists while at least one live
/// entry references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// How `invalidate` treats the entries carrying a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationMode {
    /// Delete the entry; the next read recomputes synchronously.
    Immediate,
    /// Demote the entry to Stale; the next read serves it and refreshes
    /// in the background.
    StaleWhileRevalidate,
}

impl InvalidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationMode::Immediate => "immediate",
            InvalidationMode::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for InvalidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display_utf8() {
        let key = CacheKey::from("posts:page=1");
        assert_eq!(key.to_string(), "posts:page=1");
        assert_eq!(key.len(), 12);
    }

    #[test]
    fn test_cache_key_display_binary() {
        let key = CacheKey::new(vec![0xff, 0x00, 0x10]);
        assert_eq!(key.to_string(), "0xff0010");
    }

    #[test]
    fn test_cache_key_ordering_is_bytewise() {
        let a = CacheKey::from("a");
        let b = CacheKey::from("b");
        assert!(a < b);
        assert_eq!(CacheKey::from(String::from("a")), a);
    }

    #[test]
    fn test_tag_serializes_as_plain_string() {
        let tag = Tag::from("posts");
        let json = serde_json::to_string(&tag).expect("serialize tag");
        assert_eq!(json, "\"posts\"");
        let back: Tag = serde_json::from_str(&json).expect("deserialize tag");
        assert_eq!(back, tag);
    }

    #[test]
    fn test_invalidation_mode_display() {
        assert_eq!(InvalidationMode::Immediate.to_string(), "immediate");
        assert_eq!(
            InvalidationMode::StaleWhileRevalidate.to_string(),
            "stale-while-revalidate"
        );
    }
}
