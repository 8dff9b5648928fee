//! Error types for TAGCACHE operations

use crate::CacheKey;
use thiserror::Error;

/// Entry store / transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Corrupt entry at {key}: {reason}")]
    Codec { key: CacheKey, reason: String },
}

impl StoreError {
    /// Shorthand for a transport-level failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns true if the backing transport could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Lifetime profile errors. Configuration-time only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Unknown profile: {name}")]
    Unknown { name: String },

    #[error("Invalid profile: {reason}")]
    Invalid { reason: String },

    #[error("Profile {name} is already registered with a different policy")]
    Duplicate { name: String },
}

/// Producer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("Compute failed for {key}: {reason}")]
    Failed { key: CacheKey, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all TAGCACHE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("{0}")]
    Compute(#[from] ComputeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Returns true if this is a producer failure.
    pub fn is_compute_failed(&self) -> bool {
        matches!(self, Self::Compute(_))
    }
}

/// Result type alias for TAGCACHE operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_unavailable() {
        let err = StoreError::unavailable("connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("Store unavailable"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_store_error_display_codec() {
        let err = StoreError::Codec {
            key: CacheKey::from("user:1"),
            reason: "truncated header".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("user:1"));
        assert!(msg.contains("truncated header"));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_profile_error_display() {
        let unknown = ProfileError::Unknown {
            name: "hourly".to_string(),
        };
        assert!(format!("{}", unknown).contains("hourly"));

        let duplicate = ProfileError::Duplicate {
            name: "short".to_string(),
        };
        let msg = format!("{}", duplicate);
        assert!(msg.contains("short"));
        assert!(msg.contains("different policy"));
    }

    #[test]
    fn test_compute_error_display() {
        let err = ComputeError::Failed {
            key: CacheKey::from("k"),
            reason: "upstream 503".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Compute failed"));
        assert!(msg.contains("upstream 503"));
    }

    #[test]
    fn test_cache_error_from_variants() {
        let store = CacheError::from(StoreError::unavailable("down"));
        assert!(matches!(store, CacheError::Store(_)));

        let profile = CacheError::from(ProfileError::Unknown {
            name: "x".to_string(),
        });
        assert!(matches!(profile, CacheError::Profile(_)));

        let compute = CacheError::from(ComputeError::Failed {
            key: CacheKey::from("k"),
            reason: "boom".to_string(),
        });
        assert!(compute.is_compute_failed());

        let config = CacheError::from(ConfigError::InvalidValue {
            field: "refresh_concurrency".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, CacheError::Config(_)));
        assert!(!config.is_compute_failed());
    }
}
