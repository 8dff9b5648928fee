//! Configuration types
//!
//! Engine and reaper settings. Values come from code via the `with_*`
//! builders or from environment variables via `from_env`, with defaults
//! taken from [`crate::constants`].

use crate::constants::{
    DEFAULT_KEY_PREFIX, DEFAULT_PROFILE_NAME, DEFAULT_REAPER_BATCH_SIZE,
    DEFAULT_REAPER_INTERVAL_SECS, DEFAULT_REFRESH_CONCURRENCY,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Cache engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Namespace prefix prepended to every stored key.
    pub key_prefix: String,
    /// Coalesce concurrent recomputes of the same key into one producer run.
    pub single_flight: bool,
    /// Upper bound on concurrently running background refreshes.
    pub refresh_concurrency: usize,
    /// Profile used by [`EngineConfig::default_profile`] lookups.
    pub default_profile: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            single_flight: true,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            default_profile: DEFAULT_PROFILE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create EngineConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TAGCACHE_KEY_PREFIX`: Namespace prefix (default: "tc:")
    /// - `TAGCACHE_SINGLE_FLIGHT`: "true" or "false" (default: true)
    /// - `TAGCACHE_REFRESH_CONCURRENCY`: Max background refreshes (default: 16)
    /// - `TAGCACHE_DEFAULT_PROFILE`: Fallback profile name (default: "default")
    pub fn from_env() -> Self {
        let key_prefix = std::env::var("TAGCACHE_KEY_PREFIX")
            .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string());

        let single_flight = std::env::var("TAGCACHE_SINGLE_FLIGHT")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let refresh_concurrency = std::env::var("TAGCACHE_REFRESH_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_CONCURRENCY);

        let default_profile = std::env::var("TAGCACHE_DEFAULT_PROFILE")
            .unwrap_or_else(|_| DEFAULT_PROFILE_NAME.to_string());

        Self {
            key_prefix,
            single_flight,
            refresh_concurrency,
            default_profile,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_refresh_concurrency(mut self, permits: usize) -> Self {
        self.refresh_concurrency = permits;
        self
    }

    pub fn with_default_profile(mut self, name: impl Into<String>) -> Self {
        self.default_profile = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh_concurrency".to_string(),
                value: self.refresh_concurrency.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_profile.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default_profile".to_string(),
                value: self.default_profile.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// REAPER CONFIGURATION
// ============================================================================

/// Configuration for the background reaper that drops hard-expired entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    /// How often to scan for expired entries (default: 5 minutes)
    pub interval: Duration,
    /// Maximum keys inspected per cycle (default: 1000)
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            batch_size: DEFAULT_REAPER_BATCH_SIZE,
        }
    }
}

impl ReaperConfig {
    /// Create ReaperConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TAGCACHE_REAPER_INTERVAL_SECS`: Scan interval (default: 300)
    /// - `TAGCACHE_REAPER_BATCH_SIZE`: Keys per cycle (default: 1000)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("TAGCACHE_REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
        );

        let batch_size = std::env::var("TAGCACHE_REAPER_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REAPER_BATCH_SIZE);

        Self {
            interval,
            batch_size,
        }
    }

    /// Short intervals for development and tests.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
        assert!(config.single_flight);
        assert_eq!(config.refresh_concurrency, DEFAULT_REFRESH_CONCURRENCY);
        assert_eq!(config.default_profile, DEFAULT_PROFILE_NAME);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_key_prefix("app:")
            .with_single_flight(false)
            .with_refresh_concurrency(4)
            .with_default_profile("hours");

        assert_eq!(config.key_prefix, "app:");
        assert!(!config.single_flight);
        assert_eq!(config.refresh_concurrency, 4);
        assert_eq!(config.default_profile, "hours");
    }

    #[test]
    fn test_engine_config_rejects_zero_concurrency() {
        let config = EngineConfig::new().with_refresh_concurrency(0);
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("refresh_concurrency"));
    }

    #[test]
    fn test_engine_config_rejects_blank_default_profile() {
        let config = EngineConfig::new().with_default_profile("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reaper_config_default() {
        let config = ReaperConfig::default();
        assert_eq!(
            config.interval,
            Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS)
        );
        assert_eq!(config.batch_size, DEFAULT_REAPER_BATCH_SIZE);
    }

    #[test]
    fn test_reaper_config_development() {
        let config = ReaperConfig::development();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
    }
}
