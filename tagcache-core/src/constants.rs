//! Constants for TAGCACHE
//!
//! Default values for engine and reaper configuration.

// ============================================================================
// ENGINE
// ============================================================================

/// Namespace prefix for every key written to the backing store.
pub const DEFAULT_KEY_PREFIX: &str = "tc:";

/// Maximum number of background refreshes running at once.
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 16;

/// Profile used when the host does not name one.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Capacity of the refresh event broadcast channel.
pub const REFRESH_EVENT_CAPACITY: usize = 256;

// ============================================================================
// REAPER
// ============================================================================

/// How often the reaper scans for expired entries (5 minutes).
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 300;

/// Maximum number of keys the reaper inspects per cycle.
pub const DEFAULT_REAPER_BATCH_SIZE: usize = 1000;
