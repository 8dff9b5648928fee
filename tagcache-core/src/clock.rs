//! Time source used for freshness decisions.
//!
//! All entry ages are computed against a [`Clock`] so that production code
//! reads the wall clock while tests can move time by hand.

use crate::Timestamp;
use chrono::Utc;
use std::sync::Arc;

/// Source of "now" for freshness and expiry arithmetic.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Shared clock handle passed into stores and engines.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
