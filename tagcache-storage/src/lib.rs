//! TAGCACHE Storage - Entry Store, Tag Index and Cache Engine
//!
//! Builds the caching engine on top of the core types:
//!
//! - [`transport`]: the [`KvTransport`] capability plus in-memory and LMDB
//!   implementations
//! - [`entry_store`]: namespaced, encoded cache entries over a transport
//! - [`tag_index`]: the tag ↔ key relation used for invalidation
//! - [`engine`]: `get_or_compute`, invalidation, background refresh and
//!   single-flight coalescing
//! - [`reaper`]: periodic removal of expired entries

pub mod codec;
pub mod engine;
pub mod entry_store;
pub mod freshness;
pub mod namespace;
pub mod reaper;
pub mod tag_index;
pub mod transport;

pub use engine::{
    CacheEngine, EngineStats, EngineStatsSnapshot, InvalidationReport, ReapReport, RefreshEvent,
};
pub use entry_store::EntryStore;
pub use freshness::{CacheRead, ReadOutcome};
pub use namespace::{Namespace, StoreKey};
pub use reaper::{reaper_task, ReaperMetrics, ReaperSnapshot};
pub use tag_index::TagIndex;
pub use transport::{InMemoryTransport, KvTransport, LmdbTransport, LmdbTransportError};
