//! Cache Module
//!
//! Provides a bounded in-memory cache with TTL expiration, selectable
//! eviction (LRU, LFU, FIFO), memory accounting and snapshot export/import.

mod entry;
mod policy;
mod snapshot;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use policy::EvictionPolicy;
pub use snapshot::{CacheSnapshot, ImportReport, SnapshotEntry, SNAPSHOT_VERSION};
pub use stats::CacheStats;
pub use store::{BoundedCache, SharedCache};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;
