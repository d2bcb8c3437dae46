//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL, size and
//! access bookkeeping.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
    /// Estimated size of key plus serialized value in bytes
    pub size: usize,
    /// Number of successful reads
    pub access_count: u64,
    /// Last access timestamp (Unix milliseconds)
    pub last_accessed: u64,
    /// xxHash64 of the serialized value, when it could be computed
    pub fingerprint: Option<u64>,
    /// Insertion order, used for FIFO and as the eviction tie-breaker
    pub(crate) insert_seq: u64,
    /// Logical clock of the latest insert or read, used for LRU
    pub(crate) access_seq: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry stamped with the current time.
    pub fn new(value: V, ttl: Duration, size: usize, fingerprint: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            created_at: now,
            ttl_ms: duration_to_ms(ttl),
            size,
            access_count: 0,
            last_accessed: now,
            fingerprint,
            insert_seq: 0,
            access_seq: 0,
        }
    }

    // == Expires At ==
    /// Expiration timestamp (Unix milliseconds).
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_ms)
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time, so a zero TTL expires immediately.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub(crate) fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at()
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, zero once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at().saturating_sub(current_timestamp_ms())
    }

    // == Record Access ==
    /// Updates read bookkeeping.
    pub(crate) fn record_access(&mut self, seq: u64) {
        self.access_count += 1;
        self.last_accessed = current_timestamp_ms();
        self.access_seq = seq;
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
