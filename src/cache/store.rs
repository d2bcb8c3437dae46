//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with policy-driven eviction,
//! memory accounting and TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::cache::{CacheEntry, CacheStats, EvictionPolicy, MAX_KEY_LENGTH};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Cache shared between tasks, as handed to the sweep task and API handlers.
pub type SharedCache<V> = Arc<RwLock<BoundedCache<V>>>;

// == Bounded Cache ==
/// Fixed-capacity cache bounded by entry count and estimated memory.
#[derive(Debug)]
pub struct BoundedCache<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Performance statistics
    stats: CacheStats,
    config: CacheConfig,
    /// Sum of `size` over all entries
    memory_used: usize,
    /// Logical clock for insertion and access ordering
    next_seq: u64,
}

impl<V> BoundedCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    // == Constructor ==
    /// Creates a new cache. A zero entry limit is raised to one.
    pub fn new(mut config: CacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            config,
            memory_used: 0,
            next_seq: 0,
        }
    }

    /// Wraps the cache for sharing across tasks.
    pub fn into_shared(self) -> SharedCache<V> {
        Arc::new(RwLock::new(self))
    }

    // == Set ==
    /// Stores a value under `key`, evicting entries until both the entry and
    /// memory limits hold.
    ///
    /// If the key already exists, the value is replaced and its TTL and
    /// insertion order restart. Uses `default_ttl` when `ttl` is None.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;

        let (size, fingerprint) = measure(&key, &value);
        let entry = CacheEntry::new(
            value,
            ttl.unwrap_or(self.config.default_ttl),
            size,
            fingerprint,
        );
        self.insert_entry(key, entry)
    }

    /// Admits a prepared entry, enforcing limits. Shared with snapshot import.
    pub(crate) fn insert_entry(&mut self, key: String, mut entry: CacheEntry<V>) -> Result<()> {
        if entry.size > self.config.max_memory_usage {
            return Err(CacheError::EntryTooLarge {
                size: entry.size,
                limit: self.config.max_memory_usage,
            });
        }

        // Overwrite: drop the old entry so it neither counts against limits
        // nor becomes an eviction victim in its own place.
        self.remove_entry(&key);

        if self.would_overflow(entry.size) {
            let expired = self.cleanup_expired();
            if expired > 0 {
                debug!("Purged {} expired entries to make room for '{}'", expired, key);
            }
        }

        while self.would_overflow(entry.size) {
            let Some(victim) = self.config.eviction_policy.select_victim(&self.entries) else {
                break;
            };
            self.remove_entry(&victim);
            self.stats.record_eviction();
            debug!(
                "Evicted '{}' ({} policy) to admit '{}'",
                victim, self.config.eviction_policy, key
            );
        }

        let seq = self.tick();
        entry.insert_seq = seq;
        entry.access_seq = seq;
        self.memory_used += entry.size;
        self.entries.insert(key, entry);
        Ok(())
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Returns None for missing or expired keys; expired entries are removed.
    /// Hits update the entry's access bookkeeping.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expiration(1);
            self.stats.record_miss();
            return None;
        }

        let seq = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.record_access(seq);
        self.stats.record_hit();
        Some(entry.value.clone())
    }

    // == Has ==
    /// Checks for a live entry without touching statistics or recency.
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    // == Invalidate ==
    /// Removes an entry by key. Returns whether an entry was removed.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.remove_entry(key).is_some()
    }

    // == Bulk Invalidate ==
    /// Removes every key matching a regular expression.
    ///
    /// Returns the number of entries removed.
    pub fn bulk_invalidate(&mut self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect();

        for key in &matching {
            self.remove_entry(key);
        }

        debug!("Bulk invalidation '{}' removed {} entries", pattern, matching.len());
        Ok(matching.len())
    }

    // == Clear ==
    /// Removes all entries. Statistics counters are kept.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.memory_used = 0;
        count
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = crate::cache::entry::current_timestamp_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }

        self.stats.record_expiration(expired_keys.len());
        expired_keys.len()
    }

    // == Memory Pressure ==
    /// Saturation of the more constrained dimension, from 0.0 to 100.0.
    pub fn memory_pressure(&self) -> f64 {
        let by_entries = self.entries.len() as f64 / self.config.max_entries as f64;
        let by_memory = if self.config.max_memory_usage == 0 {
            1.0
        } else {
            self.memory_used as f64 / self.config.max_memory_usage as f64
        };
        (by_entries.max(by_memory) * 100.0).clamp(0.0, 100.0)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_occupancy(self.entries.len(), self.memory_used);
        stats
    }

    /// Zeroes hit, miss, eviction and expiration counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset_counters();
    }

    /// Content fingerprint of a live entry, if one was computed.
    pub fn fingerprint(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.fingerprint)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated bytes held by all entries.
    pub fn memory_usage(&self) -> usize {
        self.memory_used
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.config.eviction_policy
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &CacheEntry<V>)> {
        self.entries.iter()
    }

    fn would_overflow(&self, incoming: usize) -> bool {
        self.entries.len() + 1 > self.config.max_entries
            || self.memory_used + incoming > self.config.max_memory_usage
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(removed.size);
        Some(removed)
    }

    fn tick(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

// == Helpers ==
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Estimates the footprint of an entry and fingerprints its content.
///
/// Both come from the value's JSON encoding. If the value cannot be encoded
/// the size falls back to the in-memory size and no fingerprint is stored.
pub(crate) fn measure<V: Serialize>(key: &str, value: &V) -> (usize, Option<u64>) {
    match serde_json::to_vec(value) {
        Ok(bytes) => (key.len() + bytes.len(), Some(xxh64(&bytes, 0))),
        Err(err) => {
            debug!("Fingerprint unavailable for '{}': {}", key, err);
            (key.len() + std::mem::size_of::<V>(), None)
        }
    }
}
