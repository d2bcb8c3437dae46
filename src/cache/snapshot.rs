//! Cache Snapshot Module
//!
//! Export and import of cache contents for warm restarts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::store::{measure, validate_key};
use crate::cache::{BoundedCache, CacheEntry};
use crate::error::{CacheError, Result};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

// == Snapshot Types ==
/// Serializable image of a cache's live entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot<V> {
    pub version: u32,
    /// Export timestamp (Unix milliseconds)
    pub exported_at: u64,
    /// Entries ordered oldest insertion first
    pub entries: Vec<SnapshotEntry<V>>,
}

/// One exported entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: u64,
    pub ttl_ms: u64,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: u64,
    #[serde(default)]
    pub fingerprint: Option<u64>,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

impl<V> BoundedCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    // == Export ==
    /// Captures every unexpired entry, oldest insertion first.
    pub fn export_snapshot(&self) -> CacheSnapshot<V> {
        let now = current_timestamp_ms();
        let mut live: Vec<(&String, &CacheEntry<V>)> = self
            .entries()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .collect();
        live.sort_by_key(|(_, entry)| entry.insert_seq);

        let entries = live
            .into_iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                value: entry.value.clone(),
                created_at: entry.created_at,
                ttl_ms: entry.ttl_ms,
                access_count: entry.access_count,
                last_accessed: entry.last_accessed,
                fingerprint: entry.fingerprint,
            })
            .collect();

        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: now,
            entries,
        }
    }

    // == Import ==
    /// Loads entries from an exported snapshot.
    ///
    /// The envelope must be valid; individual entries that fail to decode,
    /// carry an invalid key, have already expired, no longer match their
    /// fingerprint or exceed the memory limit are skipped. Imported entries
    /// keep their creation time, so TTLs continue rather than restart.
    pub fn import_snapshot(&mut self, snapshot: Value) -> Result<ImportReport> {
        let Value::Object(mut envelope) = snapshot else {
            return Err(CacheError::InvalidSnapshot(
                "snapshot must be a JSON object".to_string(),
            ));
        };

        match envelope.get("version").and_then(Value::as_u64) {
            Some(v) if v == u64::from(SNAPSHOT_VERSION) => {}
            Some(v) => {
                return Err(CacheError::InvalidSnapshot(format!(
                    "unsupported snapshot version {}",
                    v
                )))
            }
            None => {
                return Err(CacheError::InvalidSnapshot(
                    "missing snapshot version".to_string(),
                ))
            }
        }

        let Some(Value::Array(raw_entries)) = envelope.remove("entries") else {
            return Err(CacheError::InvalidSnapshot(
                "snapshot entries must be an array".to_string(),
            ));
        };

        let now = current_timestamp_ms();
        let mut report = ImportReport::default();

        for (position, raw) in raw_entries.into_iter().enumerate() {
            match self.import_entry(raw, now) {
                Ok(()) => report.imported += 1,
                Err(reason) => {
                    debug!("Skipping snapshot entry {}: {}", position, reason);
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Snapshot import: {} imported, {} skipped",
            report.imported, report.skipped
        );
        Ok(report)
    }

    /// Parses a JSON document and imports it.
    pub fn import_json(&mut self, json: &str) -> Result<ImportReport> {
        let snapshot: Value = serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidSnapshot(e.to_string()))?;
        self.import_snapshot(snapshot)
    }

    fn import_entry(&mut self, raw: Value, now: u64) -> std::result::Result<(), String> {
        let item: SnapshotEntry<V> = serde_json::from_value(raw).map_err(|e| e.to_string())?;
        validate_key(&item.key).map_err(|e| e.to_string())?;

        let (size, fingerprint) = measure(&item.key, &item.value);
        if let (Some(expected), Some(actual)) = (item.fingerprint, fingerprint) {
            if expected != actual {
                return Err("fingerprint mismatch".to_string());
            }
        }

        let entry = CacheEntry {
            value: item.value,
            created_at: item.created_at,
            ttl_ms: item.ttl_ms,
            size,
            access_count: item.access_count,
            last_accessed: item.last_accessed.max(item.created_at),
            fingerprint,
            insert_seq: 0,
            access_seq: 0,
        };
        if entry.is_expired_at(now) {
            return Err("entry already expired".to_string());
        }

        self.insert_entry(item.key, entry).map_err(|e| e.to_string())
    }
}
