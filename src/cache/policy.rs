//! Eviction Policy Module
//!
//! Selects which entry leaves the cache when an insert would exceed capacity.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

// == Eviction Policy ==
/// Rule used to pick an eviction victim.
///
/// Every policy breaks ties by insertion order (oldest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed entry goes first
    #[default]
    Lru,
    /// Least frequently accessed entry goes first
    Lfu,
    /// Oldest inserted entry goes first
    Fifo,
}

impl EvictionPolicy {
    // == Select Victim ==
    /// Returns the key that should be evicted next, or None if empty.
    pub fn select_victim<V>(&self, entries: &HashMap<String, CacheEntry<V>>) -> Option<String> {
        let victim = match self {
            EvictionPolicy::Lru => entries
                .iter()
                .min_by_key(|(_, e)| (e.access_seq, e.insert_seq)),
            EvictionPolicy::Lfu => entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.insert_seq)),
            EvictionPolicy::Fifo => entries.iter().min_by_key(|(_, e)| e.insert_seq),
        };
        victim.map(|(key, _)| key.clone())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(insert_seq: u64, access_seq: u64, access_count: u64) -> CacheEntry<&'static str> {
        let mut e = CacheEntry::new("v", Duration::from_secs(60), 1, None);
        e.insert_seq = insert_seq;
        e.access_seq = access_seq;
        e.access_count = access_count;
        e
    }

    fn entries() -> HashMap<String, CacheEntry<&'static str>> {
        let mut map = HashMap::new();
        // a: inserted first, read recently, read often
        map.insert("a".to_string(), entry(1, 10, 5));
        // b: inserted second, never read
        map.insert("b".to_string(), entry(2, 2, 0));
        // c: inserted third, read once
        map.insert("c".to_string(), entry(3, 11, 1));
        map
    }

    #[test]
    fn test_select_empty() {
        let map: HashMap<String, CacheEntry<&str>> = HashMap::new();
        assert_eq!(EvictionPolicy::Lru.select_victim(&map), None);
    }

    #[test]
    fn test_lru_victim() {
        assert_eq!(EvictionPolicy::Lru.select_victim(&entries()), Some("b".to_string()));
    }

    #[test]
    fn test_lfu_victim() {
        assert_eq!(EvictionPolicy::Lfu.select_victim(&entries()), Some("b".to_string()));
    }

    #[test]
    fn test_fifo_victim() {
        assert_eq!(EvictionPolicy::Fifo.select_victim(&entries()), Some("a".to_string()));
    }

    #[test]
    fn test_lfu_tie_broken_by_insertion_order() {
        let mut map = HashMap::new();
        map.insert("late".to_string(), entry(9, 9, 2));
        map.insert("early".to_string(), entry(4, 12, 2));
        assert_eq!(EvictionPolicy::Lfu.select_victim(&map), Some("early".to_string()));
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("LRU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!(" lfu ".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lfu));
        assert_eq!("fifo".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Fifo));
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn test_policy_serde_lowercase() {
        let json = serde_json::to_string(&EvictionPolicy::Fifo).unwrap();
        assert_eq!(json, "\"fifo\"");
        let parsed: EvictionPolicy = serde_json::from_str("\"lfu\"").unwrap();
        assert_eq!(parsed, EvictionPolicy::Lfu);
    }
}
