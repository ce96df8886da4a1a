//! In-memory cache in front of the disk store.
//!
//! A full cache displaces exactly one entry per insert; the displaced
//! entry is returned to the caller, which persists it. A capacity of
//! zero disables caching entirely.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::StoreError;

/// Displacement strategy for the in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    Fifo,
    Lru,
    Lfu,
}

impl FromStr for CachePolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIFO" => Ok(CachePolicy::Fifo),
            "LRU" => Ok(CachePolicy::Lru),
            "LFU" => Ok(CachePolicy::Lfu),
            _ => Err(StoreError::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Fifo => f.write_str("FIFO"),
            CachePolicy::Lru => f.write_str("LRU"),
            CachePolicy::Lfu => f.write_str("LFU"),
        }
    }
}

/// Bounded key-value cache. Implementations differ only in which entry
/// they displace when full.
pub trait Cache: Send {
    /// Looks up a key, updating recency/frequency bookkeeping.
    fn get(&mut self, key: &str) -> Option<String>;

    /// Inserts or replaces an entry. If the cache was full and the key is
    /// new, returns the displaced entry so the caller can persist it.
    fn put(&mut self, key: &str, value: &str) -> Option<(String, String)>;

    /// Drops an entry, returning its value if present.
    fn remove(&mut self, key: &str) -> Option<String>;

    fn contains(&self, key: &str) -> bool;

    /// Every cached entry, in no particular order. Used to flush the
    /// cache to storage when a node shuts down.
    fn entries(&self) -> Vec<(String, String)>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a cache for the given policy. A zero capacity yields a cache
/// that holds nothing and passes every insert straight back.
pub fn build_cache(policy: CachePolicy, capacity: usize) -> Box<dyn Cache> {
    if capacity == 0 {
        return Box::new(NullCache);
    }
    match policy {
        CachePolicy::Fifo => Box::new(FifoCache::new(capacity)),
        CachePolicy::Lru => Box::new(LruCache::new(capacity)),
        CachePolicy::Lfu => Box::new(LfuCache::new(capacity)),
    }
}

/// Cache with zero capacity: never hits, never holds.
struct NullCache;

impl Cache for NullCache {
    fn get(&mut self, _key: &str) -> Option<String> {
        None
    }

    fn put(&mut self, key: &str, value: &str) -> Option<(String, String)> {
        Some((key.to_string(), value.to_string()))
    }

    fn remove(&mut self, _key: &str) -> Option<String> {
        None
    }

    fn contains(&self, _key: &str) -> bool {
        false
    }

    fn entries(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn clear(&mut self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Displaces the entry that has been cached the longest.
struct FifoCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, String>,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }
}

impl Cache for FifoCache {
    fn get(&mut self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Option<(String, String)> {
        if let Some(slot) = self.entries.get_mut(key) {
            *slot = value.to_string();
            return None;
        }
        let displaced = if self.entries.len() == self.capacity {
            self.order.pop_front().and_then(|oldest| {
                let value = self.entries.remove(&oldest)?;
                Some((oldest, value))
            })
        } else {
            None
        };
        self.order.push_back(key.to_string());
        self.entries.insert(key.to_string(), value.to_string());
        displaced
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Displaces the least recently touched entry. Both gets and puts count
/// as a touch.
struct LruCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }
}

impl Cache for LruCache {
    fn get(&mut self, key: &str) -> Option<String> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    fn put(&mut self, key: &str, value: &str) -> Option<(String, String)> {
        if self.entries.contains_key(key) {
            self.entries.insert(key.to_string(), value.to_string());
            self.touch(key);
            return None;
        }
        let displaced = if self.entries.len() == self.capacity {
            self.order.pop_front().and_then(|coldest| {
                let value = self.entries.remove(&coldest)?;
                Some((coldest, value))
            })
        } else {
            None
        };
        self.order.push_back(key.to_string());
        self.entries.insert(key.to_string(), value.to_string());
        displaced
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-entry bookkeeping for LFU: the value, its use count, and the
/// insertion sequence number used to break count ties.
struct LfuEntry {
    value: String,
    uses: u64,
    seq: u64,
}

/// Displaces the least frequently used entry; ties break toward the
/// earliest inserted.
struct LfuCache {
    capacity: usize,
    next_seq: u64,
    entries: HashMap<String, LfuEntry>,
}

impl LfuCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn coldest(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.uses, e.seq))
            .map(|(k, _)| k.clone())
    }
}

impl Cache for LfuCache {
    fn get(&mut self, key: &str) -> Option<String> {
        let entry = self.entries.get_mut(key)?;
        entry.uses += 1;
        Some(entry.value.clone())
    }

    fn put(&mut self, key: &str, value: &str) -> Option<(String, String)> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value.to_string();
            entry.uses += 1;
            return None;
        }
        let displaced = if self.entries.len() == self.capacity {
            self.coldest().and_then(|coldest| {
                let entry = self.entries.remove(&coldest)?;
                Some((coldest, entry.value))
            })
        } else {
            None
        };
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            LfuEntry {
                value: value.to_string(),
                uses: 1,
                seq: self.next_seq,
            },
        );
        displaced
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|e| e.value)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing() {
        assert_eq!("fifo".parse::<CachePolicy>().unwrap(), CachePolicy::Fifo);
        assert_eq!("LRU".parse::<CachePolicy>().unwrap(), CachePolicy::Lru);
        assert_eq!("Lfu".parse::<CachePolicy>().unwrap(), CachePolicy::Lfu);
        assert!("ARC".parse::<CachePolicy>().is_err());
    }

    #[test]
    fn zero_capacity_passes_through() {
        let mut cache = build_cache(CachePolicy::Lru, 0);
        assert_eq!(
            cache.put("k", "v"),
            Some(("k".to_string(), "v".to_string()))
        );
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn fifo_displaces_oldest() {
        let mut cache = build_cache(CachePolicy::Fifo, 2);
        assert_eq!(cache.put("a", "1"), None);
        assert_eq!(cache.put("b", "2"), None);
        // touching "a" must not save it under FIFO
        cache.get("a");
        assert_eq!(cache.put("c", "3"), Some(("a".to_string(), "1".to_string())));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn fifo_update_does_not_displace() {
        let mut cache = build_cache(CachePolicy::Fifo, 2);
        cache.put("a", "1");
        cache.put("b", "2");
        assert_eq!(cache.put("a", "9"), None);
        assert_eq!(cache.get("a"), Some("9".to_string()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn lru_displaces_coldest() {
        let mut cache = build_cache(CachePolicy::Lru, 2);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.get("a"); // "b" is now coldest
        assert_eq!(cache.put("c", "3"), Some(("b".to_string(), "2".to_string())));
        assert!(cache.contains("a"));
    }

    #[test]
    fn lfu_displaces_least_used() {
        let mut cache = build_cache(CachePolicy::Lfu, 2);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.get("a");
        cache.get("a");
        cache.get("b");
        // "b" used less often
        assert_eq!(cache.put("c", "3"), Some(("b".to_string(), "2".to_string())));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn remove_frees_a_slot() {
        let mut cache = build_cache(CachePolicy::Fifo, 1);
        cache.put("a", "1");
        assert_eq!(cache.remove("a"), Some("1".to_string()));
        assert_eq!(cache.put("b", "2"), None);
    }
}
