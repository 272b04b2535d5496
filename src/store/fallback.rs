//! In-process stand-in for the backing store.

use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;

use crate::clock::elapsed_ms;

/// A locally held value and the moment it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub stored_at: Timestamp,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Timestamp, ttl: Duration) -> bool {
        u128::from(elapsed_ms(now, self.stored_at)) >= ttl.as_millis()
    }
}

/// Process-wide key/value map scoped by an owner tag.
///
/// Nothing here expires on its own; owners prune with
/// [`retain_fresh`](Self::retain_fresh).
#[derive(Debug)]
pub struct FallbackStore {
    owner: String,
    entries: DashMap<String, CacheEntry>,
}

impl FallbackStore {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: DashMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn insert(&self, key: impl Into<String>, value: Vec<u8>, stored_at: Timestamp) {
        self.entries.insert(key.into(), CacheEntry { value, stored_at });
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Drop `key` itself and every key nested under `key:`.
    pub fn remove_prefix(&self, key: &str) -> usize {
        let nested = format!("{}:", key);
        let before = self.entries.len();
        self.entries
            .retain(|k, _| k != key && !k.starts_with(nested.as_str()));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    /// Evict entries at least `ttl` old; returns how many were evicted.
    pub fn retain_fresh(&self, now: Timestamp, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now, ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millisecond(ms).unwrap()
    }

    #[test]
    fn test_remove_prefix_respects_segment_boundary() {
        let store = FallbackStore::new("test");
        store.insert("site:acme", b"root".to_vec(), at(0));
        store.insert("site:acme:home", b"home".to_vec(), at(0));
        store.insert("site:acmeco", b"other".to_vec(), at(0));

        assert_eq!(store.remove_prefix("site:acme"), 2);
        assert!(store.get("site:acmeco").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retain_fresh_evicts_at_ttl_boundary() {
        let store = FallbackStore::new("test");
        store.insert("old", vec![1], at(0));
        store.insert("new", vec![2], at(500));

        let evicted = store.retain_fresh(at(1_000), Duration::from_secs(1));
        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn test_clear_reports_count() {
        let store = FallbackStore::new("test");
        store.insert("a", vec![], at(0));
        store.insert("b", vec![], at(0));
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
    }
}
