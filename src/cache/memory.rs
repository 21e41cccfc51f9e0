//! Memory Tier - decoded values in RAM
//!
//! Unbounded for the lifetime of the process; entries leave only through
//! `remove` and `clear`. Sharded through `DashMap` so reads never contend
//! with writes to other keys.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::key::CacheKey;

/// In-process cache of decoded values
pub struct MemoryCache<V> {
    /// Storage
    storage: DashMap<CacheKey, V>,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> MemoryCache<V> {
    /// Create an empty memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a value up, counting the hit or miss
    pub fn try_get(&self, key: &CacheKey) -> Option<V> {
        match self.storage.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look a value up without touching the counters
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        self.storage.get(key).map(|value| value.clone())
    }

    /// Insert or overwrite
    pub fn put(&self, key: CacheKey, value: V) {
        self.storage.insert(key, value);
    }

    /// Drop one entry; no-op when absent
    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        self.storage.remove(key).map(|(_, value)| value)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Check if cache contains a key
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage.contains_key(key)
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn key(id: &str) -> CacheKey {
        CacheKey::derive(id)
    }

    #[test]
    fn test_put_get() {
        let cache = MemoryCache::new();
        cache.put(key("a"), Bytes::from_static(b"alpha"));

        assert_eq!(cache.try_get(&key("a")), Some(Bytes::from_static(b"alpha")));
        assert_eq!(cache.try_get(&key("b")), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = MemoryCache::new();
        cache.put(key("a"), 1u32);
        cache.put(key("a"), 2u32);
        assert_eq!(cache.peek(&key("a")), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let cache: MemoryCache<u32> = MemoryCache::new();
        assert!(cache.remove(&key("missing")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::new();
        for i in 0..10u32 {
            cache.put(key(&format!("k{}", i)), i);
        }
        assert_eq!(cache.len(), 10);
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&key("k0")));
    }

    #[test]
    fn test_peek_does_not_count() {
        let cache = MemoryCache::new();
        cache.put(key("a"), 1u8);
        cache.peek(&key("a"));
        cache.peek(&key("b"));
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 0);
    }
}
