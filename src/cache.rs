//! Bounded LRU Cache
//!
//! Fixed-capacity, least-recently-used cache safe for concurrent use.
//! Recency order is kept in an `IndexMap`: the front entry is always the
//! least recently touched one, so eviction is deterministic.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::error::{ConversationError, Result};

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

/// Thread-safe LRU cache with a fixed capacity
pub struct BoundedCache<K, V> {
    entries: Mutex<IndexMap<K, V>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// Fails with [`ConversationError::InvalidCapacity`] when `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_label("cache", capacity)
    }

    /// Same as [`BoundedCache::new`], naming the cache in the capacity error.
    pub fn with_label(what: &'static str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ConversationError::InvalidCapacity { what, size: capacity });
        }

        Ok(Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Insert or overwrite `key`, marking it most recently used.
    ///
    /// Returns the evicted key when the insert pushed the cache over capacity.
    pub fn add(&self, key: K, value: V) -> Option<K> {
        let mut entries = self.entries.lock();

        // Re-inserting at the back marks the key as most recently used
        entries.shift_remove(&key);
        entries.insert(key, value);

        if entries.len() > self.capacity {
            let evicted = entries.shift_remove_index(0).map(|(k, _)| k);
            trace!("Cache evicted least recently used entry");
            evicted
        } else {
            None
        }
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();

        match entries.get_index_of(key) {
            Some(index) => {
                let last = entries.len() - 1;
                entries.move_index(index, last);
                self.hits.fetch_add(1, Ordering::Relaxed);
                entries.get_index(last).map(|(_, v)| v.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check membership without touching recency or statistics.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().shift_remove(key)
    }

    /// Clear all entries and reset statistics.
    pub fn purge(&self) {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}
