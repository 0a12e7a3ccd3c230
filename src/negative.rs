//! Negative cache of conversations this bot does not manage.

use tracing::debug;

use crate::cache::{BoundedCache, CacheStats};
use crate::error::Result;

/// Default number of unmanaged conversation IDs remembered
pub const DEFAULT_NEGATIVE_CAPACITY: usize = 1000;

/// Presence-only LRU set of conversation IDs known to be unmanaged
pub struct NegativeSet {
    inner: BoundedCache<String, ()>,
}

impl NegativeSet {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: BoundedCache::with_label("negative cache", capacity)?,
        })
    }

    /// Record `id` as unmanaged
    pub fn add(&self, id: &str) {
        self.inner.add(id.to_string(), ());
        debug!(conversation_id = id, "Marked conversation as unmanaged");
    }

    /// Check whether `id` was recorded as unmanaged.
    ///
    /// A positive check counts as a use and keeps the marker alive.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.get(&id.to_string()).is_some()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.remove(&id.to_string()).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn purge(&self) {
        self.inner.purge();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
