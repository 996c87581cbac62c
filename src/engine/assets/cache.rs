// Bounded resource cache with least-recently-used eviction

use super::GraphicsError;
use log::{debug, trace, warn};
use lru::LruCache;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Resources that hand back GPU memory when they leave a cache.
///
/// `release` runs exactly once per cached value: on eviction, explicit
/// removal, `clear`, or when the cache itself is dropped. The default simply
/// drops the value, which frees any `GpuTexture` it solely owns.
pub trait Release: Sized {
    fn release(self) {}
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entries: usize,

    /// Maximum number of entries
    pub capacity: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses (loads attempted)
    pub misses: u64,

    /// Number of entries evicted to respect the capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fixed-capacity map from key to loaded resource, ordered by recency.
///
/// Lookups promote the entry to most-recently-used. Inserting past the
/// capacity evicts the least-recently-used entry and releases it. The cache
/// is owned and mutated by a single thread, so it carries no locks.
pub struct ResourceCache<K, V>
where
    K: Hash + Eq,
    V: Release,
{
    name: &'static str,
    entries: LruCache<K, V>,
    stats: CacheStats,
}

impl<K, V> ResourceCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Release + Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| {
            warn!("{}: capacity 0 requested, using 1", name);
            NonZeroUsize::MIN
        });

        Self {
            name,
            entries: LruCache::new(capacity),
            stats: CacheStats {
                capacity: capacity.get(),
                ..Default::default()
            },
        }
    }

    /// Return the cached resource for `key`, loading it on a miss.
    ///
    /// A hit promotes the entry and performs no load. On a miss `load` runs;
    /// its error is returned as-is and nothing is inserted. A successful load
    /// is inserted as most-recently-used, evicting the least-recently-used
    /// entry if the capacity would be exceeded.
    pub fn get_or_load<F>(&mut self, key: &K, load: F) -> Result<V, GraphicsError>
    where
        F: FnOnce() -> Result<V, GraphicsError>,
    {
        if let Some(value) = self.entries.get(key) {
            self.stats.hits += 1;
            trace!("{}: hit {:?}", self.name, key);
            return Ok(value.clone());
        }

        self.stats.misses += 1;
        trace!("{}: miss {:?}", self.name, key);

        let value = load()?;

        if let Some((evicted_key, evicted)) = self.entries.push(key.clone(), value.clone()) {
            self.stats.evictions += 1;
            debug!("{}: evicting {:?}", self.name, evicted_key);
            evicted.release();
        }
        self.stats.entries = self.entries.len();

        Ok(value)
    }

    /// Look up without loading, promoting the entry on a hit
    pub fn get(&mut self, key: &K) -> Option<V> {
        let value = self.entries.get(key).cloned();
        if value.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        value
    }

    /// Look up without touching recency or statistics
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.peek(key)
    }

    /// Check if a key is cached without updating recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Remove and release one entry, returning whether it was present
    pub fn remove(&mut self, key: &K) -> bool {
        match self.entries.pop(key) {
            Some(value) => {
                debug!("{}: removing {:?}", self.name, key);
                value.release();
                self.stats.entries = self.entries.len();
                true
            }
            None => false,
        }
    }

    /// Keys from most- to least-recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Hash + Eq,
    V: Release,
{
    /// Release every entry, least-recently-used first
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!("{}: releasing {} entries", self.name, self.entries.len());
        }
        while let Some((_, value)) = self.entries.pop_lru() {
            value.release();
        }
        self.stats.entries = 0;
    }
}

impl<K, V> Drop for ResourceCache<K, V>
where
    K: Hash + Eq,
    V: Release,
{
    fn drop(&mut self) {
        self.clear();
    }
}
