//! Canonical LRU tile cache implementation.
//!
//! Converted from the ancestor's async, byte-budget cache for encoded JPEG
//! tiles into a synchronous, tile-count capacity cache keyed on
//! [`TileKey`]: a hash map plus recency order behind a single mutex, with
//! pure LRU eviction rather than size-based eviction.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::error::SlideError;
use crate::model::{CachedTileData, TileKey};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CacheStats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Thread-safe LRU mapping from [`TileKey`] to decoded tile bytes.
///
/// Each operation holds a single mutex for its whole critical section;
/// callers should not hold a returned `Arc<CachedTileData>` across further
/// cache calls any longer than necessary.
pub struct TileCache {
    inner: Mutex<Inner>,
}

struct Inner {
    lru: LruCache<TileKey, Arc<CachedTileData>>,
    hits: u64,
    misses: u64,
}

impl TileCache {
    /// Create a new cache. Capacity must be at least 1.
    pub fn new(capacity: usize) -> crate::error::Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| SlideError::invalid_argument("cache capacity must be >= 1"))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        })
    }

    /// Look up `key`. Moves the entry to the front on hit and increments the
    /// hit counter; increments the miss counter otherwise.
    pub fn get(&self, key: &TileKey) -> Option<Arc<CachedTileData>> {
        let mut inner = self.inner.lock().expect("tile cache mutex poisoned");
        match inner.lru.get(key).cloned() {
            Some(data) => {
                inner.hits += 1;
                Some(data)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace `key`. Inserting past capacity evicts the
    /// least-recently-touched entry first.
    pub fn put(&self, key: TileKey, data: Arc<CachedTileData>) {
        let mut inner = self.inner.lock().expect("tile cache mutex poisoned");
        inner.lru.put(key, data);
    }

    /// Empty the cache and zero the hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("tile cache mutex poisoned");
        inner.lru.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("tile cache mutex poisoned").lru.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("tile cache mutex poisoned").lru.cap().get()
    }

    /// Replace the cache's capacity. Not a partial resize: the cache is
    /// cleared and counters reset.
    pub fn set_capacity(&self, new_capacity: usize) -> crate::error::Result<()> {
        let new_capacity = NonZeroUsize::new(new_capacity)
            .ok_or_else(|| SlideError::invalid_argument("cache capacity must be >= 1"))?;
        let mut inner = self.inner.lock().expect("tile cache mutex poisoned");
        inner.lru = LruCache::new(new_capacity);
        inner.hits = 0;
        inner.misses = 0;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("tile cache mutex poisoned");
        let hits = inner.hits;
        let misses = inner.misses;
        let hit_ratio = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        CacheStats {
            capacity: inner.lru.cap().get(),
            size: inner.lru.len(),
            hits,
            misses,
            hit_ratio,
        }
    }
}
