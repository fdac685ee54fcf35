//! Tile caching: a synchronous LRU cache keyed on decoded tile identity, and
//! a process-wide singleton manager so every reader shares one cache unless
//! a caller opts into a private one.

mod lru;

pub use lru::{CacheStats, TileCache};

use std::sync::{Arc, Mutex, OnceLock};

/// Default capacity (in tiles) of the process-wide cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Process-wide tile cache manager.
///
/// Readers call [`GlobalCacheManager::get`] to obtain the shared cache
/// unless a caller has installed a different one via
/// [`GlobalCacheManager::set`] or resized it via
/// [`GlobalCacheManager::set_capacity`].
pub struct GlobalCacheManager {
    cache: Mutex<Arc<TileCache>>,
}

impl GlobalCacheManager {
    fn instance() -> &'static GlobalCacheManager {
        static INSTANCE: OnceLock<GlobalCacheManager> = OnceLock::new();
        INSTANCE.get_or_init(|| GlobalCacheManager {
            cache: Mutex::new(Arc::new(
                TileCache::new(DEFAULT_CACHE_CAPACITY).expect("default cache capacity is nonzero"),
            )),
        })
    }

    /// Return the process-wide shared cache.
    pub fn get() -> Arc<TileCache> {
        Arc::clone(&Self::instance().cache.lock().expect("global cache mutex poisoned"))
    }

    /// Replace the process-wide shared cache wholesale.
    pub fn set(cache: Arc<TileCache>) {
        *Self::instance().cache.lock().expect("global cache mutex poisoned") = cache;
    }

    /// Resize the process-wide shared cache in place, discarding its
    /// current contents. Rejects a zero capacity.
    pub fn set_capacity(capacity: usize) -> crate::error::Result<()> {
        let cache = TileCache::new(capacity)?;
        Self::set(Arc::new(cache));
        Ok(())
    }

    /// Statistics for the current process-wide cache.
    pub fn stats() -> CacheStats {
        Self::get().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CachedTileData, ImageDimensions, TileKey};

    // The global manager is process-wide singleton state, so these tests
    // serialize via a dedicated lock to avoid interfering with each other.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn sample() -> Arc<CachedTileData> {
        Arc::new(CachedTileData {
            bytes: vec![9, 9, 9],
            size: ImageDimensions::new(1, 1),
            channels: 3,
        })
    }

    #[test]
    fn default_capacity_is_nonzero() {
        let _guard = TEST_LOCK.lock().unwrap();
        GlobalCacheManager::set_capacity(DEFAULT_CACHE_CAPACITY).unwrap();
        assert_eq!(GlobalCacheManager::get().capacity(), DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn set_capacity_rejects_zero() {
        let _guard = TEST_LOCK.lock().unwrap();
        assert!(GlobalCacheManager::set_capacity(0).is_err());
    }

    #[test]
    fn shared_cache_is_visible_across_handles() {
        let _guard = TEST_LOCK.lock().unwrap();
        GlobalCacheManager::set_capacity(4).unwrap();
        let key = TileKey::new("s.svs", 0, 0, 0);
        GlobalCacheManager::get().put(key.clone(), sample());
        assert!(GlobalCacheManager::get().get(&key).is_some());
    }

    #[test]
    fn set_replaces_the_shared_instance() {
        let _guard = TEST_LOCK.lock().unwrap();
        let fresh = Arc::new(TileCache::new(2).unwrap());
        GlobalCacheManager::set(Arc::clone(&fresh));
        assert!(Arc::ptr_eq(&fresh, &GlobalCacheManager::get()));
    }
}
