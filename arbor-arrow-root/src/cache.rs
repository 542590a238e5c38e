use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::basket::DecodedBasket;

/// Hit and miss counters of a [`BasketCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

/// Decoded baskets of one file, keyed by their file offset.
///
/// The lock is only held for lookups and inserts, never while a basket decodes.
#[derive(Debug)]
pub struct BasketCache {
    inner: Option<Mutex<LruCache<u64, Arc<DecodedBasket>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BasketCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, seek: u64) -> Option<Arc<DecodedBasket>> {
        let found = self.inner.as_ref().and_then(|lru| lru.lock().get(&seek).cloned());
        match found {
            Some(basket) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(seek, "Basket cache hit");
                Some(basket)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, seek: u64, basket: Arc<DecodedBasket>) {
        if let Some(lru) = &self.inner {
            lru.lock().put(seek, basket);
        }
    }

    /// Returns the cached basket at `seek`, decoding it with `decode` on a miss.
    pub fn get_or_decode<E>(
        &self,
        seek: u64,
        decode: impl FnOnce() -> Result<DecodedBasket, E>,
    ) -> Result<Arc<DecodedBasket>, E> {
        if let Some(basket) = self.get(seek) {
            return Ok(basket);
        }
        let basket = Arc::new(decode()?);
        self.insert(seek, basket.clone());
        Ok(basket)
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |lru| lru.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}
