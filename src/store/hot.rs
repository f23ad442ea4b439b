//! In-memory hot tier backed by a bounded LRU.
//!
//! Holds the most recently read or written concepts. Eviction only drops the
//! cached copy; the concept itself stays in the index.

use std::num::NonZeroUsize;
use std::sync::{Mutex, TryLockError};

use lru::LruCache;

use crate::concept::Concept;

/// Bounded least-recently-used cache of concepts.
#[derive(Debug)]
pub struct HotCache {
    data: Mutex<LruCache<String, Concept>>,
}

impl HotCache {
    /// Create a cache holding at most `capacity` concepts.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            data: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Run `f` while holding the cache lock.
    ///
    /// The store uses this as its critical section so that index updates and
    /// cache promotions are never interleaved.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut LruCache<String, Concept>) -> R) -> R {
        // A panic inside the store's apply can leave part of a transaction
        // in the index. The engine's write lock is poisoned by the same panic,
        // so nothing commits on top of it, and reopening replays the WAL.
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// Like [`with_lock`](Self::with_lock), but returns `None` instead of
    /// waiting when another thread holds the lock.
    pub fn try_with_lock<R>(&self, f: impl FnOnce(&mut LruCache<String, Concept>) -> R) -> Option<R> {
        let mut guard = match self.data.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(f(&mut guard))
    }

    /// Number of cached concepts.
    pub fn len(&self) -> usize {
        self.with_lock(|cache| cache.len())
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached concepts.
    pub fn capacity(&self) -> usize {
        self.with_lock(|cache| cache.cap().get())
    }
}
