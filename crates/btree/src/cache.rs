//! LRU front-cache from keys to value-list heads.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use common::BlockPointer;
use lru::LruCache;

/// Maps a key to the head of its value-list chain so `find` can skip routing.
///
/// Holds no node pointers, so splits and merges never stale it; only a head
/// change or a removed key has to be reported through [`HeadCache::put`] or
/// [`HeadCache::invalidate`].
pub struct HeadCache<K: Hash + Eq> {
    entries: Option<LruCache<K, BlockPointer>>,
}

impl<K: Hash + Eq> HeadCache<K> {
    /// A capacity of zero gives a cache that never holds anything.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<BlockPointer> {
        self.entries.as_mut()?.get(key).copied()
    }

    pub fn put(&mut self, key: K, head: BlockPointer) {
        if let Some(entries) = self.entries.as_mut() {
            entries.put(key, head);
        }
    }

    pub fn invalidate(&mut self, key: &K) {
        if let Some(entries) = self.entries.as_mut() {
            entries.pop(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq> fmt::Debug for HeadCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadCache")
            .field("enabled", &self.entries.is_some())
            .field("len", &self.len())
            .finish()
    }
}
