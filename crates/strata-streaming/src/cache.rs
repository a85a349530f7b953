//! Bounded LRU chunk cache with eviction-protected entries.

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use strata_common::ChunkKey;

use crate::chunk::ChunkHandle;

/// The set of critical chunk keys exempt from automatic eviction.
///
/// Guarded by its own lock; the cache snapshots it before taking the cache
/// lock so that no operation ever holds both at once.
#[derive(Debug, Default)]
pub struct CriticalSet {
    inner: RwLock<AHashSet<ChunkKey>>,
}

impl CriticalSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the whole set.
    pub fn replace(&self, keys: impl IntoIterator<Item = ChunkKey>) {
        let mut inner = self.inner.write();
        inner.clear();
        inner.extend(keys);
    }

    /// Checks membership.
    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.inner.read().contains(&key)
    }

    /// Returns a point-in-time copy of the set.
    #[must_use]
    pub fn snapshot(&self) -> AHashSet<ChunkKey> {
        self.inner.read().clone()
    }

    /// Number of protected keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if no keys are protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

struct Entry<E> {
    chunk: ChunkHandle<E>,
    stamp: u64,
}

struct CacheInner<E> {
    map: AHashMap<ChunkKey, Entry<E>>,
    capacity: usize,
    next_stamp: u64,
}

/// Capacity-bounded cache keyed by chunk identity, evicting least-recently
/// used entries, safe for concurrent access.
///
/// Each operation is a single critical section over one mutex; the lock is
/// never held across a content fetch. Protected keys are never evicted
/// automatically: if every overflow candidate is protected, capacity is
/// temporarily exceeded instead.
pub struct ChunkCache<E> {
    inner: Mutex<CacheInner<E>>,
    critical: std::sync::Arc<CriticalSet>,
}

impl<E> ChunkCache<E> {
    /// Creates a cache holding at most `capacity` unprotected chunks.
    #[must_use]
    pub fn new(capacity: usize, critical: std::sync::Arc<CriticalSet>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: AHashMap::new(),
                capacity,
                next_stamp: 0,
            }),
            critical,
        }
    }

    /// Returns the chunk if present, marking it most-recently-used.
    #[must_use]
    pub fn get(&self, key: ChunkKey) -> Option<ChunkHandle<E>> {
        let mut inner = self.inner.lock();
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        let entry = inner.map.get_mut(&key)?;
        entry.stamp = stamp;
        Some(std::sync::Arc::clone(&entry.chunk))
    }

    /// Returns true if the key is resident, without touching recency.
    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.inner.lock().map.contains_key(&key)
    }

    /// Inserts or replaces, marking most-recently-used.
    ///
    /// Returns the keys evicted to restore capacity (empty when the cache
    /// had room, or when only protected chunks were left to evict).
    pub fn put(&self, key: ChunkKey, chunk: ChunkHandle<E>) -> Vec<ChunkKey> {
        // Snapshot the protected set before locking the cache; holding both
        // locks at once is how deadlocks get introduced here.
        let protected = self.critical.snapshot();
        let mut inner = self.inner.lock();
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.map.insert(key, Entry { chunk, stamp });

        let mut evicted = Vec::new();
        while inner.map.len() > inner.capacity {
            let victim = inner
                .map
                .iter()
                .filter(|(k, _)| !protected.contains(*k))
                .min_by_key(|(_, e)| e.stamp)
                .map(|(k, _)| *k);
            let Some(victim) = victim else {
                // Everything left is protected: exceed capacity instead.
                break;
            };
            inner.map.remove(&victim);
            debug!(key = %victim, "evicted least-recently-used chunk");
            evicted.push(victim);
        }
        evicted
    }

    /// Removes a chunk unconditionally, ignoring protection.
    ///
    /// Used by explicit unload requests; no-op if absent.
    pub fn remove(&self, key: ChunkKey) -> Option<ChunkHandle<E>> {
        self.inner.lock().map.remove(&key).map(|e| e.chunk)
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if no chunks are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Updates the capacity. Entries over the new capacity are evicted on
    /// the next insertion, not immediately.
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.lock().capacity = capacity;
    }

    /// Snapshot of all resident keys.
    #[must_use]
    pub fn keys(&self) -> Vec<ChunkKey> {
        self.inner.lock().map.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SceneChunk;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use strata_common::{Aabb, WorldPoint};

    fn handle(key: ChunkKey) -> ChunkHandle<u32> {
        let bounds =
            Aabb::new(WorldPoint::ZERO, WorldPoint::new(1.0, 1.0, 1.0)).expect("valid bounds");
        Arc::new(RwLock::new(SceneChunk::new(key, bounds)))
    }

    fn key(n: i32) -> ChunkKey {
        ChunkKey::new(n, 0, 0)
    }

    fn cache(capacity: usize) -> (ChunkCache<u32>, Arc<CriticalSet>) {
        let critical = Arc::new(CriticalSet::new());
        (ChunkCache::new(capacity, Arc::clone(&critical)), critical)
    }

    #[test]
    fn test_get_absent_is_none() {
        let (cache, _) = cache(3);
        assert!(cache.get(key(1)).is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        // put a, b, c, d on capacity 3: "a" is evicted, {b, c, d} remain.
        let (cache, _) = cache(3);
        for n in 0..4 {
            cache.put(key(n), handle(key(n)));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get(key(0)).is_none());
        for n in 1..4 {
            assert!(cache.get(key(n)).is_some());
        }
    }

    #[test]
    fn test_get_refreshes_recency() {
        let (cache, _) = cache(3);
        for n in 0..3 {
            cache.put(key(n), handle(key(n)));
        }
        // Touch the oldest; the next overflow must evict key 1 instead.
        assert!(cache.get(key(0)).is_some());
        let evicted = cache.put(key(3), handle(key(3)));
        assert_eq!(evicted, vec![key(1)]);
        assert!(cache.get(key(0)).is_some());
    }

    #[test]
    fn test_protected_chunks_never_auto_evicted() {
        let (cache, critical) = cache(2);
        critical.replace([key(0), key(1)]);
        cache.put(key(0), handle(key(0)));
        cache.put(key(1), handle(key(1)));
        // Overflow with only protected candidates: capacity is exceeded.
        let evicted = cache.put(key(2), handle(key(2)));
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 3);

        // Next unprotected insertion evicts among the unprotected only.
        let evicted = cache.put(key(3), handle(key(3)));
        assert_eq!(evicted, vec![key(2)]);
        assert!(cache.contains(key(0)));
        assert!(cache.contains(key(1)));
    }

    #[test]
    fn test_remove_ignores_protection() {
        let (cache, critical) = cache(3);
        critical.replace([key(0)]);
        cache.put(key(0), handle(key(0)));
        assert!(cache.remove(key(0)).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (cache, _) = cache(3);
        assert!(cache.remove(key(9)).is_none());
    }

    #[test]
    fn test_capacity_invariant() {
        // size() <= capacity OR every entry beyond capacity is protected.
        let (cache, critical) = cache(2);
        for n in 0..5 {
            cache.put(key(n), handle(key(n)));
        }
        assert!(cache.len() <= 2);

        critical.replace((0..10).map(key));
        for n in 5..10 {
            cache.put(key(n), handle(key(n)));
        }
        let over = cache.len().saturating_sub(cache.capacity());
        assert!(over > 0);
        for k in cache.keys() {
            // All entries are protected here, satisfying the invariant.
            assert!(critical.contains(k));
        }
    }

    #[test]
    fn test_set_capacity_applies_on_next_put() {
        let (cache, _) = cache(5);
        for n in 0..5 {
            cache.put(key(n), handle(key(n)));
        }
        cache.set_capacity(2);
        assert_eq!(cache.len(), 5); // shrink is lazy
        let evicted = cache.put(key(5), handle(key(5)));
        assert_eq!(evicted.len(), 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_same_key_keeps_size() {
        let (cache, _) = cache(3);
        cache.put(key(0), handle(key(0)));
        cache.put(key(0), handle(key(0)));
        assert_eq!(cache.len(), 1);
    }
}
