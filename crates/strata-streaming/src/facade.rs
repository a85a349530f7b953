//! High-level streaming entry point tracking the active chunk set.
//!
//! The facade layers caller-visible bookkeeping over [`StreamingEngine`]:
//! an active set of chunks loaded through it, optimistic status reporting
//! for pending unloads, and passthrough event subscription. Gameplay and
//! editor code talk to this type; the engine stays an implementation
//! detail behind it.

use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::RwLock;

use strata_common::{ChunkKey, StreamResult};

use crate::chunk::{ChunkHandle, StreamingState};
use crate::engine::{EngineStats, StreamingEngine};
use crate::events::{StreamEvent, StreamEventKind};

/// Facade over the streaming engine with active-set tracking.
///
/// The active set holds the keys of chunks that became resident through
/// [`Self::request_chunk`]. Membership updates ride the engine's own
/// completion callback and unload events, so it stays consistent with
/// residency without polling.
pub struct StreamingFacade<E: Send + Sync + 'static> {
    engine: Arc<StreamingEngine<E>>,
    active: Arc<RwLock<AHashSet<ChunkKey>>>,
}

impl<E: Send + Sync + 'static> StreamingFacade<E> {
    /// Wraps an engine, subscribing to its unload events so evictions and
    /// explicit unloads both clear the active set.
    #[must_use]
    pub fn new(engine: Arc<StreamingEngine<E>>) -> Arc<Self> {
        let active = Arc::new(RwLock::new(AHashSet::new()));
        let tracker = Arc::clone(&active);
        engine.subscribe(StreamEventKind::Unloaded, move |event| {
            tracker.write().remove(&event.key());
        });
        Arc::new(Self { engine, active })
    }

    /// Requests a chunk load; the key joins the active set when the load
    /// commits.
    pub fn request_chunk(&self, key: ChunkKey, priority: i32) -> StreamResult<()> {
        let active = Arc::clone(&self.active);
        self.engine.request_chunk_load(
            key,
            priority,
            Some(Box::new(move |_chunk: ChunkHandle<E>| {
                active.write().insert(key);
            })),
        )
    }

    /// Requests a chunk unload.
    ///
    /// Non-critical keys leave the active set immediately (optimistically,
    /// before the engine services the request); critical keys stay active
    /// because the engine will drop the unload.
    pub fn release_chunk(&self, key: ChunkKey, priority: i32) -> StreamResult<()> {
        if !self.engine.is_critical(key) {
            self.active.write().remove(&key);
        }
        self.engine.request_chunk_unload(key, priority)
    }

    /// Reports the streaming status of a chunk as seen by facade callers.
    ///
    /// Active chunks report `Loaded`. Both in-flight states are surfaced:
    /// a requested chunk whose load has not committed yet reports `Loading`,
    /// and a chunk that is resident but was already released reports
    /// `Unloading` until the engine services the unload.
    #[must_use]
    pub fn query_status(&self, key: ChunkKey) -> StreamingState {
        if self.active.read().contains(&key) {
            return StreamingState::Loaded;
        }
        match self.engine.state_of(key) {
            StreamingState::Loaded => StreamingState::Unloading,
            other => other,
        }
    }

    /// Returns true if the chunk is in the active set.
    #[must_use]
    pub fn is_active(&self, key: ChunkKey) -> bool {
        self.active.read().contains(&key)
    }

    /// Snapshot of the active chunk keys.
    #[must_use]
    pub fn active_chunks(&self) -> Vec<ChunkKey> {
        self.active.read().iter().copied().collect()
    }

    /// Resident chunk lookup, delegated to the engine cache.
    #[must_use]
    pub fn chunk(&self, key: ChunkKey) -> Option<ChunkHandle<E>> {
        self.engine.chunk(key)
    }

    /// Registers a lifecycle event subscriber.
    pub fn subscribe(
        &self,
        kind: StreamEventKind,
        callback: impl Fn(&StreamEvent<E>) + Send + Sync + 'static,
    ) {
        self.engine.subscribe(kind, callback);
    }

    /// Updates the priority of queued requests for a key.
    pub fn reprioritize(&self, key: ChunkKey, new_priority: i32) {
        self.engine.reprioritize(key, new_priority);
    }

    /// Cancels queued requests for a key.
    pub fn cancel(&self, key: ChunkKey) {
        self.engine.cancel(key);
    }

    /// Atomically replaces the protected chunk set.
    pub fn set_critical_chunks(&self, keys: impl IntoIterator<Item = ChunkKey>) {
        self.engine.set_critical_chunks(keys);
    }

    /// Snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Chunks currently resident.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.engine.cache_len()
    }

    /// Requests currently queued.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.engine.queue_len()
    }

    /// The wrapped engine, for callers needing lower-level control.
    #[must_use]
    pub fn engine(&self) -> &Arc<StreamingEngine<E>> {
        &self.engine
    }
}
