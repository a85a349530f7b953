//! Chunk data model: streaming states, metadata, and the scene chunk itself.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use strata_common::{Aabb, ChunkKey};

/// Streaming lifecycle state of a chunk.
///
/// Transitions are monotonic within one load/unload cycle:
/// `Unloaded → Loading → Loaded → Unloading → Unloaded`. The only other
/// valid transition is `Loading → Unloaded`, taken when a content fetch
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingState {
    /// Chunk content is not resident
    Unloaded,
    /// A load is in flight
    Loading,
    /// Chunk content is resident in the cache
    Loaded,
    /// An unload is in flight
    Unloading,
}

impl Default for StreamingState {
    fn default() -> Self {
        Self::Unloaded
    }
}

impl StreamingState {
    /// Returns true if `next` is a valid transition from this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unloaded, Self::Loading)
                | (Self::Loading, Self::Loaded)
                | (Self::Loading, Self::Unloaded) // load failed
                | (Self::Loaded, Self::Unloading)
                | (Self::Unloading, Self::Unloaded)
        )
    }
}

/// Mutable per-chunk streaming metadata.
///
/// Owned exclusively by the chunk that holds it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Keys of chunks that must be resident before this one is usable
    pub dependencies: Vec<ChunkKey>,
    /// Load priority (lower value = served first)
    pub priority: i32,
    /// Current streaming state
    pub state: StreamingState,
    /// Level-of-detail hint; consumed by rendering, not interpreted here
    pub lod: u32,
}

/// The unit of streaming: bounds plus resident entities plus metadata.
///
/// Entity payloads are opaque; the streaming machinery never inspects them.
#[derive(Debug)]
pub struct SceneChunk<E> {
    /// Chunk identity on the leaf grid
    pub key: ChunkKey,
    /// World-space bounds, fixed at creation
    pub bounds: Aabb,
    /// Opaque entity payloads resident in this chunk
    pub entities: Vec<E>,
    /// Streaming metadata
    pub metadata: ChunkMetadata,
}

impl<E> SceneChunk<E> {
    /// Creates an empty structural placeholder.
    #[must_use]
    pub fn new(key: ChunkKey, bounds: Aabb) -> Self {
        Self {
            key,
            bounds,
            entities: Vec::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    /// Creates a populated chunk, as the loader does on first load.
    #[must_use]
    pub fn with_entities(key: ChunkKey, bounds: Aabb, entities: Vec<E>) -> Self {
        Self {
            key,
            bounds,
            entities,
            metadata: ChunkMetadata::default(),
        }
    }

    /// Appends an entity payload.
    pub fn push_entity(&mut self, entity: E) {
        self.entities.push(entity);
    }

    /// Number of resident entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

/// Shared residency handle for a chunk.
///
/// Workers write through it on load; status queries read through it.
pub type ChunkHandle<E> = Arc<RwLock<SceneChunk<E>>>;
