//! Chunk key types.

use serde::{Deserialize, Serialize};

/// Identity of a chunk: a grid coordinate on the leaf grid.
///
/// Uniqueness invariant: at most one resident chunk per key at any time.
/// 2D worlds keep `z` at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    /// X coordinate in chunk-grid space
    pub x: i32,
    /// Y coordinate in chunk-grid space
    pub y: i32,
    /// Z coordinate in chunk-grid space (0 for 2D worlds)
    pub z: i32,
}

impl ChunkKey {
    /// Creates a new chunk key.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Creates a 2D chunk key (z = 0).
    #[must_use]
    pub const fn new_2d(x: i32, y: i32) -> Self {
        Self { x, y, z: 0 }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
