//! Error types for Project Strata.

use thiserror::Error;

use crate::keys::ChunkKey;
use crate::point::WorldPoint;

/// Top-level error type for Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Spatial index construction errors
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Streaming errors
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Spatial index construction errors.
///
/// These are fatal at construction time: a malformed tree is refused rather
/// than built and queried.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Bounds with inverted or non-finite corners
    #[error("malformed bounds: min {min:?} exceeds max {max:?} or is non-finite")]
    MalformedBounds {
        /// Minimum corner given
        min: WorldPoint,
        /// Maximum corner given
        max: WorldPoint,
    },

    /// Non-positive or non-finite minimum leaf size
    #[error("minimum leaf size must be positive and finite, got {0}")]
    InvalidMinSize(f32),
}

/// Chunk streaming errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The injected content fetch failed for a chunk
    #[error("failed to load chunk {key}: {reason}")]
    LoadFailed {
        /// Key of the chunk that failed to load
        key: ChunkKey,
        /// Failure description from the content source
        reason: String,
    },

    /// The engine has shut down and accepts no further requests
    #[error("streaming engine has shut down")]
    EngineShutDown,
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Result type alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
