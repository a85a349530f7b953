//! # Strata Streaming
//!
//! Spatial chunk streaming: partitions a world into bounded chunks, decides
//! which chunks must be resident given a viewer position, and asynchronously
//! loads/evicts chunk content under a bounded memory budget.
//!
//! ## Overview
//!
//! - [`spatial::SpatialIndex`] — eager quad/octree answering "which chunks
//!   intersect this region" and "which chunks are nearest this point"
//! - [`cache::ChunkCache`] — bounded LRU cache with protected entries
//! - [`scheduler::RequestScheduler`] — priority queue of pending requests
//! - [`engine::StreamingEngine`] — dispatch thread plus worker pool driving
//!   loads/unloads through the cache
//! - [`facade::StreamingFacade`] — the external access point with
//!   subscriptions for lifecycle events
//!
//! The index is consulted by callers to decide *which* chunks to request;
//! the engine only moves chunk content in and out of residency.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod chunk;
pub mod engine;
pub mod events;
pub mod facade;
pub mod scheduler;
pub mod spatial;

pub use cache::{ChunkCache, CriticalSet};
pub use chunk::{ChunkHandle, ChunkMetadata, SceneChunk, StreamingState};
pub use engine::{ChunkSource, EngineStats, StreamingConfig, StreamingEngine};
pub use events::{EventDispatcher, StreamEvent, StreamEventKind};
pub use facade::StreamingFacade;
pub use scheduler::{ChunkRequest, LoadCallback, RequestAction, RequestScheduler};
pub use spatial::{Dimensionality, IndexStats, SpatialIndex};
