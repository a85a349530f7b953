//! Typed chunk lifecycle events and synchronous subscriber dispatch.

use parking_lot::RwLock;

use strata_common::ChunkKey;

use crate::chunk::{ChunkHandle, StreamingState};

/// Event variants a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    /// A chunk became resident
    Loaded,
    /// A chunk left residency (explicit unload or eviction)
    Unloaded,
    /// A chunk's streaming state changed
    StateChanged,
    /// A content fetch failed
    LoadFailed,
}

impl StreamEventKind {
    const COUNT: usize = 4;

    const fn index(self) -> usize {
        match self {
            Self::Loaded => 0,
            Self::Unloaded => 1,
            Self::StateChanged => 2,
            Self::LoadFailed => 3,
        }
    }
}

/// A chunk lifecycle event.
pub enum StreamEvent<E> {
    /// A chunk became resident.
    Loaded {
        /// Chunk key
        key: ChunkKey,
        /// Residency handle to the loaded chunk
        chunk: ChunkHandle<E>,
    },
    /// A chunk left residency.
    Unloaded {
        /// Chunk key
        key: ChunkKey,
    },
    /// A chunk's streaming state changed.
    StateChanged {
        /// Chunk key
        key: ChunkKey,
        /// The state just entered
        state: StreamingState,
    },
    /// A content fetch failed; the chunk reverted to unloaded.
    LoadFailed {
        /// Chunk key
        key: ChunkKey,
        /// Failure description from the content source
        reason: String,
    },
}

impl<E> StreamEvent<E> {
    /// The variant this event belongs to.
    #[must_use]
    pub fn kind(&self) -> StreamEventKind {
        match self {
            Self::Loaded { .. } => StreamEventKind::Loaded,
            Self::Unloaded { .. } => StreamEventKind::Unloaded,
            Self::StateChanged { .. } => StreamEventKind::StateChanged,
            Self::LoadFailed { .. } => StreamEventKind::LoadFailed,
        }
    }

    /// The chunk key the event concerns.
    #[must_use]
    pub fn key(&self) -> ChunkKey {
        match self {
            Self::Loaded { key, .. }
            | Self::Unloaded { key }
            | Self::StateChanged { key, .. }
            | Self::LoadFailed { key, .. } => *key,
        }
    }
}

impl<E> std::fmt::Debug for StreamEvent<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loaded { key, .. } => f.debug_struct("Loaded").field("key", key).finish(),
            Self::Unloaded { key } => f.debug_struct("Unloaded").field("key", key).finish(),
            Self::StateChanged { key, state } => f
                .debug_struct("StateChanged")
                .field("key", key)
                .field("state", state)
                .finish(),
            Self::LoadFailed { key, reason } => f
                .debug_struct("LoadFailed")
                .field("key", key)
                .field("reason", reason)
                .finish(),
        }
    }
}

type EventCallback<E> = Box<dyn Fn(&StreamEvent<E>) + Send + Sync>;

/// Registry of event subscribers, one list per event kind.
///
/// Callbacks run synchronously on whichever thread emits the event, in
/// registration order. Subscribers must not call back into the engine from
/// inside a callback.
pub struct EventDispatcher<E> {
    handlers: RwLock<[Vec<EventCallback<E>>; StreamEventKind::COUNT]>,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventDispatcher<E> {
    /// Creates a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(std::array::from_fn(|_| Vec::new())),
        }
    }

    /// Registers a callback for one event kind.
    pub fn subscribe(
        &self,
        kind: StreamEventKind,
        callback: impl Fn(&StreamEvent<E>) + Send + Sync + 'static,
    ) {
        self.handlers.write()[kind.index()].push(Box::new(callback));
    }

    /// Invokes every subscriber for the event's kind, in registration order.
    pub fn emit(&self, event: &StreamEvent<E>) {
        let handlers = self.handlers.read();
        for callback in &handlers[event.kind().index()] {
            callback(event);
        }
    }

    /// Number of subscribers for a kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: StreamEventKind) -> usize {
        self.handlers.read()[kind.index()].len()
    }
}
