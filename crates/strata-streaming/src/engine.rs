//! Streaming engine: worker orchestration, budget and critical-set
//! enforcement.
//!
//! One dispatch thread drains the [`RequestScheduler`]. Loads are handed to
//! a bounded worker pool so the dispatch thread never waits on a content
//! fetch; unloads run inline on the dispatch thread, where eviction is cheap
//! and the protected-set snapshot is consistent.
//!
//! Same-key transitions are serialized through per-key `(state, epoch)`
//! tokens: every accepted transition takes a globally unique epoch, and a
//! worker commits its fetched chunk only if its epoch is still current. The
//! request serviced last therefore wins deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use strata_common::{Aabb, ChunkKey, StreamError, StreamResult, WorldPoint};

use crate::cache::{ChunkCache, CriticalSet};
use crate::chunk::{ChunkHandle, SceneChunk, StreamingState};
use crate::events::{EventDispatcher, StreamEvent, StreamEventKind};
use crate::scheduler::{ChunkRequest, LoadCallback, RequestAction, RequestScheduler};

/// Budget fraction at which the warning hook fires.
pub const WARNING_FRACTION: f32 = 0.80;

/// Budget fraction at which the critical hook fires.
pub const CRITICAL_FRACTION: f32 = 0.95;

/// Injected content-fetch capability: the only point where persistence or
/// network systems are consulted.
///
/// Called from worker threads only; may block for arbitrary time. Callers
/// needing bounded latency must enforce their own timeout inside `fetch`.
pub trait ChunkSource<E>: Send + Sync {
    /// Fetches the entity payloads for a chunk.
    fn fetch(&self, key: ChunkKey, bounds: Aabb) -> StreamResult<Vec<E>>;
}

impl<E, F> ChunkSource<E> for F
where
    F: Fn(ChunkKey, Aabb) -> StreamResult<Vec<E>> + Send + Sync,
{
    fn fetch(&self, key: ChunkKey, bounds: Aabb) -> StreamResult<Vec<E>> {
        self(key, bounds)
    }
}

/// Streaming engine configuration.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Number of load worker threads
    pub worker_threads: usize,
    /// Maximum resident chunks before eviction (also the cache capacity)
    pub memory_budget: usize,
    /// Dispatch poll interval; bounds shutdown latency
    pub poll_interval: Duration,
    /// World-space edge length of one chunk, for loader-created bounds
    pub chunk_extent: f32,
    /// Capacity of the dispatch-to-worker channel
    pub queue_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            memory_budget: 64,
            poll_interval: Duration::from_millis(10),
            chunk_extent: 256.0,
            queue_capacity: 64,
        }
    }
}

/// Point-in-time engine counters, for debug/editor display only.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    /// Chunks currently resident in the cache
    pub resident: usize,
    /// Requests currently queued
    pub queued: usize,
    /// Loads committed since startup
    pub loads_completed: u64,
    /// Loads that failed since startup
    pub loads_failed: u64,
    /// Explicit unloads serviced since startup
    pub unloads_completed: u64,
    /// Chunks evicted under cache pressure since startup
    pub evictions: u64,
}

/// Per-key transition token. The epoch is globally unique per accepted
/// transition, so stale worker results can be detected and discarded.
#[derive(Debug, Clone, Copy)]
struct StateToken {
    state: StreamingState,
    epoch: u64,
}

#[derive(Default)]
struct Counters {
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    unloads_completed: AtomicU64,
    evictions: AtomicU64,
}

type PressureCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

const LEVEL_NORMAL: u8 = 0;
const LEVEL_WARNING: u8 = 1;
const LEVEL_CRITICAL: u8 = 2;

#[derive(Default)]
struct PressureHooks {
    warning: Mutex<Option<PressureCallback>>,
    critical: Mutex<Option<PressureCallback>>,
}

struct LoadTask<E> {
    key: ChunkKey,
    priority: i32,
    epoch: u64,
    callback: Option<LoadCallback<E>>,
}

struct Shared<E> {
    cache: ChunkCache<E>,
    scheduler: RequestScheduler<E>,
    critical: Arc<CriticalSet>,
    states: DashMap<ChunkKey, StateToken>,
    events: EventDispatcher<E>,
    source: Box<dyn ChunkSource<E>>,
    budget: AtomicUsize,
    next_epoch: AtomicU64,
    counters: Counters,
    pressure: PressureHooks,
    pressure_level: AtomicU8,
    running: AtomicBool,
    chunk_extent: f32,
}

impl<E> Shared<E> {
    /// Accepts a transition for a key: bumps the epoch and records the new
    /// state. Returns the epoch the transition was accepted under.
    fn begin(&self, key: ChunkKey, state: StreamingState) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        self.states.insert(key, StateToken { state, epoch });
        epoch
    }

    fn state_of(&self, key: ChunkKey) -> StreamingState {
        self.states
            .get(&key)
            .map_or(StreamingState::Unloaded, |t| t.state)
    }

    fn bounds_for(&self, key: ChunkKey) -> Aabb {
        let e = self.chunk_extent;
        let min = WorldPoint::new(key.x as f32 * e, key.y as f32 * e, key.z as f32 * e);
        let max = WorldPoint::new(min.x + e, min.y + e, min.z + e);
        Aabb { min, max }
    }

    /// Advisory memory-pressure hooks: fired when usage crosses a threshold
    /// upward after a serviced request. The engine takes no autonomous
    /// action beyond LRU eviction on overflow.
    fn check_pressure(&self) {
        let budget = self.budget.load(Ordering::Relaxed);
        if budget == 0 {
            return;
        }
        let used = self.cache.len();
        let fraction = used as f32 / budget as f32;
        let level = if fraction >= CRITICAL_FRACTION {
            LEVEL_CRITICAL
        } else if fraction >= WARNING_FRACTION {
            LEVEL_WARNING
        } else {
            LEVEL_NORMAL
        };
        let previous = self.pressure_level.swap(level, Ordering::Relaxed);
        if level <= previous {
            return;
        }
        if level == LEVEL_CRITICAL {
            warn!(used, budget, "memory budget critical");
            if let Some(cb) = self.pressure.critical.lock().as_ref() {
                cb(used, budget);
            }
        } else {
            warn!(used, budget, "memory budget warning");
            if let Some(cb) = self.pressure.warning.lock().as_ref() {
                cb(used, budget);
            }
        }
    }
}

/// Orchestrates chunk loads/unloads through the cache under a memory
/// budget, protecting critical chunks and emitting lifecycle events.
pub struct StreamingEngine<E: Send + Sync + 'static> {
    shared: Arc<Shared<E>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: Send + Sync + 'static> StreamingEngine<E> {
    /// Starts the engine: spawns the dispatch thread and the worker pool.
    #[must_use]
    pub fn new(config: StreamingConfig, source: impl ChunkSource<E> + 'static) -> Self {
        let critical = Arc::new(CriticalSet::new());
        let shared = Arc::new(Shared {
            cache: ChunkCache::new(config.memory_budget, Arc::clone(&critical)),
            scheduler: RequestScheduler::new(),
            critical,
            states: DashMap::new(),
            events: EventDispatcher::new(),
            source: Box::new(source),
            budget: AtomicUsize::new(config.memory_budget),
            next_epoch: AtomicU64::new(1),
            counters: Counters::default(),
            pressure: PressureHooks::default(),
            pressure_level: AtomicU8::new(LEVEL_NORMAL),
            running: AtomicBool::new(true),
            chunk_extent: config.chunk_extent,
        });

        let (load_tx, load_rx) = bounded::<LoadTask<E>>(config.queue_capacity.max(1));
        let workers = (0..config.worker_threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                let rx = load_rx.clone();
                std::thread::spawn(move || worker_loop(&shared, &rx))
            })
            .collect();
        let dispatch = {
            let shared = Arc::clone(&shared);
            let poll = config.poll_interval;
            std::thread::spawn(move || dispatch_loop(&shared, &load_tx, poll))
        };

        info!(
            workers = config.worker_threads.max(1),
            budget = config.memory_budget,
            "streaming engine started"
        );
        Self {
            shared,
            dispatch: Mutex::new(Some(dispatch)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a load request; returns immediately.
    ///
    /// The optional callback is invoked with the resident chunk once the
    /// load commits (or immediately at service time if already resident).
    pub fn request_chunk_load(
        &self,
        key: ChunkKey,
        priority: i32,
        callback: Option<LoadCallback<E>>,
    ) -> StreamResult<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(StreamError::EngineShutDown);
        }
        let mut request = ChunkRequest::load(key, priority);
        if let Some(cb) = callback {
            request = request.with_callback(cb);
        }
        self.shared.scheduler.push(request);
        Ok(())
    }

    /// Enqueues an unload request; returns immediately.
    ///
    /// Unloads of protected keys are silently dropped at service time; this
    /// is policy, not an error.
    pub fn request_chunk_unload(&self, key: ChunkKey, priority: i32) -> StreamResult<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(StreamError::EngineShutDown);
        }
        self.shared.scheduler.push(ChunkRequest::unload(key, priority));
        Ok(())
    }

    /// Updates the priority of every queued request for `key`.
    pub fn reprioritize(&self, key: ChunkKey, new_priority: i32) {
        self.shared.scheduler.reprioritize(key, new_priority);
    }

    /// Cancels every queued (not yet dequeued) request for `key`.
    ///
    /// Cannot recall a request already handed to a worker.
    pub fn cancel(&self, key: ChunkKey) {
        self.shared.scheduler.cancel(key);
    }

    /// Atomically replaces the protected-key set.
    ///
    /// Resident chunks gaining protection become un-evictable immediately;
    /// chunks losing it become evictable on the next cache pressure event.
    pub fn set_critical_chunks(&self, keys: impl IntoIterator<Item = ChunkKey>) {
        self.shared.critical.replace(keys);
    }

    /// Checks whether a key is currently protected.
    #[must_use]
    pub fn is_critical(&self, key: ChunkKey) -> bool {
        self.shared.critical.contains(key)
    }

    /// Atomically updates both the logical budget and the cache capacity.
    pub fn set_memory_budget(&self, chunk_count: usize) {
        self.shared.budget.store(chunk_count, Ordering::Relaxed);
        self.shared.cache.set_capacity(chunk_count);
    }

    /// Current memory budget in chunks.
    #[must_use]
    pub fn memory_budget(&self) -> usize {
        self.shared.budget.load(Ordering::Relaxed)
    }

    /// Registers the advisory callback fired when usage crosses 80% of the
    /// budget. Receives `(used, budget)`.
    pub fn on_memory_warning(&self, callback: impl Fn(usize, usize) + Send + Sync + 'static) {
        *self.shared.pressure.warning.lock() = Some(Box::new(callback));
    }

    /// Registers the advisory callback fired when usage crosses 95% of the
    /// budget. Receives `(used, budget)`.
    pub fn on_memory_critical(&self, callback: impl Fn(usize, usize) + Send + Sync + 'static) {
        *self.shared.pressure.critical.lock() = Some(Box::new(callback));
    }

    /// Streaming state of a key as last accepted by the engine.
    #[must_use]
    pub fn state_of(&self, key: ChunkKey) -> StreamingState {
        self.shared.state_of(key)
    }

    /// Resident chunk lookup (marks the entry most-recently-used).
    #[must_use]
    pub fn chunk(&self, key: ChunkKey) -> Option<ChunkHandle<E>> {
        self.shared.cache.get(key)
    }

    /// Event dispatcher shared with the facade.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher<E> {
        &self.shared.events
    }

    /// Registers an event subscriber.
    pub fn subscribe(
        &self,
        kind: StreamEventKind,
        callback: impl Fn(&StreamEvent<E>) + Send + Sync + 'static,
    ) {
        self.shared.events.subscribe(kind, callback);
    }

    /// Chunks currently resident.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.shared.cache.len()
    }

    /// Requests currently queued.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.scheduler.len()
    }

    /// Snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            resident: self.shared.cache.len(),
            queued: self.shared.scheduler.len(),
            loads_completed: self.shared.counters.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.shared.counters.loads_failed.load(Ordering::Relaxed),
            unloads_completed: self
                .shared
                .counters
                .unloads_completed
                .load(Ordering::Relaxed),
            evictions: self.shared.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Stops the dispatch thread and worker pool, joining all threads.
    ///
    /// Pending queued requests are abandoned; in-flight loads finish first.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.scheduler.wake_all();
        if let Some(handle) = self.dispatch.lock().take() {
            let _ = handle.join();
        }
        // The dispatch thread owned the task sender; workers drain and exit.
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        info!("streaming engine stopped");
    }
}

impl<E: Send + Sync + 'static> Drop for StreamingEngine<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop<E: Send + Sync + 'static>(
    shared: &Arc<Shared<E>>,
    load_tx: &Sender<LoadTask<E>>,
    poll: Duration,
) {
    debug!("dispatch thread started");
    while shared.running.load(Ordering::Acquire) {
        let Some(request) = shared.scheduler.pop_timeout(poll) else {
            continue;
        };
        debug!(
            key = %request.key,
            action = ?request.action,
            queued_ms = request.queued_at().elapsed().as_millis() as u64,
            "servicing request"
        );
        match request.action {
            RequestAction::Load => service_load(shared, load_tx, request),
            RequestAction::Unload => service_unload(shared, request.key),
        }
        shared.check_pressure();
    }
    debug!("dispatch thread stopped");
}

fn service_load<E: Send + Sync + 'static>(
    shared: &Arc<Shared<E>>,
    load_tx: &Sender<LoadTask<E>>,
    request: ChunkRequest<E>,
) {
    // Re-validate at service time: a load for an already-resident key
    // completes against the cached chunk without another fetch.
    if let Some(handle) = shared.cache.get(request.key) {
        if let Some(cb) = request.callback {
            cb(handle);
        }
        return;
    }

    let epoch = shared.begin(request.key, StreamingState::Loading);
    shared.events.emit(&StreamEvent::StateChanged {
        key: request.key,
        state: StreamingState::Loading,
    });

    let task = LoadTask {
        key: request.key,
        priority: request.priority,
        epoch,
        callback: request.callback,
    };
    // Bounded send: back-pressure when the pool is saturated, never lost.
    if load_tx.send(task).is_err() {
        warn!(key = %request.key, "worker pool unavailable, dropping load");
    }
}

fn service_unload<E: Send + Sync + 'static>(shared: &Arc<Shared<E>>, key: ChunkKey) {
    if shared.critical.contains(key) {
        debug!(key = %key, "dropping unload request for protected chunk");
        return;
    }

    // Bump the epoch before touching the cache so an in-flight load for the
    // same key discards its result instead of resurrecting the chunk.
    shared.begin(key, StreamingState::Unloading);

    if shared.cache.remove(key).is_some() {
        shared.states.remove(&key);
        shared
            .counters
            .unloads_completed
            .fetch_add(1, Ordering::Relaxed);
        // Removal is one step, but subscribers see the full state sequence.
        shared.events.emit(&StreamEvent::StateChanged {
            key,
            state: StreamingState::Unloading,
        });
        shared.events.emit(&StreamEvent::Unloaded { key });
        shared.events.emit(&StreamEvent::StateChanged {
            key,
            state: StreamingState::Unloaded,
        });
        debug!(key = %key, "chunk unloaded");
    } else {
        // Unload of a non-resident chunk is a no-op, not an error.
        shared.states.remove(&key);
    }
}

fn worker_loop<E: Send + Sync + 'static>(shared: &Arc<Shared<E>>, rx: &Receiver<LoadTask<E>>) {
    while let Ok(task) = rx.recv() {
        let bounds = shared.bounds_for(task.key);
        match shared.source.fetch(task.key, bounds) {
            Ok(entities) => complete_load(shared, task, bounds, entities),
            Err(err) => fail_load(shared, task.key, task.epoch, &err),
        }
        shared.check_pressure();
    }
}

fn complete_load<E: Send + Sync + 'static>(
    shared: &Arc<Shared<E>>,
    task: LoadTask<E>,
    bounds: Aabb,
    entities: Vec<E>,
) {
    let mut chunk = SceneChunk::with_entities(task.key, bounds, entities);
    chunk.metadata.state = StreamingState::Loaded;
    chunk.metadata.priority = task.priority;
    let handle: ChunkHandle<E> = Arc::new(RwLock::new(chunk));

    // Commit only if no other transition for this key was accepted since
    // the load was dispatched. The token flip and the cache insertion happen
    // under the token entry guard as one step: with a gap between them, an
    // unload serviced in the gap would miss the entry and the insertion
    // would resurrect the chunk with no state token. The cache lock is never
    // held while a token is acquired, so the nesting cannot deadlock.
    let evicted = match shared.states.get_mut(&task.key) {
        Some(mut token)
            if token.epoch == task.epoch
                && token.state.can_transition_to(StreamingState::Loaded) =>
        {
            token.state = StreamingState::Loaded;
            shared.cache.put(task.key, Arc::clone(&handle))
        }
        _ => {
            debug!(key = %task.key, "discarding superseded load result");
            return;
        }
    };
    for victim in evicted {
        // Keep the token if the victim is already mid-transition again.
        shared
            .states
            .remove_if(&victim, |_, t| t.state == StreamingState::Loaded);
        shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
        shared.events.emit(&StreamEvent::Unloaded { key: victim });
        shared.events.emit(&StreamEvent::StateChanged {
            key: victim,
            state: StreamingState::Unloaded,
        });
    }

    shared
        .counters
        .loads_completed
        .fetch_add(1, Ordering::Relaxed);
    debug!(key = %task.key, "chunk loaded");

    // Per-request callback runs before subscribers see the event, so facade
    // bookkeeping is in place when they query it.
    if let Some(cb) = task.callback {
        cb(Arc::clone(&handle));
    }
    shared.events.emit(&StreamEvent::Loaded {
        key: task.key,
        chunk: handle,
    });
    shared.events.emit(&StreamEvent::StateChanged {
        key: task.key,
        state: StreamingState::Loaded,
    });
}

fn fail_load<E: Send + Sync + 'static>(
    shared: &Arc<Shared<E>>,
    key: ChunkKey,
    epoch: u64,
    err: &StreamError,
) {
    let current = match shared.states.get(&key) {
        Some(token)
            if token.epoch == epoch && token.state.can_transition_to(StreamingState::Unloaded) =>
        {
            true
        }
        _ => false,
    };
    if !current {
        debug!(key = %key, "ignoring failure of superseded load");
        return;
    }
    // Load-failed transition: revert to unloaded, no cache entry.
    shared.states.remove(&key);
    shared.counters.loads_failed.fetch_add(1, Ordering::Relaxed);
    warn!(key = %key, error = %err, "chunk load failed");
    shared.events.emit(&StreamEvent::LoadFailed {
        key,
        reason: err.to_string(),
    });
    shared.events.emit(&StreamEvent::StateChanged {
        key,
        state: StreamingState::Unloaded,
    });
}
