//! Thread-safe priority queue of pending chunk load/unload requests.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use strata_common::ChunkKey;

use crate::chunk::ChunkHandle;

/// What a queued request asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    /// Bring the chunk into residency
    Load,
    /// Remove the chunk from residency
    Unload,
}

/// Completion callback for a load request, invoked with the resident chunk.
pub type LoadCallback<E> = Box<dyn FnOnce(ChunkHandle<E>) + Send>;

/// A pending load/unload request.
///
/// Owned by the scheduler from enqueue until dequeue; priority and
/// cancellation are mutated only through scheduler operations.
pub struct ChunkRequest<E> {
    /// Target chunk
    pub key: ChunkKey,
    /// Requested transition
    pub action: RequestAction,
    /// Lower value = served first
    pub priority: i32,
    /// Optional completion callback (loads only)
    pub callback: Option<LoadCallback<E>>,
    /// FIFO tiebreak within a priority tier, assigned at enqueue
    seq: u64,
    /// Enqueue time, kept for diagnostics
    queued_at: Instant,
}

impl<E> ChunkRequest<E> {
    /// Creates a load request.
    #[must_use]
    pub fn load(key: ChunkKey, priority: i32) -> Self {
        Self::new(key, RequestAction::Load, priority)
    }

    /// Creates an unload request.
    #[must_use]
    pub fn unload(key: ChunkKey, priority: i32) -> Self {
        Self::new(key, RequestAction::Unload, priority)
    }

    fn new(key: ChunkKey, action: RequestAction, priority: i32) -> Self {
        Self {
            key,
            action,
            priority,
            callback: None,
            seq: 0,
            queued_at: Instant::now(),
        }
    }

    /// Attaches a completion callback.
    #[must_use]
    pub fn with_callback(mut self, callback: LoadCallback<E>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Time this request was enqueued.
    #[must_use]
    pub fn queued_at(&self) -> Instant {
        self.queued_at
    }
}

impl<E> std::fmt::Debug for ChunkRequest<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRequest")
            .field("key", &self.key)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

// Ordering is (priority, seq): min-priority first, FIFO within a tier.
// `seq` is unique per scheduler, so the order is total.
impl<E> PartialEq for ChunkRequest<E> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<E> Eq for ChunkRequest<E> {}

impl<E> PartialOrd for ChunkRequest<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ChunkRequest<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct SchedulerInner<E> {
    heap: BinaryHeap<Reverse<ChunkRequest<E>>>,
    next_seq: u64,
}

/// Min-priority queue over [`ChunkRequest`], guarded by a single lock.
///
/// A condvar wakes the dispatch thread on enqueue, so [`Self::pop_timeout`]
/// parks instead of spinning; the timeout bounds shutdown latency.
pub struct RequestScheduler<E> {
    inner: Mutex<SchedulerInner<E>>,
    available: Condvar,
}

impl<E> Default for RequestScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RequestScheduler<E> {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a request and wakes one waiting consumer.
    pub fn push(&self, mut request: ChunkRequest<E>) {
        let mut inner = self.inner.lock();
        request.seq = inner.next_seq;
        request.queued_at = Instant::now();
        inner.next_seq += 1;
        inner.heap.push(Reverse(request));
        drop(inner);
        self.available.notify_one();
    }

    /// Removes and returns the lowest-priority-value request, if any.
    #[must_use]
    pub fn pop(&self) -> Option<ChunkRequest<E>> {
        self.inner.lock().heap.pop().map(|Reverse(r)| r)
    }

    /// Like [`Self::pop`], but parks up to `timeout` waiting for a request.
    #[must_use]
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ChunkRequest<E>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(Reverse(request)) = inner.heap.pop() {
                return Some(request);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return inner.heap.pop().map(|Reverse(r)| r);
            }
        }
    }

    /// Updates the priority of every queued request matching `key` and
    /// restores heap order. No-op if the key is not queued.
    ///
    /// Linear scan under the lock; the queue is bounded by the viewer
    /// neighborhood, not the whole world.
    pub fn reprioritize(&self, key: ChunkKey, new_priority: i32) {
        let mut inner = self.inner.lock();
        let mut items: Vec<_> = inner.heap.drain().collect();
        for Reverse(request) in &mut items {
            if request.key == key {
                request.priority = new_priority;
            }
        }
        inner.heap.extend(items);
    }

    /// Removes every queued request matching `key` without servicing it.
    pub fn cancel(&self, key: ChunkKey) {
        let mut inner = self.inner.lock();
        let items: Vec<_> = inner.heap.drain().collect();
        inner
            .heap
            .extend(items.into_iter().filter(|Reverse(r)| r.key != key));
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Wakes all parked consumers (used at shutdown).
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: i32) -> ChunkKey {
        ChunkKey::new(n, 0, 0)
    }

    #[test]
    fn test_pop_empty_is_none() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn test_priority_order() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        scheduler.push(ChunkRequest::load(key(1), 5));
        scheduler.push(ChunkRequest::load(key(2), 1));
        scheduler.push(ChunkRequest::load(key(3), 3));

        assert_eq!(scheduler.pop().expect("queued").key, key(2));
        assert_eq!(scheduler.pop().expect("queued").key, key(3));
        assert_eq!(scheduler.pop().expect("queued").key, key(1));
    }

    #[test]
    fn test_fifo_within_priority_tier() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        for n in 0..5 {
            scheduler.push(ChunkRequest::load(key(n), 7));
        }
        for n in 0..5 {
            assert_eq!(scheduler.pop().expect("queued").key, key(n));
        }
    }

    #[test]
    fn test_reprioritize_reorders() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        scheduler.push(ChunkRequest::load(key(1), 1));
        scheduler.push(ChunkRequest::load(key(2), 2));

        scheduler.reprioritize(key(2), 0);
        assert_eq!(scheduler.pop().expect("queued").key, key(2));
        assert_eq!(scheduler.pop().expect("queued").key, key(1));
    }

    #[test]
    fn test_reprioritize_unknown_key_is_noop() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        scheduler.push(ChunkRequest::load(key(1), 1));
        scheduler.reprioritize(key(9), 0);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pop().expect("queued").key, key(1));
    }

    #[test]
    fn test_cancel_removes_all_matching() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        scheduler.push(ChunkRequest::load(key(1), 1));
        scheduler.push(ChunkRequest::unload(key(1), 2));
        scheduler.push(ChunkRequest::load(key(2), 3));

        scheduler.cancel(key(1));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pop().expect("queued").key, key(2));
    }

    #[test]
    fn test_pop_timeout_empty_times_out() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        let start = Instant::now();
        assert!(scheduler.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_push_wakes_waiting_pop() {
        use std::sync::Arc;
        let scheduler: Arc<RequestScheduler<u32>> = Arc::new(RequestScheduler::new());
        let consumer = Arc::clone(&scheduler);
        let handle = std::thread::spawn(move || consumer.pop_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        scheduler.push(ChunkRequest::load(key(1), 0));
        let popped = handle.join().expect("consumer thread");
        assert_eq!(popped.expect("woken with request").key, key(1));
    }

    #[test]
    fn test_mixed_actions_share_ordering() {
        let scheduler: RequestScheduler<u32> = RequestScheduler::new();
        scheduler.push(ChunkRequest::unload(key(1), 2));
        scheduler.push(ChunkRequest::load(key(2), 1));

        let first = scheduler.pop().expect("queued");
        assert_eq!(first.action, RequestAction::Load);
        let second = scheduler.pop().expect("queued");
        assert_eq!(second.action, RequestAction::Unload);
    }
}
