//! De-duplicating, rate-limited work queue
//!
//! Items are opaque keys. The queue guarantees that a key is handed out to at most
//! one worker at a time:
//!
//! - `add` of a key that is already waiting is a no-op
//! - `add` of a key that is being processed marks it dirty; it is queued again when
//!   the worker calls `done`
//! - `get` suspends until a key is available or the queue is shut down and drained
//!
//! Ordering across distinct keys is first-in first-out but callers must not rely on
//! it; delayed adds land whenever their timer fires.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::rate_limit::{ExponentialBackoff, RateLimiter};

struct State<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing: everything in `queue` plus keys re-added in flight
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    ready: Notify,
    limiter: Box<dyn RateLimiter<K>>,
}

/// Cloneable handle to a shared work queue
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a queue with the default exponential failure backoff
    pub fn new() -> Self {
        Self::with_rate_limiter(ExponentialBackoff::default())
    }

    pub fn with_rate_limiter(limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                ready: Notify::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        // Queue state stays consistent across a panicking holder; every mutation is a
        // single collection operation
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `item` as needing processing
    pub fn add(&self, item: K) {
        let mut state = self.state();
        if state.shutting_down {
            trace!("Queue shutting down, ignoring add");
            return;
        }
        if !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            // Redelivered by `done`
            return;
        }
        state.queue.push_back(item);
        drop(state);

        self.shared.ready.notify_one();
    }

    /// Add `item` once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, item: K, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Add `item` after the backoff delay its failure history calls for
    pub fn add_rate_limited(&self, item: K) {
        let delay = self.shared.limiter.when(&item);
        debug!(delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Reset the failure history of `item`
    pub fn forget(&self, item: &K) {
        self.shared.limiter.forget(item);
    }

    /// Failed attempts recorded for `item` since the last `forget`
    pub fn num_requeues(&self, item: &K) -> u32 {
        self.shared.limiter.num_requeues(item)
    }

    /// Wait for the next item.
    ///
    /// The returned item is in flight until `done` is called for it. Returns `None`
    /// once the queue has been shut down and every queued item was handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            // Register before inspecting the state so a concurrent add or shutdown
            // cannot slip in between the check and the wait
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `item`; re-queues it if it was added while in flight
    pub fn done(&self, item: &K) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.ready.notify_one();
        }
    }

    /// Stop accepting new items and release waiting `get` callers once drained.
    /// Calling it more than once has no further effect.
    pub fn shutdown(&self) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        drop(state);

        debug!("Work queue shutting down");
        self.shared.ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
