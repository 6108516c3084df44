//! Pull-based task queues with long-poll delivery.
//!
//! One queue exists per `(namespace, task_queue)`. A queue holds tokens of
//! operations awaiting a worker plus the pollers currently blocked on it.
//! Enqueueing hands a token straight to the longest-waiting poller when one
//! exists; otherwise the token waits in the pending list. Tokens whose
//! operations were cancelled or timed out in the meantime are skipped at
//! dequeue, since only the registry can decide claimability.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opdispatch_core::{EndpointTarget, TaskToken};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::operation::PolledTask;
use super::registry::OperationRegistry;

type QueueKey = (String, String);

/// Upper bound on a single poll's wait, so the deadline stays representable.
const MAX_POLL_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TaskToken>,
    waiters: VecDeque<oneshot::Sender<TaskToken>>,
    /// Set when the queue was dropped from the map by `prune`. Callers that
    /// still hold it must look the queue up again.
    retired: bool,
}

impl QueueState {
    /// Hands `token` to the longest-waiting live poller, or gives it back.
    fn offer(&mut self, mut token: TaskToken) -> Result<(), TaskToken> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(token) {
                Ok(()) => return Ok(()),
                // Poller gave up; try the next one.
                Err(returned) => token = returned,
            }
        }
        Err(token)
    }
}

/// A poller's registration on a queue.
///
/// Dropping it, including when the poll future itself is dropped, returns a
/// token that was handed over but never claimed to the queue.
struct Waiter<'a> {
    rx: oneshot::Receiver<TaskToken>,
    dispatcher: &'a TaskQueueDispatcher,
    namespace: &'a str,
    task_queue: &'a str,
}

impl Waiter<'_> {
    /// Stops further hand-offs and takes a token that arrived before that.
    fn settle(&mut self) -> Option<TaskToken> {
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.settle() {
            trace!(
                scheduled_event_id = token.scheduled_event_id,
                "returning unclaimed token from abandoned poll"
            );
            self.dispatcher
                .with_queue(self.namespace, self.task_queue, |state| {
                    if let Err(token) = state.offer(token) {
                        state.pending.push_front(token);
                    }
                });
        }
    }
}

/// Routes scheduled operations to polling workers.
pub struct TaskQueueDispatcher {
    queues: DashMap<QueueKey, Arc<Mutex<QueueState>>>,
    registry: Arc<OperationRegistry>,
    closed: watch::Sender<bool>,
}

impl TaskQueueDispatcher {
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            queues: DashMap::new(),
            registry,
            closed,
        }
    }

    /// Makes `token` available on `target`'s queue, waking the
    /// longest-waiting poller if there is one.
    pub fn enqueue(&self, target: &EndpointTarget, token: TaskToken) {
        self.with_queue(&target.namespace, &target.task_queue, |state| {
            match state.offer(token) {
                Ok(()) => trace!(task_queue = %target.task_queue, "token handed to waiting poller"),
                Err(token) => state.pending.push_back(token),
            }
        });
    }

    /// Waits up to `wait` for an operation on the given queue and claims it.
    ///
    /// Returns `None` when the wait elapses or the dispatcher closes. A zero
    /// `wait` only inspects what is already pending. Waits longer than a year
    /// are capped.
    pub async fn poll(&self, namespace: &str, task_queue: &str, wait: Duration) -> Option<PolledTask> {
        let deadline = Instant::now() + wait.min(MAX_POLL_WAIT);
        let mut closed = self.closed.subscribe();

        loop {
            if *closed.borrow_and_update() {
                return None;
            }

            let registered = self.with_queue(namespace, task_queue, |state| {
                while let Some(token) = state.pending.pop_front() {
                    if let Some(task) = self.registry.claim(&token) {
                        return Err(Some(task));
                    }
                    trace!(
                        scheduled_event_id = token.scheduled_event_id,
                        "skipping unclaimable token"
                    );
                }
                if Instant::now() >= deadline {
                    return Err(None);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Ok(rx)
            });
            let mut waiter = match registered {
                Ok(rx) => Waiter {
                    rx,
                    dispatcher: self,
                    namespace,
                    task_queue,
                },
                Err(Some(task)) => return Some(task),
                Err(None) => return empty(namespace, task_queue),
            };

            let handed = tokio::select! {
                handed = &mut waiter.rx => handed.ok(),
                () = tokio::time::sleep_until(deadline) => None,
                _ = closed.changed() => None,
            };

            // A token may have been handed over between the wake-up and now;
            // settling the waiter picks it up.
            let Some(token) = handed.or_else(|| waiter.settle()) else {
                drop(waiter);
                self.with_queue(namespace, task_queue, |state| {
                    state.waiters.retain(|waiter| !waiter.is_closed());
                });
                if Instant::now() >= deadline || *closed.borrow() {
                    return empty(namespace, task_queue);
                }
                continue;
            };

            if let Some(task) = self.registry.claim(&token) {
                return Some(task);
            }
        }
    }

    /// Wakes every blocked poller with an empty result and makes later polls
    /// return immediately.
    pub fn close(&self) {
        self.closed.send_replace(true);
        debug!("task queue dispatcher closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Drops tokens that can no longer be claimed and retires queues left
    /// with neither pending tokens nor live pollers. Returns how many queues
    /// were retired.
    pub fn prune(&self) -> usize {
        let mut retired = 0;
        self.queues.retain(|_, queue| {
            let mut state = queue.lock();
            state.pending.retain(|token| self.registry.is_claimable(token));
            state.waiters.retain(|waiter| !waiter.is_closed());
            if state.pending.is_empty() && state.waiters.is_empty() {
                state.retired = true;
                retired += 1;
                false
            } else {
                true
            }
        });
        retired
    }

    /// Number of queues currently tracked.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Tokens waiting on the queue, including ones that will be skipped.
    #[must_use]
    pub fn queue_depth(&self, namespace: &str, task_queue: &str) -> usize {
        self.existing(namespace, task_queue)
            .map_or(0, |queue| queue.lock().pending.len())
    }

    /// Pollers currently blocked on the queue.
    #[must_use]
    pub fn waiting_pollers(&self, namespace: &str, task_queue: &str) -> usize {
        self.existing(namespace, task_queue).map_or(0, |queue| {
            queue
                .lock()
                .waiters
                .iter()
                .filter(|waiter| !waiter.is_closed())
                .count()
        })
    }

    /// Runs `f` on the live state of a queue, creating the queue if needed.
    fn with_queue<T>(
        &self,
        namespace: &str,
        task_queue: &str,
        f: impl FnOnce(&mut QueueState) -> T,
    ) -> T {
        loop {
            let queue = Arc::clone(
                self.queues
                    .entry((namespace.to_string(), task_queue.to_string()))
                    .or_default()
                    .value(),
            );
            let mut state = queue.lock();
            if !state.retired {
                return f(&mut state);
            }
        }
    }

    fn existing(&self, namespace: &str, task_queue: &str) -> Option<Arc<Mutex<QueueState>>> {
        self.queues
            .get(&(namespace.to_string(), task_queue.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn empty(namespace: &str, task_queue: &str) -> Option<PolledTask> {
    metrics::counter!("opdispatch_poll_empty_total").increment(1);
    trace!(namespace, task_queue, "poll returned empty");
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
