//! Schedule-to-close deadline enforcement.
//!
//! Each armed operation owns one tokio timer task. When the deadline passes the
//! timer forwards the token over an mpsc channel to the expiry worker, which
//! drives the registry's forced timeout transition. Timers never touch
//! operation state themselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use opdispatch_core::TaskToken;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dispatcher::TaskQueueDispatcher;
use super::registry::OperationRegistry;
use super::worker::BackgroundRunnable;

// ---------------------------------------------------------------------------
// TimeoutSupervisor
// ---------------------------------------------------------------------------

/// Tracks one deadline timer per operation.
pub struct TimeoutSupervisor {
    timers: DashMap<TaskToken, AbortHandle>,
    expired_tx: mpsc::Sender<TaskToken>,
}

impl TimeoutSupervisor {
    /// Creates a supervisor that reports fired deadlines on `expired_tx`.
    #[must_use]
    pub fn new(expired_tx: mpsc::Sender<TaskToken>) -> Self {
        Self {
            timers: DashMap::new(),
            expired_tx,
        }
    }

    /// Arms a timer for `token` that fires at `deadline`.
    ///
    /// Re-arming an already armed token replaces its timer. Must be called
    /// from within a tokio runtime.
    pub fn arm(&self, token: TaskToken, deadline: Instant) {
        let tx = self.expired_tx.clone();
        let fired = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if tx.send(fired).await.is_err() {
                warn!("expiry channel closed, dropping fired deadline");
            }
        });

        if let Some(previous) = self.timers.insert(token, timer.abort_handle()) {
            previous.abort();
        }
        self.report();
    }

    /// Cancels the timer for `token`. Returns whether one was armed.
    ///
    /// Disarming a timer that already fired only forgets its handle; the
    /// forced transition it requested becomes a no-op on a closed operation.
    pub fn disarm(&self, token: &TaskToken) -> bool {
        let removed = self.timers.remove(token).map(|(_, handle)| handle.abort());
        if removed.is_some() {
            self.report();
        }
        removed.is_some()
    }

    /// Cancels every armed timer.
    pub fn disarm_all(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
        self.report();
    }

    #[must_use]
    pub fn is_armed(&self, token: &TaskToken) -> bool {
        self.timers.contains_key(token)
    }

    /// Number of timers currently armed.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn report(&self) {
        metrics::gauge!("opdispatch_armed_timers").set(self.timers.len() as f64);
    }
}

// ---------------------------------------------------------------------------
// ExpiryRunnable
// ---------------------------------------------------------------------------

/// Background task handler that applies fired deadlines and, on each tick,
/// evicts closed operations past their retention and prunes idle queues.
pub struct ExpiryRunnable {
    registry: Arc<OperationRegistry>,
    dispatcher: Arc<TaskQueueDispatcher>,
    closed_retention: Duration,
}

impl ExpiryRunnable {
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        dispatcher: Arc<TaskQueueDispatcher>,
        closed_retention: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            closed_retention,
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ExpiryRunnable {
    type Task = TaskToken;

    async fn run(&mut self, token: TaskToken) {
        if !self.registry.time_out(&token) {
            debug!(
                execution = %token.execution_id,
                scheduled_event_id = token.scheduled_event_id,
                "deadline fired for closed operation"
            );
        }
    }

    async fn on_tick(&mut self) {
        let evicted = self.registry.evict_closed(self.closed_retention);
        let retired_queues = self.dispatcher.prune();
        if evicted > 0 || retired_queues > 0 {
            debug!(evicted, retired_queues, "expiry sweep");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
