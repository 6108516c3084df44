//! Dispatch service lifecycle: health state, shutdown signal, and in-flight
//! long-poll tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};
use tracing::info;

/// Lifecycle state of the dispatch service.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Components are being wired; nothing is accepted yet.
    Starting,
    /// Scheduling and polling are accepted.
    Ready,
    /// New schedules are rejected and blocked polls are being released.
    Draining,
    /// Every in-flight poll has returned.
    Stopped,
}

impl HealthState {
    /// Whether new schedule calls are accepted in this state.
    #[must_use]
    pub fn accepts_work(self) -> bool {
        self == Self::Ready
    }
}

/// Coordinates service shutdown.
///
/// 1. Boundary calls check `health_state()` before doing work.
/// 2. Each long-poll holds a [`PollGuard`] while it runs.
/// 3. `trigger_shutdown()` moves to `Draining` and signals every receiver.
/// 4. `wait_for_drain()` resolves once the last guard is dropped.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(InFlight::default()),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
        info!("dispatch service ready");
    }

    /// Receiver that flips to `true` when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and notifies every shutdown receiver.
    ///
    /// Returns `false` if shutdown had already been triggered.
    pub fn trigger_shutdown(&self) -> bool {
        let previous = self.health_state.swap(Arc::new(HealthState::Draining));
        if matches!(*previous, HealthState::Draining | HealthState::Stopped) {
            self.health_state.store(previous);
            return false;
        }
        self.shutdown_signal.send_replace(true);
        info!("dispatch service draining");
        true
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Registers an in-flight poll until the returned guard is dropped.
    #[must_use]
    pub fn poll_guard(&self) -> PollGuard {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        PollGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Waits for all in-flight polls to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once drained; returns `false`
    /// (still `Draining`) if the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let drained = self.in_flight.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                info!("dispatch service stopped");
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker for one in-flight long-poll.
#[derive(Debug)]
pub struct PollGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
