//! Single-task background loop fed by an mpsc channel plus a periodic tick.
//!
//! The dispatch engine runs one of these for deadline expiry: timer tasks push
//! fired tokens into the channel, and the tick drives retention sweeps.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

// ---------------------------------------------------------------------------
// BackgroundRunnable
// ---------------------------------------------------------------------------

/// Handler driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Handles one item received on the channel.
    async fn run(&mut self, task: Self::Task);

    /// Periodic housekeeping. No-op unless overridden.
    async fn on_tick(&mut self) {}

    /// Runs once after the loop exits, whatever the reason.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Owns the spawned loop for a [`BackgroundRunnable`].
///
/// The caller creates the channel, so producers can hold senders before the
/// worker starts. The loop ends when [`BackgroundWorker::stop`] is called or
/// every sender is gone.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    sender: Option<mpsc::Sender<R::Task>>,
    stop: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the loop. `tick_ms` is clamped to at least one millisecond.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        runnable: R,
        sender: mpsc::Sender<R::Task>,
        receiver: mpsc::Receiver<R::Task>,
        tick_ms: u64,
    ) -> Self {
        let (stop, stopped) = oneshot::channel();
        let period = Duration::from_millis(tick_ms.max(1));
        let join = tokio::spawn(drive(runnable, receiver, stopped, period));

        Self {
            sender: Some(sender),
            stop: Some(stop),
            join: Some(join),
        }
    }

    /// Queues a task for the loop.
    ///
    /// # Errors
    ///
    /// Fails once the worker has been stopped or its loop has exited.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let Some(sender) = &self.sender else {
            anyhow::bail!("background worker stopped");
        };
        sender
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("background worker loop exited"))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Signals the loop to exit and waits for `shutdown` to complete.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.sender = None;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

async fn drive<R: BackgroundRunnable>(
    mut runnable: R,
    mut receiver: mpsc::Receiver<R::Task>,
    mut stopped: oneshot::Receiver<()>,
    period: Duration,
) {
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            task = receiver.recv() => match task {
                Some(task) => runnable.run(task).await,
                None => break,
            },
            _ = ticks.tick() => runnable.on_tick().await,
        }
    }

    trace!("background worker loop exiting");
    runnable.shutdown().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
