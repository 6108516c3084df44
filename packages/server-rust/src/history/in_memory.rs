//! `DashMap`-backed in-memory [`HistoryStore`] implementation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opdispatch_core::{ClockSource, EventAttributes, EventType, ExecutionId, HistoryEvent, SystemClock};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::traits::HistoryStore;

type ExecutionLog = Arc<Mutex<Vec<HistoryEvent>>>;

/// In-memory history store keyed by execution.
///
/// Each execution's log sits behind its own mutex, so appends to different
/// executions never contend. Event ids are assigned under that mutex, which
/// makes them strictly increasing per execution.
///
/// Every append wakes tasks parked in [`InMemoryHistory::wait_for`].
pub struct InMemoryHistory {
    executions: DashMap<ExecutionId, ExecutionLog>,
    clock: Arc<dyn ClockSource>,
    appended: Notify,
}

impl InMemoryHistory {
    /// Creates an empty store stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamped by the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            executions: DashMap::new(),
            clock,
            appended: Notify::new(),
        }
    }

    /// Number of executions with at least one event.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    /// Events of one type recorded for `execution`.
    #[must_use]
    pub fn events_of_type(&self, execution: &ExecutionId, event_type: EventType) -> Vec<HistoryEvent> {
        self.events(execution)
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Count of events of one type recorded for `execution`.
    #[must_use]
    pub fn count(&self, execution: &ExecutionId, event_type: EventType) -> usize {
        self.log(execution).map_or(0, |log| {
            log.lock()
                .iter()
                .filter(|e| e.event_type() == event_type)
                .count()
        })
    }

    /// All events belonging to the operation scheduled at `scheduled_event_id`,
    /// including the scheduling event itself.
    #[must_use]
    pub fn operation_events(&self, execution: &ExecutionId, scheduled_event_id: i64) -> Vec<HistoryEvent> {
        self.events(execution)
            .into_iter()
            .filter(|e| {
                e.attributes
                    .scheduled_event_id()
                    .map_or(e.event_id == scheduled_event_id, |id| id == scheduled_event_id)
            })
            .collect()
    }

    /// Waits until `predicate` holds for `execution`'s history or `timeout`
    /// elapses. Returns whether the predicate was satisfied.
    pub async fn wait_for<F>(&self, execution: &ExecutionId, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[HistoryEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if predicate(&self.events(execution)) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.events(execution));
            }
        }
    }

    fn log(&self, execution: &ExecutionId) -> Option<ExecutionLog> {
        self.executions.get(execution).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for InMemoryHistory {
    fn append(&self, execution: &ExecutionId, attributes: EventAttributes) -> i64 {
        let log = Arc::clone(self.executions.entry(execution.clone()).or_default().value());

        let event_id = {
            let mut events = log.lock();
            #[allow(clippy::cast_possible_wrap)]
            let event_id = events.len() as i64 + 1;
            events.push(HistoryEvent {
                event_id,
                timestamp_ms: self.clock.now(),
                attributes,
            });
            event_id
        };

        self.appended.notify_waiters();
        event_id
    }

    fn events(&self, execution: &ExecutionId) -> Vec<HistoryEvent> {
        self.log(execution)
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }
}
