//! Operation registry: owner of every operation and its state machine.
//!
//! Operations live behind one mutex each inside a sharded `DashMap`, so
//! transitions on one token are linearizable while unrelated tokens never
//! contend. History events for a transition are appended while that token's
//! lock is held, keeping the event order identical to the transition order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use opdispatch_core::{token, EndpointTarget, EventAttributes, ExecutionId, TaskToken};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::operation::{
    DispatchError, Operation, OperationOutcome, OperationState, PolledTask, ScheduleRequest,
};
use super::timeout::TimeoutSupervisor;
use crate::traits::HistoryStore;

type OperationCell = Arc<Mutex<Operation>>;

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// Owns all in-flight and recently closed operations.
///
/// Besides the token-keyed table, a position index maps
/// `(execution, scheduled_event_id)` to the most recent attempt so that
/// workflow-side cancellation can find an operation without its token.
pub struct OperationRegistry {
    operations: DashMap<TaskToken, OperationCell>,
    positions: DashMap<(ExecutionId, i64), TaskToken>,
    history: Arc<dyn HistoryStore>,
    timers: Arc<TimeoutSupervisor>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new(history: Arc<dyn HistoryStore>, timers: Arc<TimeoutSupervisor>) -> Self {
        Self {
            operations: DashMap::new(),
            positions: DashMap::new(),
            history,
            timers,
        }
    }

    /// Records a new operation routed to `target` and returns a snapshot of it.
    ///
    /// Appends `OperationScheduled`, whose event id becomes the token's
    /// `scheduled_event_id`, then arms the deadline timer if the request
    /// carries a timeout. Enqueueing is left to the caller.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidArgument`] if the timeout puts the deadline
    ///   beyond what the clock can represent.
    /// - [`DispatchError::Internal`] if the execution id cannot be encoded
    ///   into a task token.
    ///
    /// Nothing is recorded in either case.
    pub fn schedule(
        &self,
        request: ScheduleRequest,
        target: EndpointTarget,
    ) -> Result<Operation, DispatchError> {
        token::check_encodable(&request.execution_id)?;
        let deadline = request
            .schedule_to_close_timeout
            .map(|timeout| {
                Instant::now().checked_add(timeout).ok_or_else(|| {
                    DispatchError::InvalidArgument(format!(
                        "schedule-to-close timeout {timeout:?} is out of range"
                    ))
                })
            })
            .transpose()?;

        let scheduled_event_id = self.history.append(
            &request.execution_id,
            EventAttributes::OperationScheduled {
                endpoint: request.endpoint.clone(),
                service: request.service.clone(),
                operation: request.operation.clone(),
                input: request.input.to_vec(),
                schedule_to_close_timeout: request.schedule_to_close_timeout,
            },
        );

        let token = TaskToken::new(request.execution_id, scheduled_event_id, 0);
        let task_token = token::encode(&token)?;

        let operation = Operation {
            token: token.clone(),
            task_token,
            endpoint: request.endpoint,
            target,
            service: request.service,
            name: request.operation,
            input: request.input,
            schedule_to_close_deadline: deadline,
            state: OperationState::Scheduled,
            cancel_requested: false,
            claimed: false,
            started: false,
            closed_at: None,
        };

        let cell = Arc::new(Mutex::new(operation));
        let guard = cell.lock();
        self.operations.insert(token.clone(), Arc::clone(&cell));
        self.positions.insert(
            (token.execution_id.clone(), token.scheduled_event_id),
            token.clone(),
        );
        if let Some(deadline) = deadline {
            self.timers.arm(token.clone(), deadline);
        }

        metrics::counter!("opdispatch_operations_scheduled_total").increment(1);
        debug!(
            execution = %token.execution_id,
            scheduled_event_id,
            namespace = %guard.target.namespace,
            task_queue = %guard.target.task_queue,
            "operation scheduled"
        );

        Ok(guard.clone())
    }

    /// Atomically hands the operation to a poller.
    ///
    /// Succeeds only for an unclaimed operation still in `Scheduled`; anything
    /// else (unknown, claimed, cancelled, closed) yields `None`.
    pub fn claim(&self, token: &TaskToken) -> Option<PolledTask> {
        let cell = self.lookup(token)?;
        let mut op = cell.lock();
        if op.state != OperationState::Scheduled || op.claimed {
            return None;
        }
        op.claimed = true;
        Some(PolledTask {
            task_token: op.task_token.clone(),
            service: op.service.clone(),
            operation: op.name.clone(),
            input: op.input.clone(),
        })
    }

    /// Whether `claim` would currently succeed for `token`.
    #[must_use]
    pub fn is_claimable(&self, token: &TaskToken) -> bool {
        self.lookup(token).is_some_and(|cell| {
            let op = cell.lock();
            op.state == OperationState::Scheduled && !op.claimed
        })
    }

    /// Applies a worker-reported outcome.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] if the operation is unknown, evicted, or
    ///   already closed.
    /// - [`DispatchError::FailedPrecondition`] for a second start
    ///   acknowledgement, or a cancellation the workflow never requested.
    pub fn respond(&self, token: &TaskToken, outcome: OperationOutcome) -> Result<(), DispatchError> {
        let Some(cell) = self.lookup(token) else {
            return Err(stale(token, outcome.kind()));
        };
        let mut op = cell.lock();
        if op.state.is_terminal() {
            return Err(stale(token, outcome.kind()));
        }

        let scheduled_event_id = token.scheduled_event_id;
        match outcome {
            OperationOutcome::Completed { result } => {
                self.history.append(
                    &token.execution_id,
                    EventAttributes::OperationCompleted {
                        scheduled_event_id,
                        result: result.to_vec(),
                    },
                );
                self.close(&mut op, OperationState::Completed);
            }
            OperationOutcome::Failed(failure) => {
                self.history.append(
                    &token.execution_id,
                    EventAttributes::OperationFailed {
                        scheduled_event_id,
                        failure,
                    },
                );
                self.close(&mut op, OperationState::Failed);
            }
            OperationOutcome::Started => {
                if op.started {
                    return Err(DispatchError::FailedPrecondition(format!(
                        "operation {scheduled_event_id} already started"
                    )));
                }
                op.started = true;
                if op.state == OperationState::Scheduled {
                    op.state = OperationState::Started;
                }
                self.history.append(
                    &token.execution_id,
                    EventAttributes::OperationStarted { scheduled_event_id },
                );
                debug!(
                    execution = %token.execution_id,
                    scheduled_event_id,
                    state = %op.state,
                    "operation started"
                );
            }
            OperationOutcome::Canceled => {
                if !op.cancel_requested {
                    return Err(DispatchError::FailedPrecondition(format!(
                        "operation {scheduled_event_id} was not asked to cancel"
                    )));
                }
                self.history.append(
                    &token.execution_id,
                    EventAttributes::OperationCanceled { scheduled_event_id },
                );
                self.close(&mut op, OperationState::Canceled);
            }
        }
        Ok(())
    }

    /// Requests cancellation of the latest attempt scheduled at
    /// `scheduled_event_id`.
    ///
    /// An operation no worker has claimed yet is cancelled on the spot. One a
    /// worker is handling moves to `CancelRequested` and waits for the worker
    /// to report. Repeating the request is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if no open operation exists at that
    /// position.
    pub fn request_cancel(
        &self,
        execution: &ExecutionId,
        scheduled_event_id: i64,
    ) -> Result<(), DispatchError> {
        let not_found =
            || DispatchError::not_found(format!("operation {execution}@{scheduled_event_id}"));

        let token = self
            .positions
            .get(&(execution.clone(), scheduled_event_id))
            .map(|entry| entry.value().clone())
            .ok_or_else(not_found)?;
        let cell = self.lookup(&token).ok_or_else(not_found)?;
        let mut op = cell.lock();
        if op.state.is_terminal() {
            return Err(not_found());
        }
        if op.cancel_requested {
            return Ok(());
        }

        op.cancel_requested = true;
        self.history.append(
            execution,
            EventAttributes::OperationCancelRequested { scheduled_event_id },
        );

        if op.state == OperationState::Scheduled && !op.claimed {
            self.history.append(
                execution,
                EventAttributes::OperationCanceled { scheduled_event_id },
            );
            self.close(&mut op, OperationState::Canceled);
        } else {
            op.state = OperationState::CancelRequested;
            debug!(
                execution = %execution,
                scheduled_event_id,
                state = %op.state,
                "cancel requested, waiting on worker"
            );
        }
        Ok(())
    }

    /// Forces an open operation into `TimedOut`.
    ///
    /// Returns `false` when the operation is unknown or already closed.
    pub fn time_out(&self, token: &TaskToken) -> bool {
        let Some(cell) = self.lookup(token) else {
            return false;
        };
        let mut op = cell.lock();
        if op.state.is_terminal() {
            return false;
        }
        self.history.append(
            &token.execution_id,
            EventAttributes::OperationTimedOut {
                scheduled_event_id: token.scheduled_event_id,
            },
        );
        self.close(&mut op, OperationState::TimedOut);
        true
    }

    /// Drops closed operations whose `retention` has elapsed. Returns how many
    /// were evicted.
    pub fn evict_closed(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.operations.retain(|token, cell| {
            let expired = cell
                .lock()
                .closed_at
                .is_some_and(|closed_at| closed_at + retention <= now);
            if expired {
                evicted.push(token.clone());
            }
            !expired
        });

        for token in &evicted {
            self.positions.remove_if(
                &(token.execution_id.clone(), token.scheduled_event_id),
                |_, latest| latest == token,
            );
        }
        evicted.len()
    }

    /// Snapshot of the operation identified by `token`.
    #[must_use]
    pub fn get(&self, token: &TaskToken) -> Option<Operation> {
        self.lookup(token).map(|cell| cell.lock().clone())
    }

    /// Snapshot of the latest attempt scheduled at `scheduled_event_id`.
    #[must_use]
    pub fn get_by_position(&self, execution: &ExecutionId, scheduled_event_id: i64) -> Option<Operation> {
        let token = self
            .positions
            .get(&(execution.clone(), scheduled_event_id))
            .map(|entry| entry.value().clone())?;
        self.get(&token)
    }

    /// Number of operations held, open or closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations not yet in a terminal state.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|entry| !entry.value().lock().state.is_terminal())
            .count()
    }

    fn lookup(&self, token: &TaskToken) -> Option<OperationCell> {
        self.operations.get(token).map(|entry| Arc::clone(entry.value()))
    }

    /// Moves `op` into terminal `state`. Caller holds the operation's lock and
    /// has already appended the terminal event.
    fn close(&self, op: &mut Operation, state: OperationState) {
        op.state = state;
        op.closed_at = Some(Instant::now());
        self.timers.disarm(&op.token);
        metrics::counter!("opdispatch_operations_closed_total", "outcome" => state.as_str())
            .increment(1);
        debug!(
            execution = %op.token.execution_id,
            scheduled_event_id = op.token.scheduled_event_id,
            state = %state,
            "operation closed"
        );
    }
}

fn stale(token: &TaskToken, outcome: &'static str) -> DispatchError {
    metrics::counter!("opdispatch_stale_responses_total").increment(1);
    warn!(
        execution = %token.execution_id,
        scheduled_event_id = token.scheduled_event_id,
        outcome,
        "response for unknown or closed operation"
    );
    DispatchError::not_found(format!(
        "operation {}@{}",
        token.execution_id, token.scheduled_event_id
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use opdispatch_core::{EventType, OperationFailure};
    use tokio::sync::mpsc;

    use super::*;
    use crate::history::InMemoryHistory;
    use crate::service::operation::ErrorKind;

    struct Fixture {
        history: Arc<InMemoryHistory>,
        timers: Arc<TimeoutSupervisor>,
        registry: OperationRegistry,
        _expired_rx: mpsc::Receiver<TaskToken>,
    }

    fn fixture() -> Fixture {
        let history = Arc::new(InMemoryHistory::new());
        let (tx, rx) = mpsc::channel(16);
        let timers = Arc::new(TimeoutSupervisor::new(tx));
        let registry = OperationRegistry::new(history.clone(), Arc::clone(&timers));
        Fixture {
            history,
            timers,
            registry,
            _expired_rx: rx,
        }
    }

    fn execution() -> ExecutionId {
        ExecutionId::new("ns", "wf", "run")
    }

    fn request() -> ScheduleRequest {
        ScheduleRequest::new(execution(), "endpoint", "service", "operation", "input")
    }

    fn target() -> EndpointTarget {
        EndpointTarget::new("ns", "tq")
    }

    fn schedule(f: &Fixture) -> TaskToken {
        f.registry.schedule(request(), target()).unwrap().token
    }

    #[test]
    fn schedule_records_event_and_mints_token() {
        let f = fixture();
        let op = f.registry.schedule(request(), target()).unwrap();

        assert_eq!(op.state, OperationState::Scheduled);
        assert_eq!(op.token.scheduled_event_id, 1);
        assert_eq!(op.token.attempt, 0);
        assert_eq!(token::decode(&op.task_token).unwrap(), op.token);
        assert_eq!(f.history.count(&execution(), EventType::OperationScheduled), 1);
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn unencodable_execution_records_nothing() {
        let f = fixture();
        let huge = ExecutionId::new("ns", "w".repeat(70_000), "run");
        let req = ScheduleRequest::new(huge.clone(), "ep", "svc", "op", "");

        let err = f.registry.schedule(req, target()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(f.history.events(&huge).is_empty());
        assert!(f.registry.is_empty());
    }

    #[test]
    fn out_of_range_timeout_records_nothing() {
        let f = fixture();
        let req = request().with_timeout(Duration::MAX);

        let err = f.registry.schedule(req, target()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(f.history.events(&execution()).is_empty());
        assert!(f.registry.is_empty());
        assert_eq!(f.timers.armed_count(), 0);
    }

    #[test]
    fn claimability_tracks_claim_and_cancel() {
        let f = fixture();
        let claimed = schedule(&f);
        let cancelled = schedule(&f);
        assert!(f.registry.is_claimable(&claimed));

        f.registry.claim(&claimed).unwrap();
        f.registry
            .request_cancel(&execution(), cancelled.scheduled_event_id)
            .unwrap();
        assert!(!f.registry.is_claimable(&claimed));
        assert!(!f.registry.is_claimable(&cancelled));
        assert!(!f.registry.is_claimable(&TaskToken::new(execution(), 999, 0)));
    }

    #[test]
    fn claim_is_exclusive() {
        let f = fixture();
        let token = schedule(&f);

        let task = f.registry.claim(&token).unwrap();
        assert_eq!(task.input, Bytes::from_static(b"input"));
        assert_eq!(task.operation, "operation");
        assert!(f.registry.claim(&token).is_none());
    }

    #[test]
    fn sync_completion_closes_operation() {
        let f = fixture();
        let token = schedule(&f);
        f.registry.claim(&token).unwrap();

        f.registry
            .respond(
                &token,
                OperationOutcome::Completed {
                    result: Bytes::from_static(b"input"),
                },
            )
            .unwrap();

        let op = f.registry.get(&token).unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert!(op.closed_at.is_some());
        let completed = f.history.events_of_type(&execution(), EventType::OperationCompleted);
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].attributes,
            EventAttributes::OperationCompleted {
                scheduled_event_id: 1,
                result: b"input".to_vec(),
            }
        );
    }

    #[test]
    fn second_respond_is_not_found_without_event() {
        let f = fixture();
        let token = schedule(&f);
        let failure = OperationFailure::new("BAD_REQUEST", "deliberate error");

        f.registry
            .respond(&token, OperationOutcome::Failed(failure.clone()))
            .unwrap();
        let before = f.history.events(&execution()).len();

        let err = f
            .registry
            .respond(&token, OperationOutcome::Failed(failure))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.history.events(&execution()).len(), before);
    }

    #[test]
    fn respond_unknown_token_is_not_found() {
        let f = fixture();
        let ghost = TaskToken::new(execution(), 99, 0);
        let err = f.registry.respond(&ghost, OperationOutcome::Started).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn async_start_then_completion() {
        let f = fixture();
        let token = schedule(&f);
        f.registry.claim(&token).unwrap();

        f.registry.respond(&token, OperationOutcome::Started).unwrap();
        assert_eq!(f.registry.get(&token).unwrap().state, OperationState::Started);

        let err = f.registry.respond(&token, OperationOutcome::Started).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

        f.registry
            .respond(&token, OperationOutcome::Completed { result: Bytes::new() })
            .unwrap();
        let types: Vec<_> = f
            .history
            .events(&execution())
            .iter()
            .map(opdispatch_core::HistoryEvent::event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::OperationScheduled,
                EventType::OperationStarted,
                EventType::OperationCompleted,
            ]
        );
    }

    #[test]
    fn cancel_before_claim_cancels_immediately() {
        let f = fixture();
        let token = schedule(&f);

        f.registry.request_cancel(&execution(), 1).unwrap();

        let op = f.registry.get(&token).unwrap();
        assert_eq!(op.state, OperationState::Canceled);
        assert!(op.cancel_requested);
        assert_eq!(f.history.count(&execution(), EventType::OperationCancelRequested), 1);
        assert_eq!(f.history.count(&execution(), EventType::OperationCanceled), 1);
        assert_eq!(f.history.count(&execution(), EventType::OperationStarted), 0);
        assert!(f.registry.claim(&token).is_none());
    }

    #[test]
    fn cancel_after_claim_waits_for_worker() {
        let f = fixture();
        let token = schedule(&f);
        f.registry.claim(&token).unwrap();

        f.registry.request_cancel(&execution(), 1).unwrap();
        assert_eq!(
            f.registry.get(&token).unwrap().state,
            OperationState::CancelRequested
        );
        assert_eq!(f.history.count(&execution(), EventType::OperationCanceled), 0);

        // Repeated request emits nothing.
        f.registry.request_cancel(&execution(), 1).unwrap();
        assert_eq!(f.history.count(&execution(), EventType::OperationCancelRequested), 1);

        f.registry.respond(&token, OperationOutcome::Canceled).unwrap();
        assert_eq!(f.registry.get(&token).unwrap().state, OperationState::Canceled);
        assert_eq!(f.history.count(&execution(), EventType::OperationCanceled), 1);
    }

    #[test]
    fn start_after_cancel_request_keeps_cancel_requested() {
        let f = fixture();
        let token = schedule(&f);
        f.registry.claim(&token).unwrap();
        f.registry.request_cancel(&execution(), 1).unwrap();

        f.registry.respond(&token, OperationOutcome::Started).unwrap();

        let op = f.registry.get(&token).unwrap();
        assert_eq!(op.state, OperationState::CancelRequested);
        assert!(op.started);
        assert_eq!(f.history.count(&execution(), EventType::OperationStarted), 1);
    }

    #[test]
    fn unrequested_cancel_is_rejected() {
        let f = fixture();
        let token = schedule(&f);
        let err = f.registry.respond(&token, OperationOutcome::Canceled).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(f.registry.get(&token).unwrap().state, OperationState::Scheduled);
    }

    #[test]
    fn cancel_unknown_or_closed_is_not_found() {
        let f = fixture();
        let err = f.registry.request_cancel(&execution(), 7).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let token = schedule(&f);
        f.registry
            .respond(&token, OperationOutcome::Completed { result: Bytes::new() })
            .unwrap();
        let err = f.registry.request_cancel(&execution(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn time_out_is_first_wins() {
        let f = fixture();
        let token = f
            .registry
            .schedule(request().with_timeout(Duration::from_secs(60)), target())
            .unwrap()
            .token;
        assert!(f.timers.is_armed(&token));

        assert!(f.registry.time_out(&token));
        assert!(!f.registry.time_out(&token));
        assert_eq!(f.timers.armed_count(), 0);

        let err = f
            .registry
            .respond(&token, OperationOutcome::Completed { result: Bytes::new() })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.history.count(&execution(), EventType::OperationTimedOut), 1);
        assert_eq!(f.history.count(&execution(), EventType::OperationCompleted), 0);
    }

    #[tokio::test]
    async fn every_terminal_path_disarms() {
        let f = fixture();
        let timed = || request().with_timeout(Duration::from_secs(60));

        let completed = f.registry.schedule(timed(), target()).unwrap().token;
        let failed = f.registry.schedule(timed(), target()).unwrap().token;
        let canceled = f.registry.schedule(timed(), target()).unwrap().token;
        assert_eq!(f.timers.armed_count(), 3);

        f.registry
            .respond(&completed, OperationOutcome::Completed { result: Bytes::new() })
            .unwrap();
        f.registry
            .respond(&failed, OperationOutcome::Failed(OperationFailure::new("E", "m")))
            .unwrap();
        f.registry
            .request_cancel(&execution(), canceled.scheduled_event_id)
            .unwrap();

        assert_eq!(f.timers.armed_count(), 0);
        assert_eq!(f.registry.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_respects_retention() {
        let f = fixture();
        let open = schedule(&f);
        let closed = schedule(&f);
        f.registry
            .respond(&closed, OperationOutcome::Completed { result: Bytes::new() })
            .unwrap();

        assert_eq!(f.registry.evict_closed(Duration::from_secs(30)), 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(f.registry.evict_closed(Duration::from_secs(30)), 1);

        assert!(f.registry.get(&closed).is_none());
        assert!(f.registry.get(&open).is_some());
        assert!(f
            .registry
            .get_by_position(&execution(), closed.scheduled_event_id)
            .is_none());

        let err = f
            .registry
            .respond(&closed, OperationOutcome::Started)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone, Copy)]
        enum Step {
            Claim,
            Complete,
            Fail,
            Start,
            WorkerCancel,
            RequestCancel,
            TimeOut,
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                Just(Step::Claim),
                Just(Step::Complete),
                Just(Step::Fail),
                Just(Step::Start),
                Just(Step::WorkerCancel),
                Just(Step::RequestCancel),
                Just(Step::TimeOut),
            ]
        }

        proptest! {
            #[test]
            fn any_interleaving_closes_at_most_once(steps in proptest::collection::vec(step(), 1..24)) {
                let f = fixture();
                let token = schedule(&f);

                for step in steps {
                    match step {
                        Step::Claim => {
                            let _ = f.registry.claim(&token);
                        }
                        Step::Complete => {
                            let _ = f.registry.respond(
                                &token,
                                OperationOutcome::Completed { result: Bytes::new() },
                            );
                        }
                        Step::Fail => {
                            let _ = f.registry.respond(
                                &token,
                                OperationOutcome::Failed(OperationFailure::new("E", "m")),
                            );
                        }
                        Step::Start => {
                            let _ = f.registry.respond(&token, OperationOutcome::Started);
                        }
                        Step::WorkerCancel => {
                            let _ = f.registry.respond(&token, OperationOutcome::Canceled);
                        }
                        Step::RequestCancel => {
                            let _ = f.registry.request_cancel(&execution(), token.scheduled_event_id);
                        }
                        Step::TimeOut => {
                            let _ = f.registry.time_out(&token);
                        }
                    }
                }

                let events = f.history.events(&execution());
                let terminal = events.iter().filter(|e| e.event_type().is_terminal()).count();
                let op = f.registry.get(&token).unwrap();
                prop_assert!(terminal <= 1);
                prop_assert_eq!(op.state.is_terminal(), terminal == 1);
                prop_assert!(f.history.count(&execution(), EventType::OperationStarted) <= 1);
                prop_assert!(f.history.count(&execution(), EventType::OperationCancelRequested) <= 1);
                if let Some(last) = events.last() {
                    if op.state.is_terminal() {
                        prop_assert!(last.event_type().is_terminal());
                    }
                }
            }
        }
    }
}
