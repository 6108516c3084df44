//! `DispatchService`: the boundary of the operation dispatch engine.
//!
//! Composes the endpoint directory, operation registry, task queue
//! dispatcher, and timeout supervisor, and owns the expiry worker and the
//! service lifecycle. Workflow-side callers use `schedule` and
//! `request_cancel`; workers use `poll_task` and the `respond_*` family.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use opdispatch_core::{EndpointTarget, ExecutionId, OperationFailure, TaskToken};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use super::config::DispatchConfig;
use super::dispatcher::TaskQueueDispatcher;
use super::endpoint::EndpointDirectory;
use super::operation::{DispatchError, Operation, OperationOutcome, PolledTask, ScheduleRequest};
use super::registry::OperationRegistry;
use super::shutdown::{HealthState, ShutdownController};
use super::timeout::{ExpiryRunnable, TimeoutSupervisor};
use super::worker::BackgroundWorker;
use crate::traits::HistoryStore;

/// In-memory operation dispatch engine.
pub struct DispatchService {
    config: DispatchConfig,
    endpoints: EndpointDirectory,
    registry: Arc<OperationRegistry>,
    dispatcher: Arc<TaskQueueDispatcher>,
    timers: Arc<TimeoutSupervisor>,
    lifecycle: ShutdownController,
    expiry: Mutex<BackgroundWorker<ExpiryRunnable>>,
}

impl DispatchService {
    /// Wires the engine around `history` and moves it to `Ready`.
    ///
    /// Spawns the expiry worker, so this must be called from within a tokio
    /// runtime.
    #[must_use]
    pub fn new(config: DispatchConfig, history: Arc<dyn HistoryStore>) -> Self {
        let lifecycle = ShutdownController::new();

        let (expired_tx, expired_rx) = mpsc::channel(config.expiry_channel_capacity.max(1));
        let timers = Arc::new(TimeoutSupervisor::new(expired_tx.clone()));
        let registry = Arc::new(OperationRegistry::new(history, Arc::clone(&timers)));
        let dispatcher = Arc::new(TaskQueueDispatcher::new(Arc::clone(&registry)));
        let expiry = BackgroundWorker::start(
            ExpiryRunnable::new(
                Arc::clone(&registry),
                Arc::clone(&dispatcher),
                config.closed_retention,
            ),
            expired_tx,
            expired_rx,
            config.sweep_interval_ms.max(1),
        );

        lifecycle.set_ready();
        Self {
            config,
            endpoints: EndpointDirectory::new(),
            registry,
            dispatcher,
            timers,
            lifecycle,
            expiry: Mutex::new(expiry),
        }
    }

    /// Routes operations addressed to `name` onto `(namespace, task_queue)`.
    pub fn register_endpoint(
        &self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        task_queue: impl Into<String>,
    ) {
        self.endpoints
            .register(name, EndpointTarget::new(namespace, task_queue));
    }

    /// Schedules an operation and returns its token.
    ///
    /// The operation becomes visible to pollers of the endpoint's task queue
    /// immediately, and its deadline timer is armed when a timeout is given.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Unavailable`] once shutdown has begun.
    /// - [`DispatchError::InvalidArgument`] for an empty service or operation name.
    /// - [`DispatchError::EndpointNotFound`] for an unregistered endpoint; no
    ///   operation or history event is created.
    /// - [`DispatchError::Internal`] if no task token can be minted.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<TaskToken, DispatchError> {
        if !self.lifecycle.health_state().accepts_work() {
            return Err(DispatchError::Unavailable(
                "dispatch service is not accepting operations".to_string(),
            ));
        }
        if request.service.is_empty() || request.operation.is_empty() {
            return Err(DispatchError::InvalidArgument(
                "service and operation names must be non-empty".to_string(),
            ));
        }

        let target = self.endpoints.resolve(&request.endpoint)?;
        let operation = self.registry.schedule(request, target)?;
        self.dispatcher.enqueue(&operation.target, operation.token.clone());
        Ok(operation.token)
    }

    /// Requests cancellation of the operation scheduled at
    /// `scheduled_event_id` in `execution`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if no open operation exists there.
    pub fn request_cancel(
        &self,
        execution: &ExecutionId,
        scheduled_event_id: i64,
    ) -> Result<(), DispatchError> {
        self.registry.request_cancel(execution, scheduled_event_id)
    }

    /// Long-polls a task queue for work.
    ///
    /// `wait` defaults to the configured poll wait. Returns `Ok(None)` when the
    /// wait elapses or the service shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidArgument`] for an empty namespace or
    /// task queue name.
    pub async fn poll_task(
        &self,
        namespace: &str,
        task_queue: &str,
        wait: Option<Duration>,
    ) -> Result<Option<PolledTask>, DispatchError> {
        if namespace.is_empty() || task_queue.is_empty() {
            return Err(DispatchError::InvalidArgument(
                "namespace and task queue must be non-empty".to_string(),
            ));
        }
        if !self.lifecycle.health_state().accepts_work() {
            return Ok(None);
        }

        let _guard = self.lifecycle.poll_guard();
        let wait = wait.unwrap_or(self.config.default_poll_wait);
        Ok(self.dispatcher.poll(namespace, task_queue, wait).await)
    }

    /// Reports a synchronous (or asynchronous, after start) result.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidArgument`] for a malformed token,
    /// [`DispatchError::NotFound`] for an unknown or closed operation.
    pub fn respond_completed(&self, task_token: &[u8], result: impl Into<Bytes>) -> Result<(), DispatchError> {
        self.respond(
            task_token,
            OperationOutcome::Completed {
                result: result.into(),
            },
        )
    }

    /// Reports a failure.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidArgument`] for a malformed token,
    /// [`DispatchError::NotFound`] for an unknown or closed operation.
    pub fn respond_failed(
        &self,
        task_token: &[u8],
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.respond(
            task_token,
            OperationOutcome::Failed(OperationFailure::new(error_type, message)),
        )
    }

    /// Acknowledges that the worker will finish the operation later.
    ///
    /// # Errors
    ///
    /// As [`DispatchService::respond_completed`], plus
    /// [`DispatchError::FailedPrecondition`] if already started.
    pub fn respond_started(&self, task_token: &[u8]) -> Result<(), DispatchError> {
        self.respond(task_token, OperationOutcome::Started)
    }

    /// Confirms that the worker honored a cancellation request.
    ///
    /// # Errors
    ///
    /// As [`DispatchService::respond_completed`], plus
    /// [`DispatchError::FailedPrecondition`] if cancellation was never requested.
    pub fn respond_canceled(&self, task_token: &[u8]) -> Result<(), DispatchError> {
        self.respond(task_token, OperationOutcome::Canceled)
    }

    fn respond(&self, task_token: &[u8], outcome: OperationOutcome) -> Result<(), DispatchError> {
        let token = TaskToken::from_bytes(task_token)?;
        debug!(
            execution = %token.execution_id,
            scheduled_event_id = token.scheduled_event_id,
            outcome = outcome.kind(),
            "worker response"
        );
        self.registry.respond(&token, outcome)
    }

    /// Snapshot of the operation behind `token`.
    #[must_use]
    pub fn operation(&self, token: &TaskToken) -> Option<Operation> {
        self.registry.get(token)
    }

    /// Stops accepting work, releases blocked pollers, and waits up to
    /// `drain_timeout` for in-flight polls to return. Returns whether they
    /// all did. Pending deadline timers are dropped.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        if !self.lifecycle.trigger_shutdown() {
            return self.lifecycle.health_state() == HealthState::Stopped;
        }
        self.dispatcher.close();
        let drained = self.lifecycle.wait_for_drain(drain_timeout).await;

        self.expiry.lock().await.stop().await;
        self.timers.disarm_all();
        info!(
            drained,
            open_operations = self.registry.open_count(),
            "dispatch service shut down"
        );
        drained
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.lifecycle.health_state()
    }

    /// Receiver that flips to `true` when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.lifecycle.shutdown_receiver()
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointDirectory {
        &self.endpoints
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn dispatcher(&self) -> &TaskQueueDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn timers(&self) -> &TimeoutSupervisor {
        &self.timers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
