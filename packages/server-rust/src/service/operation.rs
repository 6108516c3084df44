//! Operation types, worker outcomes, and the dispatch error taxonomy.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use opdispatch_core::{EndpointTarget, ExecutionId, OperationFailure, TaskToken, TokenError};
use tokio::time::Instant;

/// Lifecycle state of a dispatched operation.
///
/// State machine:
/// `Scheduled -> (Started) -> Completed | Failed | Canceled | TimedOut`,
/// with `CancelRequested` entered from `Scheduled` or `Started` once a
/// cancellation reaches an operation a worker is already handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// Waiting on a task queue or claimed by a worker that has not answered yet.
    Scheduled,
    /// Worker acknowledged asynchronous handling.
    Started,
    /// Cancellation requested while a worker is engaged.
    CancelRequested,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

impl OperationState {
    /// True once no further transitions are permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::TimedOut
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::CancelRequested => "cancel_requested",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from the workflow side to start an operation.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Execution on whose behalf the operation runs.
    pub execution_id: ExecutionId,
    /// Logical endpoint name, resolved through the endpoint directory.
    pub endpoint: String,
    pub service: String,
    pub operation: String,
    pub input: Bytes,
    /// Overall deadline measured from scheduling. `None` means the operation
    /// may stay pending indefinitely.
    pub schedule_to_close_timeout: Option<Duration>,
}

impl ScheduleRequest {
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        endpoint: impl Into<String>,
        service: impl Into<String>,
        operation: impl Into<String>,
        input: impl Into<Bytes>,
    ) -> Self {
        Self {
            execution_id,
            endpoint: endpoint.into(),
            service: service.into(),
            operation: operation.into(),
            input: input.into(),
            schedule_to_close_timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }
}

/// Snapshot of an operation held by the registry.
#[derive(Debug, Clone)]
pub struct Operation {
    pub token: TaskToken,
    /// Encoded form of `token`, handed to the claiming worker.
    pub task_token: Bytes,
    pub endpoint: String,
    pub target: EndpointTarget,
    pub service: String,
    pub name: String,
    pub input: Bytes,
    pub schedule_to_close_deadline: Option<Instant>,
    pub state: OperationState,
    /// Set at most once, never cleared.
    pub cancel_requested: bool,
    /// Set when a poller dequeued the operation.
    pub claimed: bool,
    /// Set when the worker acknowledged asynchronous handling.
    pub started: bool,
    /// When the operation reached a terminal state.
    pub closed_at: Option<Instant>,
}

/// Result a worker reports for an operation it claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed { result: Bytes },
    Failed(OperationFailure),
    /// The worker will finish the operation asynchronously.
    Started,
    /// The worker honored a cancellation request.
    Canceled,
}

impl OperationOutcome {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed(_) => "failed",
            Self::Started => "started",
            Self::Canceled => "canceled",
        }
    }
}

/// Work handed to a worker by a successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledTask {
    /// Opaque correlation handle to echo back on respond calls.
    pub task_token: Bytes,
    pub service: String,
    pub operation: String,
    pub input: Bytes,
}

/// Coarse error categories, mirroring RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

/// Errors returned by the dispatch engine.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("endpoint not found: {name}")]
    EndpointNotFound { name: String },
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("dispatch service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound { .. } | Self::EndpointNotFound { .. } => ErrorKind::NotFound,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

impl From<TokenError> for DispatchError {
    fn from(err: TokenError) -> Self {
        if err.is_internal() {
            Self::Internal(anyhow::Error::new(err))
        } else {
            Self::InvalidArgument(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        for state in [
            OperationState::Completed,
            OperationState::Failed,
            OperationState::Canceled,
            OperationState::TimedOut,
        ] {
            assert!(state.is_terminal(), "{state} should be terminal");
        }
        for state in [
            OperationState::Scheduled,
            OperationState::Started,
            OperationState::CancelRequested,
        ] {
            assert!(!state.is_terminal(), "{state} should not be terminal");
        }
    }

    #[test]
    fn schedule_request_builder() {
        let req = ScheduleRequest::new(
            ExecutionId::new("ns", "wf", "run"),
            "endpoint",
            "service",
            "operation",
            "input",
        )
        .with_timeout(Duration::from_secs(1));
        assert_eq!(req.input, Bytes::from_static(b"input"));
        assert_eq!(req.schedule_to_close_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn token_decode_errors_map_to_invalid_argument() {
        let err = DispatchError::from(TokenError::Truncated { needed: 3 });
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn token_encode_errors_map_to_internal() {
        let err = DispatchError::from(TokenError::FieldTooLong {
            field: "namespace",
            len: 70_000,
        });
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn routing_miss_is_not_found() {
        let err = DispatchError::EndpointNotFound {
            name: "missing".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "endpoint not found: missing");
    }
}
