//! Operation lifecycle events recorded into a workflow execution's history.
//!
//! Every accepted state transition of an operation produces exactly one
//! [`HistoryEvent`]. Events reference the operation by its scheduled event id
//! only; task tokens never appear in history.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One entry in an execution's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Position within the execution's history, starting at 1.
    pub event_id: i64,
    /// Wall-clock milliseconds since Unix epoch at which the event was recorded.
    pub timestamp_ms: u64,
    /// Event payload.
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.attributes.event_type()
    }
}

/// Failure reported by a worker for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    /// Worker-defined error classification (e.g. `"BAD_REQUEST"`).
    pub error_type: String,
    /// Human-readable failure message.
    pub message: String,
}

impl OperationFailure {
    #[must_use]
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Payloads of the operation lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAttributes {
    OperationScheduled {
        endpoint: String,
        service: String,
        operation: String,
        #[serde(with = "serde_bytes")]
        input: Vec<u8>,
        schedule_to_close_timeout: Option<Duration>,
    },
    OperationStarted {
        scheduled_event_id: i64,
    },
    OperationCancelRequested {
        scheduled_event_id: i64,
    },
    OperationCompleted {
        scheduled_event_id: i64,
        #[serde(with = "serde_bytes")]
        result: Vec<u8>,
    },
    OperationFailed {
        scheduled_event_id: i64,
        failure: OperationFailure,
    },
    OperationCanceled {
        scheduled_event_id: i64,
    },
    OperationTimedOut {
        scheduled_event_id: i64,
    },
}

impl EventAttributes {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::OperationScheduled { .. } => EventType::OperationScheduled,
            Self::OperationStarted { .. } => EventType::OperationStarted,
            Self::OperationCancelRequested { .. } => EventType::OperationCancelRequested,
            Self::OperationCompleted { .. } => EventType::OperationCompleted,
            Self::OperationFailed { .. } => EventType::OperationFailed,
            Self::OperationCanceled { .. } => EventType::OperationCanceled,
            Self::OperationTimedOut { .. } => EventType::OperationTimedOut,
        }
    }

    /// The scheduled event id this event refers to, or `None` for the
    /// scheduling event itself (whose own event id plays that role).
    #[must_use]
    pub fn scheduled_event_id(&self) -> Option<i64> {
        match self {
            Self::OperationScheduled { .. } => None,
            Self::OperationStarted { scheduled_event_id }
            | Self::OperationCancelRequested { scheduled_event_id }
            | Self::OperationCompleted {
                scheduled_event_id, ..
            }
            | Self::OperationFailed {
                scheduled_event_id, ..
            }
            | Self::OperationCanceled { scheduled_event_id }
            | Self::OperationTimedOut { scheduled_event_id } => Some(*scheduled_event_id),
        }
    }
}

/// Discriminant of [`EventAttributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OperationScheduled,
    OperationStarted,
    OperationCancelRequested,
    OperationCompleted,
    OperationFailed,
    OperationCanceled,
    OperationTimedOut,
}

impl EventType {
    /// True for events that close an operation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::OperationCompleted
                | Self::OperationFailed
                | Self::OperationCanceled
                | Self::OperationTimedOut
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OperationScheduled => "scheduled",
            Self::OperationStarted => "started",
            Self::OperationCancelRequested => "cancel_requested",
            Self::OperationCompleted => "completed",
            Self::OperationFailed => "failed",
            Self::OperationCanceled => "canceled",
            Self::OperationTimedOut => "timed_out",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_event_types() {
        assert!(EventType::OperationCompleted.is_terminal());
        assert!(EventType::OperationFailed.is_terminal());
        assert!(EventType::OperationCanceled.is_terminal());
        assert!(EventType::OperationTimedOut.is_terminal());
        assert!(!EventType::OperationScheduled.is_terminal());
        assert!(!EventType::OperationStarted.is_terminal());
        assert!(!EventType::OperationCancelRequested.is_terminal());
    }

    #[test]
    fn scheduled_event_id_reference() {
        let scheduled = EventAttributes::OperationScheduled {
            endpoint: "ep".to_string(),
            service: "svc".to_string(),
            operation: "op".to_string(),
            input: b"input".to_vec(),
            schedule_to_close_timeout: None,
        };
        assert_eq!(scheduled.scheduled_event_id(), None);

        let completed = EventAttributes::OperationCompleted {
            scheduled_event_id: 5,
            result: Vec::new(),
        };
        assert_eq!(completed.scheduled_event_id(), Some(5));
        assert_eq!(completed.event_type(), EventType::OperationCompleted);
    }

    #[test]
    fn history_event_msgpack_roundtrip() {
        let event = HistoryEvent {
            event_id: 7,
            timestamp_ms: 1_700_000_000_000,
            attributes: EventAttributes::OperationFailed {
                scheduled_event_id: 5,
                failure: OperationFailure {
                    error_type: "BAD_REQUEST".to_string(),
                    message: "deliberate error".to_string(),
                },
            },
        };
        let bytes = rmp_serde::to_vec(&event).expect("serialize");
        let decoded: HistoryEvent = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, event);
        assert_eq!(decoded.event_type(), EventType::OperationFailed);
    }

    #[test]
    fn scheduled_event_msgpack_roundtrip_with_timeout() {
        let event = HistoryEvent {
            event_id: 1,
            timestamp_ms: 0,
            attributes: EventAttributes::OperationScheduled {
                endpoint: "ep".to_string(),
                service: "service".to_string(),
                operation: "operation".to_string(),
                input: b"input".to_vec(),
                schedule_to_close_timeout: Some(Duration::from_secs(1)),
            },
        };
        let bytes = rmp_serde::to_vec(&event).expect("serialize");
        let decoded: HistoryEvent = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, event);
    }

    #[test]
    fn event_type_display() {
        assert_eq!(EventType::OperationTimedOut.to_string(), "timed_out");
        assert_eq!(EventType::OperationCancelRequested.as_str(), "cancel_requested");
    }
}
