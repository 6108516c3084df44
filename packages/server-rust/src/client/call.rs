//! Request and option types flowing through the client stub pipeline.

use std::time::Duration;

use bytes::Bytes;
use opdispatch_core::ExecutionId;

use crate::service::operation::ScheduleRequest;

/// Per-call scheduling options.
///
/// Unset fields are filled from less specific layers: call, then method,
/// then stub defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub schedule_to_close_timeout: Option<Duration>,
}

impl ScheduleOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            schedule_to_close_timeout: Some(timeout),
        }
    }

    /// Returns `self` with unset fields taken from `fallback`.
    #[must_use]
    pub fn merge(self, fallback: &Self) -> Self {
        Self {
            schedule_to_close_timeout: self
                .schedule_to_close_timeout
                .or(fallback.schedule_to_close_timeout),
        }
    }
}

/// One invocation of a stub method.
#[derive(Debug, Clone)]
pub struct ScheduleCall {
    pub execution_id: ExecutionId,
    pub endpoint: String,
    pub service: String,
    /// Stub method name; becomes the operation name.
    pub method: String,
    pub input: Bytes,
    pub options: ScheduleOptions,
}

impl From<ScheduleCall> for ScheduleRequest {
    fn from(call: ScheduleCall) -> Self {
        Self {
            execution_id: call.execution_id,
            endpoint: call.endpoint,
            service: call.service,
            operation: call.method,
            input: call.input,
            schedule_to_close_timeout: call.options.schedule_to_close_timeout,
        }
    }
}
