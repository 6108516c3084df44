//! Innermost service of the stub pipeline: hands calls to the dispatch engine.

use std::sync::Arc;
use std::task::{Context, Poll};

use opdispatch_core::TaskToken;
use tower::Service;

use super::call::ScheduleCall;
use super::ScheduleFuture;
use crate::service::dispatch::DispatchService;
use crate::service::operation::DispatchError;

/// Schedules each call on a shared [`DispatchService`].
#[derive(Clone)]
pub struct ScheduleHandler {
    dispatch: Arc<DispatchService>,
}

impl ScheduleHandler {
    #[must_use]
    pub fn new(dispatch: Arc<DispatchService>) -> Self {
        Self { dispatch }
    }
}

impl Service<ScheduleCall> for ScheduleHandler {
    type Response = TaskToken;
    type Error = DispatchError;
    type Future = ScheduleFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ScheduleCall) -> Self::Future {
        let dispatch = Arc::clone(&self.dispatch);
        Box::pin(async move { dispatch.schedule(call.into()) })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use opdispatch_core::{EventType, ExecutionId};
    use tower::ServiceExt;

    use super::*;
    use crate::client::call::ScheduleOptions;
    use crate::history::InMemoryHistory;
    use crate::service::config::DispatchConfig;

    #[tokio::test]
    async fn schedules_on_dispatch_service() {
        let history = Arc::new(InMemoryHistory::new());
        let dispatch = Arc::new(DispatchService::new(DispatchConfig::default(), history.clone()));
        dispatch.register_endpoint("ep", "ns", "tq");

        let execution = ExecutionId::new("ns", "wf", "run");
        let call = ScheduleCall {
            execution_id: execution.clone(),
            endpoint: "ep".to_string(),
            service: "svc".to_string(),
            method: "echo".to_string(),
            input: Bytes::from_static(b"input"),
            options: ScheduleOptions::default(),
        };

        let token = ScheduleHandler::new(dispatch).oneshot(call).await.unwrap();
        assert_eq!(token.execution_id, execution);
        assert_eq!(history.count(&execution, EventType::OperationScheduled), 1);
    }
}
