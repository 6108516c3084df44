#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use opdispatch_core::{EventType, ExecutionId};
use opdispatch_server::history::InMemoryHistory;
use opdispatch_server::service::{DispatchConfig, DispatchService, ScheduleRequest};
use opdispatch_server::traits::HistoryStore;

pub const ENDPOINT: &str = "test-endpoint";
pub const NAMESPACE: &str = "default";
pub const TASK_QUEUE: &str = "test-tq";

pub struct Harness {
    pub dispatch: Arc<DispatchService>,
    pub history: Arc<InMemoryHistory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let history = Arc::new(InMemoryHistory::new());
        let dispatch = Arc::new(DispatchService::new(config, history.clone()));
        dispatch.register_endpoint(ENDPOINT, NAMESPACE, TASK_QUEUE);
        Self { dispatch, history }
    }

    /// Event types recorded for `execution`, in order.
    pub fn event_types(&self, execution: &ExecutionId) -> Vec<EventType> {
        self.history
            .events(execution)
            .iter()
            .map(|event| event.event_type())
            .collect()
    }

    /// Terminal event types recorded for `execution`.
    pub fn terminal_events(&self, execution: &ExecutionId) -> Vec<EventType> {
        self.event_types(execution)
            .into_iter()
            .filter(|event_type| event_type.is_terminal())
            .collect()
    }

    /// Waits until `execution` has a terminal event.
    pub async fn settle(&self, execution: &ExecutionId, timeout: Duration) -> bool {
        self.history
            .wait_for(execution, timeout, |events| {
                events.iter().any(|event| event.event_type().is_terminal())
            })
            .await
    }
}

pub fn execution(n: usize) -> ExecutionId {
    ExecutionId::new(NAMESPACE, format!("wf-{n}"), format!("run-{n}"))
}

pub fn request(execution: &ExecutionId, input: &'static str) -> ScheduleRequest {
    ScheduleRequest::new(execution.clone(), ENDPOINT, "test-service", "test-operation", input)
}
