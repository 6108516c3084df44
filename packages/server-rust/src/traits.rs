use opdispatch_core::{EventAttributes, ExecutionId, HistoryEvent};

/// Sink for operation lifecycle events, owned by the workflow history layer.
///
/// The dispatch engine never reads history back to make decisions; it only
/// appends. Implementations must assign event ids that increase strictly per
/// execution and must be safe to call from many tokio tasks at once.
///
/// Used as `Arc<dyn HistoryStore>`.
pub trait HistoryStore: Send + Sync {
    /// Append an event to `execution`'s history and return its event id.
    ///
    /// The first event of an execution receives id 1.
    fn append(&self, execution: &ExecutionId, attributes: EventAttributes) -> i64;

    /// Snapshot of all events recorded for `execution`, in event-id order.
    fn events(&self, execution: &ExecutionId) -> Vec<HistoryEvent>;
}
