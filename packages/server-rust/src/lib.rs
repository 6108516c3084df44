//! `opdispatch` server: in-memory operation dispatch engine with long-poll task
//! queues, deadline supervision, and a tower-based client stub pipeline.

pub mod client;
pub mod history;
pub mod service;
pub mod traits;

pub use client::{OperationStub, OperationStubBuilder, ScheduleOptions};
pub use history::InMemoryHistory;
pub use service::{DispatchConfig, DispatchError, DispatchService, ErrorKind, PolledTask, ScheduleRequest};
pub use traits::HistoryStore;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
