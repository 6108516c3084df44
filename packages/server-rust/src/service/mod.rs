//! Operation dispatch engine.
//!
//! Components, leaves first:
//!
//! 1. **Endpoints** (`endpoint`): endpoint name -> `(namespace, task_queue)`
//! 2. **Registry** (`registry`): operation state machine and history emission
//! 3. **Dispatcher** (`dispatcher`): per-queue pending tokens and long-poll waiters
//! 4. **Timeouts** (`timeout`): deadline timers feeding the expiry worker
//! 5. **Facade** (`dispatch`): `DispatchService`, the boundary used by callers
//!
//! Supporting modules: `config`, `operation` (types and errors), `shutdown`
//! (lifecycle), and `worker` (background task runner).

pub mod config;
pub mod dispatch;
pub mod dispatcher;
pub mod endpoint;
pub mod operation;
pub mod registry;
pub mod shutdown;
pub mod timeout;
pub mod worker;

// Re-export key types for convenient access.
pub use config::DispatchConfig;
pub use dispatch::DispatchService;
pub use dispatcher::TaskQueueDispatcher;
pub use endpoint::EndpointDirectory;
pub use operation::{
    DispatchError, ErrorKind, Operation, OperationOutcome, OperationState, PolledTask,
    ScheduleRequest,
};
pub use registry::OperationRegistry;
pub use shutdown::{HealthState, ShutdownController};
pub use timeout::{ExpiryRunnable, TimeoutSupervisor};
pub use worker::{BackgroundRunnable, BackgroundWorker};
