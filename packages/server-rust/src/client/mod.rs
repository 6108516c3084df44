//! Client stub pipeline for workflow-side callers.
//!
//! A stub is declared once per (endpoint, service) with its methods, default
//! options, and interceptors, then built into a static dispatch table of tower
//! services. Each method's service is the composed stack:
//!
//! 1. [`middleware::LoadShedLayer`]: reject when too many calls are in flight
//! 2. [`middleware::OptionsLayer`]: fill unset options from method and stub defaults
//! 3. [`middleware::InterceptLayer`]: let interceptors rewrite or reject the call
//! 4. [`middleware::MetricsLayer`]: timing, counting, and tracing spans
//! 5. [`ScheduleHandler`]: schedule on the dispatch engine

use std::future::Future;
use std::pin::Pin;

use opdispatch_core::TaskToken;

use crate::service::operation::DispatchError;

pub mod call;
pub mod handler;
pub mod middleware;
pub mod stub;

pub use call::{ScheduleCall, ScheduleOptions};
pub use handler::ScheduleHandler;
pub use middleware::ScheduleInterceptor;
pub use stub::{OperationStub, OperationStubBuilder};

/// Future returned by every service in the stub pipeline.
pub type ScheduleFuture = Pin<Box<dyn Future<Output = Result<TaskToken, DispatchError>> + Send>>;

/// Type-erased, cloneable pipeline for one stub method.
pub type BoxScheduleService = tower::util::BoxCloneService<ScheduleCall, TaskToken, DispatchError>;
