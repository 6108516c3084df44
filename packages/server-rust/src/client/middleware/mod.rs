//! Tower middleware layers for the client stub pipeline.
//!
//! - [`load_shed`]: Semaphore-based in-flight limiting
//! - [`options`]: Default option resolution
//! - [`intercept`]: Caller-supplied interceptor chain
//! - [`metrics`]: Call timing and counting
//! - [`pipeline`]: Composes all layers around an inner service

pub mod intercept;
pub mod load_shed;
pub mod metrics;
pub mod options;
pub mod pipeline;

pub use intercept::{InterceptLayer, ScheduleInterceptor};
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use options::OptionsLayer;
pub use pipeline::build_schedule_pipeline;
