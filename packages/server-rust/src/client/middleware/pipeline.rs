//! Pipeline composition: stacks every client layer around an inner service.

use std::sync::Arc;

use opdispatch_core::TaskToken;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};

use super::intercept::{InterceptLayer, ScheduleInterceptor};
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::options::OptionsLayer;
use crate::client::call::{ScheduleCall, ScheduleOptions};
use crate::client::BoxScheduleService;
use crate::service::operation::DispatchError;

/// Build one method's pipeline around `inner`.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when saturated, before any other work
/// 2. `OptionsLayer` -- resolve defaults so interceptors see final options
/// 3. `InterceptLayer` -- caller hooks
/// 4. `MetricsLayer` -- timing and outcome, closest to the engine
///
/// `limiter` is cloned by reference, so passing the same layer to every
/// method shares one in-flight budget.
#[must_use]
pub fn build_schedule_pipeline<S>(
    inner: S,
    limiter: &LoadShedLayer,
    options: ScheduleOptions,
    interceptors: &[Arc<dyn ScheduleInterceptor>],
) -> BoxScheduleService
where
    S: Service<ScheduleCall, Response = TaskToken, Error = DispatchError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    let stack = ServiceBuilder::new()
        .layer(limiter.clone())
        .layer(OptionsLayer::new(options))
        .layer(InterceptLayer::new(interceptors.to_vec()))
        .layer(MetricsLayer)
        .service(inner);
    BoxCloneService::new(stack)
}
