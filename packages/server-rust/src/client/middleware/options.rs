//! Option resolution middleware.
//!
//! Fills options the caller left unset from the method's resolved defaults,
//! which already combine per-method overrides with stub-wide defaults.

use std::task::{Context, Poll};

use opdispatch_core::TaskToken;
use tower::{Layer, Service};

use crate::client::call::{ScheduleCall, ScheduleOptions};
use crate::client::ScheduleFuture;
use crate::service::operation::DispatchError;

#[derive(Debug, Clone)]
pub struct OptionsLayer {
    defaults: ScheduleOptions,
}

impl OptionsLayer {
    #[must_use]
    pub fn new(defaults: ScheduleOptions) -> Self {
        Self { defaults }
    }
}

impl<S> Layer<S> for OptionsLayer {
    type Service = OptionsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OptionsService {
            inner,
            defaults: self.defaults.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptionsService<S> {
    inner: S,
    defaults: ScheduleOptions,
}

impl<S> Service<ScheduleCall> for OptionsService<S>
where
    S: Service<ScheduleCall, Response = TaskToken, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = TaskToken;
    type Error = DispatchError;
    type Future = ScheduleFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut call: ScheduleCall) -> Self::Future {
        call.options = call.options.merge(&self.defaults);
        Box::pin(self.inner.call(call))
    }
}
