//! Interceptor chain middleware.
//!
//! Interceptors run in registration order before a call reaches the engine.
//! Each may rewrite the call or reject it; the first rejection short-circuits
//! the rest of the chain.

use std::sync::Arc;
use std::task::{Context, Poll};

use opdispatch_core::TaskToken;
use tower::{Layer, Service};

use crate::client::call::ScheduleCall;
use crate::client::ScheduleFuture;
use crate::service::operation::DispatchError;

/// Hook applied to every schedule call made through a stub.
pub trait ScheduleInterceptor: Send + Sync {
    /// Returns the (possibly rewritten) call, or an error to reject it.
    ///
    /// # Errors
    ///
    /// Any error is returned to the caller unchanged.
    fn intercept(&self, call: ScheduleCall) -> Result<ScheduleCall, DispatchError>;
}

impl<F> ScheduleInterceptor for F
where
    F: Fn(ScheduleCall) -> Result<ScheduleCall, DispatchError> + Send + Sync,
{
    fn intercept(&self, call: ScheduleCall) -> Result<ScheduleCall, DispatchError> {
        self(call)
    }
}

#[derive(Clone)]
pub struct InterceptLayer {
    chain: Arc<[Arc<dyn ScheduleInterceptor>]>,
}

impl InterceptLayer {
    #[must_use]
    pub fn new(chain: Vec<Arc<dyn ScheduleInterceptor>>) -> Self {
        Self {
            chain: chain.into(),
        }
    }
}

impl Default for InterceptLayer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = InterceptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptService {
            inner,
            chain: Arc::clone(&self.chain),
        }
    }
}

#[derive(Clone)]
pub struct InterceptService<S> {
    inner: S,
    chain: Arc<[Arc<dyn ScheduleInterceptor>]>,
}

impl<S> Service<ScheduleCall> for InterceptService<S>
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

    fn call(&mut self, call: ScheduleCall) -> Self::Future {
        let intercepted = self
            .chain
            .iter()
            .try_fold(call, |call, interceptor| interceptor.intercept(call));
        match intercepted {
            Ok(call) => Box::pin(self.inner.call(call)),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tower::ServiceExt;

    use super::*;
    use crate::client::middleware::testing::{make_call, RecordingService};
    use crate::service::operation::ErrorKind;

    fn tag(suffix: &'static str) -> Arc<dyn ScheduleInterceptor> {
        Arc::new(move |mut call: ScheduleCall| -> Result<ScheduleCall, DispatchError> {
            let mut input = call.input.to_vec();
            input.extend_from_slice(suffix.as_bytes());
            call.input = Bytes::from(input);
            Ok(call)
        })
    }

    #[tokio::test]
    async fn interceptors_run_in_order() {
        let inner = RecordingService::default();
        let svc = InterceptLayer::new(vec![tag("-a"), tag("-b")]).layer(inner.clone());

        svc.oneshot(make_call("echo")).await.unwrap();
        assert_eq!(&inner.calls()[0].input[..], b"input-a-b");
    }

    #[tokio::test]
    async fn rejection_short_circuits() {
        let inner = RecordingService::default();
        let reject: Arc<dyn ScheduleInterceptor> =
            Arc::new(|_call: ScheduleCall| -> Result<ScheduleCall, DispatchError> {
                Err(DispatchError::FailedPrecondition("blocked".to_string()))
            });
        let svc = InterceptLayer::new(vec![reject, tag("-never")]).layer(inner.clone());

        let err = svc.oneshot(make_call("echo")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(inner.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let inner = RecordingService::default();
        let svc = InterceptLayer::default().layer(inner.clone());
        svc.oneshot(make_call("echo")).await.unwrap();
        assert_eq!(inner.calls().len(), 1);
    }
}
