//! Load-shedding middleware for schedule calls.
//!
//! Rejects calls with `DispatchError::Unavailable` once the number in flight
//! reaches the configured limit.

use std::sync::Arc;
use std::task::{Context, Poll};

use opdispatch_core::TaskToken;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::client::call::ScheduleCall;
use crate::client::ScheduleFuture;
use crate::service::operation::DispatchError;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer limiting in-flight calls via a semaphore.
///
/// Clones share one semaphore, so a single layer applied to every method of a
/// stub enforces a stub-wide limit. Calls over the limit fail immediately
/// instead of queueing.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight as usize)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<ScheduleCall> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            metrics::counter!("opdispatch_client_calls_shed_total").increment(1);
            return Box::pin(async {
                Err(DispatchError::Unavailable(
                    "too many schedule calls in flight".to_string(),
                ))
            });
        };

        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::client::middleware::testing::{make_call, RecordingService};
    use crate::service::operation::ErrorKind;

    #[tokio::test]
    async fn allows_calls_under_limit() {
        let svc = LoadShedLayer::new(10).layer(RecordingService::default());
        assert!(svc.oneshot(make_call("echo")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_when_saturated() {
        let layer = LoadShedLayer::new(1);
        let mut svc = layer.layer(RecordingService::slow(Duration::from_millis(500)));

        let held = ServiceExt::ready(&mut svc).await.unwrap().call(make_call("slow"));
        assert_eq!(layer.available(), 0);

        let err = svc.call(make_call("rejected")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        held.await.unwrap();
        assert_eq!(layer.available(), 1);
    }
}
