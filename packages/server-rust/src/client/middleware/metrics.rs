//! Metrics middleware for schedule calls.
//!
//! Wraps each call in a `tracing` span and records per-method counters and a
//! duration histogram through the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use opdispatch_core::TaskToken;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::client::call::ScheduleCall;
use crate::client::ScheduleFuture;
use crate::service::operation::DispatchError;

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<ScheduleCall> for MetricsService<S>
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
        let method = call.method.clone();
        let span = info_span!(
            "schedule",
            service = %call.service,
            method = %method,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind().as_str(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "opdispatch_client_calls_total",
                    "method" => method.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("opdispatch_client_call_duration_seconds", "method" => method)
                    .record(elapsed.as_secs_f64());

                result
            }
            .instrument(span),
        )
    }
}
