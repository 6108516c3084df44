//! Operation stubs: a static method table over composed pipelines.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use opdispatch_core::{ExecutionId, TaskToken};
use tower::{Service, ServiceExt};

use super::call::{ScheduleCall, ScheduleOptions};
use super::handler::ScheduleHandler;
use super::middleware::{build_schedule_pipeline, LoadShedLayer, ScheduleInterceptor};
use super::BoxScheduleService;
use crate::service::dispatch::DispatchService;
use crate::service::operation::DispatchError;

// ---------------------------------------------------------------------------
// OperationStubBuilder
// ---------------------------------------------------------------------------

/// Declares the methods of one (endpoint, service) pair.
///
/// Pipelines are composed once in [`OperationStubBuilder::build`]; calls only
/// look the method up.
pub struct OperationStubBuilder {
    endpoint: String,
    service: String,
    defaults: ScheduleOptions,
    methods: Vec<(String, ScheduleOptions)>,
    interceptors: Vec<Arc<dyn ScheduleInterceptor>>,
    max_in_flight: u32,
}

impl OperationStubBuilder {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service: service.into(),
            defaults: ScheduleOptions::default(),
            methods: Vec::new(),
            interceptors: Vec::new(),
            max_in_flight: 1000,
        }
    }

    /// Options applied to every method unless overridden.
    #[must_use]
    pub fn default_options(mut self, options: ScheduleOptions) -> Self {
        self.defaults = options;
        self
    }

    #[must_use]
    pub fn method(self, name: impl Into<String>) -> Self {
        self.method_with_options(name, ScheduleOptions::default())
    }

    /// Declares a method whose options override the stub defaults.
    #[must_use]
    pub fn method_with_options(mut self, name: impl Into<String>, options: ScheduleOptions) -> Self {
        self.methods.push((name.into(), options));
        self
    }

    /// Appends an interceptor; interceptors run in the order added.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn ScheduleInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Limit of concurrent calls across all methods of the stub.
    #[must_use]
    pub fn max_in_flight(mut self, limit: u32) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Builds a stub that schedules through `dispatch`.
    #[must_use]
    pub fn build(self, dispatch: Arc<DispatchService>) -> OperationStub {
        self.build_with(ScheduleHandler::new(dispatch))
    }

    /// Builds a stub around an arbitrary innermost service.
    #[must_use]
    pub fn build_with<S>(self, inner: S) -> OperationStub
    where
        S: Service<ScheduleCall, Response = TaskToken, Error = DispatchError> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        let limiter = LoadShedLayer::new(self.max_in_flight);
        let methods = self
            .methods
            .into_iter()
            .map(|(name, options)| {
                let pipeline = build_schedule_pipeline(
                    inner.clone(),
                    &limiter,
                    options.merge(&self.defaults),
                    &self.interceptors,
                );
                (name, pipeline)
            })
            .collect();

        OperationStub {
            endpoint: self.endpoint,
            service: self.service,
            methods,
        }
    }
}

// ---------------------------------------------------------------------------
// OperationStub
// ---------------------------------------------------------------------------

/// Workflow-side handle for scheduling the operations of one service.
///
/// Cheap to clone; clones share the in-flight limit.
#[derive(Clone)]
pub struct OperationStub {
    endpoint: String,
    service: String,
    methods: HashMap<String, BoxScheduleService>,
}

impl OperationStub {
    /// Schedules `method` with default options.
    pub fn call(
        &self,
        execution_id: ExecutionId,
        method: &str,
        input: impl Into<Bytes>,
    ) -> impl Future<Output = Result<TaskToken, DispatchError>> + Send + 'static {
        self.dispatch(execution_id, method, input.into(), ScheduleOptions::default())
    }

    /// Schedules `method` with per-call options taking precedence over the
    /// method and stub defaults.
    ///
    /// Resolves to [`DispatchError::FailedPrecondition`] for an undeclared
    /// method.
    pub fn call_with(
        &self,
        execution_id: ExecutionId,
        method: &str,
        input: impl Into<Bytes>,
        options: ScheduleOptions,
    ) -> impl Future<Output = Result<TaskToken, DispatchError>> + Send + 'static {
        self.dispatch(execution_id, method, input.into(), options)
    }

    fn dispatch(
        &self,
        execution_id: ExecutionId,
        method: &str,
        input: Bytes,
        options: ScheduleOptions,
    ) -> impl Future<Output = Result<TaskToken, DispatchError>> + Send + 'static {
        let pipeline = self.methods.get(method).cloned().ok_or_else(|| {
            DispatchError::FailedPrecondition(format!(
                "method {method} is not declared on service {}",
                self.service
            ))
        });
        let call = ScheduleCall {
            execution_id,
            endpoint: self.endpoint.clone(),
            service: self.service.clone(),
            method: method.to_string(),
            input,
            options,
        };
        async move { pipeline?.oneshot(call).await }
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Declared method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
