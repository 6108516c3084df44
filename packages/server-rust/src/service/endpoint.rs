//! Endpoint directory: logical endpoint names to task queue routing targets.

use dashmap::DashMap;
use opdispatch_core::EndpointTarget;
use tracing::info;

use super::operation::DispatchError;

/// Maps endpoint names to the task queue that receives their operations.
///
/// Keys are unique; registering an existing name replaces its target.
#[derive(Debug, Default)]
pub struct EndpointDirectory {
    endpoints: DashMap<String, EndpointTarget>,
}

impl EndpointDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the routing target for `name`.
    pub fn register(&self, name: impl Into<String>, target: EndpointTarget) {
        let name = name.into();
        info!(
            endpoint = %name,
            namespace = %target.namespace,
            task_queue = %target.task_queue,
            "endpoint registered"
        );
        self.endpoints.insert(name, target);
    }

    /// Remove `name`, returning its former target.
    pub fn unregister(&self, name: &str) -> Option<EndpointTarget> {
        self.endpoints.remove(name).map(|(_, target)| target)
    }

    /// Resolve `name` to its routing target.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EndpointNotFound`] for unregistered names.
    pub fn resolve(&self, name: &str) -> Result<EndpointTarget, DispatchError> {
        self.endpoints
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::EndpointNotFound {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
