//! Workflow execution identity and endpoint routing targets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one workflow execution within a server instance.
///
/// Equality and hashing are structural over all three fields. Values are
/// immutable once constructed; the fields are exposed read-only through
/// accessors so that an `ExecutionId` used as a map key can never drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId {
    namespace: String,
    workflow_id: String,
    run_id: String,
}

impl ExecutionId {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.workflow_id, self.run_id)
    }
}

/// Routing target an endpoint name resolves to.
///
/// Operations addressed to the endpoint are placed on `task_queue` within
/// `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointTarget {
    /// Namespace whose workers poll the target queue.
    pub namespace: String,
    /// Name of the task queue receiving the operations.
    pub task_queue: String,
}

impl EndpointTarget {
    #[must_use]
    pub fn new(namespace: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            task_queue: task_queue.into(),
        }
    }
}
