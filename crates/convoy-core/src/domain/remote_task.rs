//! Remote task envelope handed to the worker pool

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::step::CorrelationId;

/// Id assigned by the worker pool when a task is queued
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Well-known task types
pub mod task_types {
    /// Run a shell or service command
    pub const COMMAND: &str = "COMMAND";
    /// Fetch values files from a chart repository
    pub const HELM_VALUES_FETCH: &str = "HELM_VALUES_FETCH";
    /// Fetch files from git
    pub const GIT_FETCH_FILES: &str = "GIT_FETCH_FILES";
    /// Install or upgrade a Helm release
    pub const HELM_INSTALL: &str = "HELM_INSTALL";
    /// Read a Helm release history (synchronous)
    pub const HELM_RELEASE_HISTORY: &str = "HELM_RELEASE_HISTORY";
    /// Start one container slot
    pub const CONTAINER_DEPLOY: &str = "CONTAINER_DEPLOY";
}

/// Unit of work sent to an external worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    /// Resumption key
    pub correlation_id: CorrelationId,
    /// Task type understood by the worker
    pub task_type: String,
    /// Ordered, heterogeneous parameters
    pub parameters: Vec<Value>,
    /// Opaque key/value pairs used by the pool to pick a worker
    pub routing: BTreeMap<String, String>,
    /// How long the worker may take
    pub timeout: Duration,
    /// Whether the task is executed asynchronously
    pub is_async: bool,
}

impl RemoteTask {
    /// Start building a task
    pub fn builder(task_type: impl Into<String>, correlation_id: CorrelationId) -> RemoteTaskBuilder {
        RemoteTaskBuilder {
            task: RemoteTask {
                correlation_id,
                task_type: task_type.into(),
                parameters: Vec::new(),
                routing: BTreeMap::new(),
                timeout: Duration::from_secs(600),
                is_async: true,
            },
        }
    }
}

/// Builder for [`RemoteTask`]
#[derive(Debug)]
pub struct RemoteTaskBuilder {
    task: RemoteTask,
}

impl RemoteTaskBuilder {
    /// Append a parameter
    pub fn parameter(mut self, value: Value) -> Self {
        self.task.parameters.push(value);
        self
    }

    /// Add a routing abstraction; empty values are skipped
    pub fn route(mut self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            let value = value.into();
            if !value.is_empty() {
                self.task.routing.insert(key.into(), value);
            }
        }
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.task.timeout = timeout;
        self
    }

    /// Mark the task as synchronous
    pub fn synchronous(mut self) -> Self {
        self.task.is_async = false;
        self
    }

    /// Finish
    pub fn build(self) -> RemoteTask {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_skips_empty_routes() {
        let task = RemoteTask::builder(task_types::COMMAND, CorrelationId("a1".into()))
            .parameter(json!("echo hi"))
            .route("app_id", Some("app"))
            .route("env_id", Some(""))
            .route("infra_mapping_id", None::<String>)
            .timeout(Duration::from_secs(30))
            .build();

        assert_eq!(task.routing.len(), 1);
        assert_eq!(task.routing.get("app_id").map(String::as_str), Some("app"));
        assert_eq!(task.timeout, Duration::from_secs(30));
        assert!(task.is_async);
    }
}
