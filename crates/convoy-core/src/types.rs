//! Core data types shared between the engine and step implementations

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::domain::instance::InstanceElement;
use crate::domain::step::CorrelationId;
use crate::error::ErrorCategory;
use crate::CoreError;

/// Status of a step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Executing and waiting on remote work
    Running,
    /// Suspended until a correlated result or decision arrives
    Paused,
    /// Completed successfully
    Success,
    /// Completed with a failure
    Failed,
    /// Completed with an internal error
    Error,
    /// Skipped
    Skipped,
    /// Aborted by an external request
    Aborted,
    /// Rejected by an approver
    Rejected,
}

impl ExecutionStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running | ExecutionStatus::Paused)
    }

    /// Whether the status is a terminal status other than success or skip
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed
                | ExecutionStatus::Error
                | ExecutionStatus::Aborted
                | ExecutionStatus::Rejected
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Paused => "PAUSED",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Opaque step-defined snapshot, persisted between pause and resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepExecutionData(pub Value);

impl StepExecutionData {
    /// Snapshot a typed value
    pub fn from_typed<T: Serialize>(data: &T) -> Result<Self, CoreError> {
        Ok(StepExecutionData(serde_json::to_value(data)?))
    }

    /// Rebuild a typed value from the snapshot
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

/// Kind of run a step belongs to, used for message wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionKind {
    /// Part of a pipeline
    Pipeline,
    /// Part of a single workflow
    Workflow,
    /// Unknown
    #[default]
    Unknown,
}

/// Deployment technology of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    /// SSH hosts
    Ssh,
    /// WinRM hosts
    Winrm,
    /// Container platform
    Container,
    /// Helm release
    Helm,
    /// Anything else
    Custom,
}

/// Ambient description of the phase a step runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseElement {
    /// Phase display name
    pub phase_name: String,
    /// Deployment technology
    pub phase_type: PhaseType,
    /// Service being deployed
    pub service_id: String,
    /// Infrastructure mapping the phase targets
    pub infra_mapping_id: String,
    /// Artifact being rolled out, if known
    pub artifact_id: Option<String>,
    /// Whether this is a rollback phase
    #[serde(default)]
    pub rollback: bool,
}

/// Run-wide parameters supplied when the workflow was started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowStandardParams {
    /// Explicit host override list for the run
    #[serde(default)]
    pub execution_hosts: Vec<String>,
    /// Skip hosts already running the incoming artifact
    #[serde(default)]
    pub exclude_hosts_with_same_artifact: bool,
    /// User who started the run
    pub current_user: Option<String>,
}

/// Kind selector for [`ContextElement`] lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextElementKind {
    /// Current phase
    Phase,
    /// Standard workflow parameters
    Standard,
    /// Instances published by an upstream step
    Instances,
    /// Named custom element
    Custom(String),
}

/// Contextual element exchanged between steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextElement {
    /// Current phase
    Phase(PhaseElement),
    /// Standard workflow parameters
    Standard(WorkflowStandardParams),
    /// Instances targeted or created by a step
    Instances {
        /// The instances
        instances: Vec<InstanceElement>,
    },
    /// Named custom element
    Custom {
        /// Element name
        name: String,
        /// Element value
        value: Value,
    },
}

impl ContextElement {
    /// Kind of the element
    pub fn kind(&self) -> ContextElementKind {
        match self {
            ContextElement::Phase(_) => ContextElementKind::Phase,
            ContextElement::Standard(_) => ContextElementKind::Standard,
            ContextElement::Instances { .. } => ContextElementKind::Instances,
            ContextElement::Custom { name, .. } => ContextElementKind::Custom(name.clone()),
        }
    }
}

/// Result of a remote task, as delivered by the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteResult {
    /// The task completed; payload is task specific
    Success {
        /// Task output
        payload: Value,
    },
    /// The task raised an error
    Error {
        /// Message reported by the worker
        message: String,
    },
}

impl RemoteResult {
    /// Successful result
    pub fn success(payload: Value) -> Self {
        RemoteResult::Success { payload }
    }

    /// Failed result
    pub fn error(message: impl Into<String>) -> Self {
        RemoteResult::Error {
            message: message.into(),
        }
    }

    /// Payload or the remote failure as an error
    pub fn into_payload(self) -> Result<Value, CoreError> {
        match self {
            RemoteResult::Success { payload } => Ok(payload),
            RemoteResult::Error { message } => Err(CoreError::RemoteExecution(message)),
        }
    }
}

/// Why a paused step is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Explicit external abort
    Manual,
    /// The step's timeout elapsed
    Timeout {
        /// Configured timeout
        configured: Duration,
        /// Time since the step started
        elapsed: Duration,
    },
}

/// Outcome of a step's `execute` or `resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// Status
    pub status: ExecutionStatus,

    /// True iff the step waits on correlated results
    #[serde(rename = "async")]
    pub is_async: bool,

    /// Correlation ids awaited, in dispatch order
    #[serde(default)]
    pub correlation_ids: Vec<CorrelationId>,

    /// Snapshot needed to resume
    pub execution_data: Option<StepExecutionData>,

    /// Error or informational message
    pub error_message: Option<String>,

    /// Elements published to downstream steps
    #[serde(default)]
    pub context_elements: Vec<ContextElement>,
}

impl ExecutionResponse {
    /// Start building a response
    pub fn builder(status: ExecutionStatus) -> ExecutionResponseBuilder {
        ExecutionResponseBuilder {
            status,
            correlation_ids: Vec::new(),
            execution_data: None,
            error_message: None,
            context_elements: Vec::new(),
        }
    }

    /// Plain success
    pub fn success() -> Self {
        Self::builder(ExecutionStatus::Success).build()
    }

    /// Paused waiting on the given correlation ids
    pub fn paused(correlation_ids: Vec<CorrelationId>, data: StepExecutionData) -> Self {
        Self::builder(ExecutionStatus::Paused)
            .correlation_ids(correlation_ids)
            .execution_data(data)
            .build()
    }

    /// Terminal failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::builder(ExecutionStatus::Failed)
            .error_message(message)
            .build()
    }

    /// Terminal response describing an error
    pub fn from_error(err: &CoreError) -> Self {
        let status = match err.category() {
            ErrorCategory::Internal | ErrorCategory::Delivery => ExecutionStatus::Error,
            _ => ExecutionStatus::Failed,
        };
        Self::builder(status).error_message(err.user_message()).build()
    }

    /// Check the response contract
    pub fn validate(&self) -> Result<(), CoreError> {
        let waiting = !self.status.is_terminal();
        if self.is_async != (waiting && !self.correlation_ids.is_empty()) {
            return Err(CoreError::InvalidResponse(format!(
                "async flag {} does not match status {} with {} correlation ids",
                self.is_async,
                self.status,
                self.correlation_ids.len()
            )));
        }
        if waiting && self.correlation_ids.is_empty() {
            return Err(CoreError::InvalidResponse(format!(
                "status {} awaits no correlation ids",
                self.status
            )));
        }
        if self.status.is_terminal() && !self.correlation_ids.is_empty() {
            return Err(CoreError::InvalidResponse(format!(
                "terminal status {} carries correlation ids",
                self.status
            )));
        }
        if self.status.is_failure()
            && self
                .error_message
                .as_deref()
                .map_or(true, |m| m.trim().is_empty())
        {
            return Err(CoreError::InvalidResponse(format!(
                "status {} has no error message",
                self.status
            )));
        }
        Ok(())
    }

    /// Instances published by the response, if any
    pub fn instances(&self) -> Option<&[InstanceElement]> {
        self.context_elements.iter().find_map(|e| match e {
            ContextElement::Instances { instances } => Some(instances.as_slice()),
            _ => None,
        })
    }
}

/// Builder for [`ExecutionResponse`]
#[derive(Debug)]
pub struct ExecutionResponseBuilder {
    status: ExecutionStatus,
    correlation_ids: Vec<CorrelationId>,
    execution_data: Option<StepExecutionData>,
    error_message: Option<String>,
    context_elements: Vec<ContextElement>,
}

impl ExecutionResponseBuilder {
    /// Add one awaited correlation id
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_ids.push(id);
        self
    }

    /// Set the awaited correlation ids
    pub fn correlation_ids(mut self, ids: Vec<CorrelationId>) -> Self {
        self.correlation_ids = ids;
        self
    }

    /// Attach the execution data snapshot
    pub fn execution_data(mut self, data: StepExecutionData) -> Self {
        self.execution_data = Some(data);
        self
    }

    /// Set the message
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Publish a context element
    pub fn context_element(mut self, element: ContextElement) -> Self {
        self.context_elements.push(element);
        self
    }

    /// Finish; the async flag is derived from status and correlation ids
    pub fn build(self) -> ExecutionResponse {
        let is_async = !self.status.is_terminal() && !self.correlation_ids.is_empty();
        ExecutionResponse {
            status: self.status,
            is_async,
            correlation_ids: self.correlation_ids,
            execution_data: self.execution_data,
            error_message: self.error_message,
            context_elements: self.context_elements,
        }
    }
}

/// Render a duration compactly, e.g. `7d`, `10m`, `1h 30m`
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let mut parts = Vec::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            parts.push(format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    parts.join(" ")
}
