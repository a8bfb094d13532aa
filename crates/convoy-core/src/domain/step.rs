//! Step definitions and identifiers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::expression::contains_expression;
use crate::{CoreError, ExecutionContext};

/// Unique ID for one execution of a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct StepExecutionId(pub String);

impl StepExecutionId {
    /// Create a fresh random ID
    pub fn new_random() -> Self {
        StepExecutionId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for StepExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key routing an asynchronous result back to the step awaiting it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Create a fresh random correlation id
    pub fn new_random() -> Self {
        CorrelationId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId(value.to_string())
    }
}

/// ID of one workflow (or pipeline) run; scopes cross-phase state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecutionId(pub String);

impl fmt::Display for WorkflowExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of step variants known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Run a service command on target hosts
    Command,
    /// Install or upgrade a Helm release
    HelmDeploy,
    /// Roll out a batch of container slots
    ContainerRollout,
    /// Pick the instances a phase deploys to
    NodeSelect,
    /// Wait for a human or ticket-driven approval
    Approval,
}

impl StepType {
    /// All known step types
    pub const ALL: [StepType; 5] = [
        StepType::Command,
        StepType::HelmDeploy,
        StepType::ContainerRollout,
        StepType::NodeSelect,
        StepType::Approval,
    ];

    /// Stable tag used in definitions and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Command => "COMMAND",
            StepType::HelmDeploy => "HELM_DEPLOY",
            StepType::ContainerRollout => "CONTAINER_ROLLOUT",
            StepType::NodeSelect => "NODE_SELECT",
            StepType::Approval => "APPROVAL",
        }
    }

    /// Human readable name used in messages
    pub fn display_name(&self) -> &'static str {
        match self {
            StepType::Command => "Command",
            StepType::HelmDeploy => "Helm deploy",
            StepType::ContainerRollout => "Container rollout",
            StepType::NodeSelect => "Node select",
            StepType::Approval => "Approval",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownStepType(s.to_string()))
    }
}

/// Declared timeout of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Use the engine's default for the step type
    #[default]
    Default,
    /// Explicit timeout in seconds
    Fixed {
        /// Timeout in seconds
        secs: u64,
    },
    /// Never time out
    Unbounded,
}

/// A declared step input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    /// Literal value used as is (strings are still rendered if they hold expressions)
    Literal(Value),
    /// Expression rendered through the execution context
    Expression(String),
}

impl InputValue {
    /// Shorthand for a literal string
    pub fn literal(value: impl Into<String>) -> Self {
        InputValue::Literal(Value::String(value.into()))
    }

    /// Shorthand for an expression
    pub fn expression(raw: impl Into<String>) -> Self {
        InputValue::Expression(raw.into())
    }

    /// Resolve the value against a context
    pub fn render(&self, ctx: &dyn ExecutionContext) -> Result<Value, CoreError> {
        match self {
            InputValue::Literal(Value::String(s)) if contains_expression(s) => {
                render_str(ctx, s).map(Value::String)
            }
            InputValue::Literal(v) => Ok(v.clone()),
            InputValue::Expression(raw) => render_str(ctx, raw).map(Value::String),
        }
    }
}

fn render_str(ctx: &dyn ExecutionContext, raw: &str) -> Result<String, CoreError> {
    let rendered = ctx.render_expression(raw)?;
    if contains_expression(&rendered) {
        return Err(CoreError::ExpressionNotRendered(raw.to_string()));
    }
    Ok(rendered)
}

/// A named, typed unit of workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Identifier of the step inside its workflow
    pub id: String,

    /// Display name
    pub name: String,

    /// Type tag
    pub step_type: StepType,

    /// Declared inputs
    #[serde(default)]
    pub inputs: HashMap<String, InputValue>,

    /// Declared timeout
    #[serde(default)]
    pub timeout: TimeoutPolicy,
}

impl StepDefinition {
    /// Create a definition with no inputs and the default timeout
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            inputs: HashMap::new(),
            timeout: TimeoutPolicy::Default,
        }
    }

    /// Add an input
    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Set the timeout policy
    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// Raw declared input
    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }

    /// Render an input, `None` when it was not declared
    pub fn render_input(
        &self,
        name: &str,
        ctx: &dyn ExecutionContext,
    ) -> Result<Option<Value>, CoreError> {
        self.inputs.get(name).map(|v| v.render(ctx)).transpose()
    }

    /// Render an input that must be present and non-empty, as a string
    pub fn required_string(
        &self,
        name: &str,
        ctx: &dyn ExecutionContext,
    ) -> Result<String, CoreError> {
        match self.render_input(name, ctx)? {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(Value::Null) | None => Err(CoreError::InvalidInput(format!(
                "Step '{}' requires input '{}'",
                self.name, name
            ))),
            Some(Value::String(_)) => Err(CoreError::InvalidInput(format!(
                "Step '{}' input '{}' is empty",
                self.name, name
            ))),
            Some(other) => Ok(other.to_string()),
        }
    }

    /// Render an optional string input
    pub fn optional_string(
        &self,
        name: &str,
        ctx: &dyn ExecutionContext,
    ) -> Result<Option<String>, CoreError> {
        Ok(match self.render_input(name, ctx)? {
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
    }

    /// Deserialize a literal input into a typed value without rendering
    pub fn literal_as<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, CoreError> {
        match self.inputs.get(name) {
            Some(InputValue::Literal(v)) => Ok(Some(serde_json::from_value(v.clone()).map_err(
                |e| CoreError::InvalidInput(format!("Input '{}' is malformed: {}", name, e)),
            )?)),
            Some(InputValue::Expression(raw)) => Err(CoreError::InvalidInput(format!(
                "Input '{}' must be a literal, got expression {}",
                name, raw
            ))),
            None => Ok(None),
        }
    }

    /// Explicitly configured timeout, if any
    pub fn configured_timeout(&self) -> Option<Duration> {
        match self.timeout {
            TimeoutPolicy::Fixed { secs } => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }
}
