//!
//! Convoy Core - execution core of the Convoy deployment orchestrator
//!
//! This crate defines the step execution contract, the correlation of
//! asynchronous remote results back to paused steps, node selection
//! scheduling and approval gate evaluation. Concrete steps live in
//! `convoy-steps`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Domain layer - core models, collaborator interfaces and events
pub mod domain;

/// Application services - engine, registry, dispatcher, approval gate
pub mod application;

/// Node selection scheduling
pub mod scheduling;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

/// Structured logging setup
pub mod logging;

// Re-export key types
pub use config::EngineConfig;
pub use error::{CoreError, ErrorCategory};
pub use types::{
    AbortReason, ContextElement, ContextElementKind, ExecutionKind, ExecutionResponse,
    ExecutionStatus, PhaseElement, PhaseType, RemoteResult, StepExecutionData,
    WorkflowStandardParams,
};

pub use application::correlation_registry::CorrelationRegistry;
pub use application::step_execution_service::{DeliveryOutcome, StepExecutionService};
pub use application::step_registry::{StepFactory, StepRegistry};
pub use application::task_dispatcher::{RemoteTaskDispatcher, TaskDispatcher};

pub use domain::step::{
    CorrelationId, InputValue, StepDefinition, StepExecutionId, StepType, TimeoutPolicy,
    WorkflowExecutionId,
};

/// Read-mostly facade a step uses to reach its ambient context
pub trait ExecutionContext: Send + Sync {
    /// Render `${...}` expressions; unresolved expressions are left in place
    fn render_expression(&self, raw: &str) -> Result<String, CoreError>;

    /// Look up a contextual element
    fn context_element(&self, kind: &ContextElementKind) -> Option<ContextElement>;

    /// Step execution data persisted by a previous `execute` or `resume`
    fn state_execution_data(&self) -> Option<StepExecutionData>;

    /// The step execution being run
    fn step_execution_id(&self) -> &StepExecutionId;

    /// The run the step belongs to
    fn workflow_execution_id(&self) -> &WorkflowExecutionId;

    /// Application id
    fn app_id(&self) -> &str;

    /// Account owning the application
    fn account_id(&self) -> &str;

    /// Environment id, when the step runs inside an environment
    fn env_id(&self) -> Option<&str>;

    /// Whether the run is a pipeline or a workflow
    fn execution_kind(&self) -> ExecutionKind;

    /// Current time
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Current phase, if any
    fn phase(&self) -> Option<PhaseElement> {
        match self.context_element(&ContextElementKind::Phase) {
            Some(ContextElement::Phase(phase)) => Some(phase),
            _ => None,
        }
    }

    /// Standard workflow parameters; defaults when absent
    fn standard_params(&self) -> WorkflowStandardParams {
        match self.context_element(&ContextElementKind::Standard) {
            Some(ContextElement::Standard(params)) => params,
            _ => WorkflowStandardParams::default(),
        }
    }

    /// Infrastructure mapping of the current phase
    fn infra_mapping_id(&self) -> Option<String> {
        self.phase().map(|p| p.infra_mapping_id)
    }
}

/// Non-async base trait for step executors
/// This trait is object-safe and used as a marker trait
pub trait StepExecutorBase: Send + Sync {
    /// Type of the step
    fn step_type(&self) -> StepType;
}

/// A step that can be executed and resumed by the engine
#[async_trait]
pub trait StepExecutor: StepExecutorBase {
    /// First invocation; must not assume persisted data exists
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse;

    /// Invoked once per complete batch of correlated results
    async fn resume(
        &self,
        _ctx: Arc<dyn ExecutionContext>,
        _responses: HashMap<CorrelationId, RemoteResult>,
    ) -> ExecutionResponse {
        ExecutionResponse::builder(ExecutionStatus::Error)
            .error_message(format!(
                "{} step does not accept asynchronous results",
                self.step_type().display_name()
            ))
            .build()
    }

    /// Tear down a paused step after an abort or timeout
    async fn handle_abort(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        reason: AbortReason,
    ) -> ExecutionResponse {
        let builder = match reason {
            AbortReason::Manual => ExecutionResponse::builder(ExecutionStatus::Aborted)
                .error_message(format!(
                    "{} step was aborted",
                    self.step_type().display_name()
                )),
            AbortReason::Timeout { configured, .. } => {
                ExecutionResponse::builder(ExecutionStatus::Failed).error_message(format!(
                    "{} step timed out after {}",
                    self.step_type().display_name(),
                    types::format_duration(configured)
                ))
            }
        };
        match ctx.state_execution_data() {
            Some(data) => builder.execution_data(data).build(),
            None => builder.build(),
        }
    }
}
