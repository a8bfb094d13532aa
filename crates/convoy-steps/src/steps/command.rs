use async_trait::async_trait;
use convoy_core::domain::remote_task::{task_types, RemoteTask};
use convoy_core::{
    CoreError, CorrelationId, ExecutionContext, ExecutionResponse, ExecutionStatus, RemoteResult,
    StepDefinition, StepExecutor, StepExecutorBase, StepType,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{load_data, respond, routed, snapshot, task_timeout, StepDependencies};

/// Persisted state of a command step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutionData {
    /// Correlation id of the dispatched task
    pub activity_id: CorrelationId,
    /// Rendered command line
    pub command: String,
    /// Rendered working directory
    pub working_directory: Option<String>,
    /// Exit code reported by the worker
    #[serde(default)]
    pub exit_code: Option<i64>,
}

/// Runs a service command on the phase's hosts through the worker pool
pub struct CommandStep {
    definition: StepDefinition,
    deps: StepDependencies,
}

impl CommandStep {
    /// Create the step
    pub fn new(definition: StepDefinition, deps: StepDependencies) -> Self {
        Self { definition, deps }
    }

    async fn dispatch(&self, ctx: &dyn ExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let command = self.definition.required_string("command", ctx)?;
        let working_directory = self.definition.optional_string("working_directory", ctx)?;
        let activity_id = CorrelationId::new_random();

        let task = routed(RemoteTask::builder(task_types::COMMAND, activity_id.clone()), ctx)
            .parameter(json!(command))
            .parameter(json!(working_directory))
            .timeout(task_timeout(&self.deps.config, &self.definition))
            .build();
        self.deps
            .dispatcher
            .dispatch(ctx.step_execution_id(), task)
            .await?;

        let data = CommandExecutionData {
            activity_id: activity_id.clone(),
            command,
            working_directory,
            exit_code: None,
        };
        Ok(ExecutionResponse::paused(vec![activity_id], snapshot(&data)?))
    }

    fn complete(
        &self,
        ctx: &dyn ExecutionContext,
        mut responses: HashMap<CorrelationId, RemoteResult>,
    ) -> Result<ExecutionResponse, CoreError> {
        let mut data: CommandExecutionData = load_data(ctx, StepType::Command)?;
        let result = responses.remove(&data.activity_id).ok_or_else(|| {
            CoreError::Other(format!("No result for activity {}", data.activity_id))
        })?;

        let payload = match result {
            RemoteResult::Success { payload } => payload,
            RemoteResult::Error { message } => {
                return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(message)
                    .execution_data(snapshot(&data)?)
                    .build());
            }
        };

        let exit_code = payload.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
        data.exit_code = Some(exit_code);
        debug!(activity_id = %data.activity_id, exit_code, "command finished");

        if exit_code != 0 {
            let message = payload
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Command exited with code {}", exit_code));
            return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                .error_message(message)
                .execution_data(snapshot(&data)?)
                .build());
        }

        Ok(ExecutionResponse::builder(ExecutionStatus::Success)
            .execution_data(snapshot(&data)?)
            .build())
    }
}

impl StepExecutorBase for CommandStep {
    fn step_type(&self) -> StepType {
        StepType::Command
    }
}

#[async_trait]
impl StepExecutor for CommandStep {
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse {
        respond(self.dispatch(ctx.as_ref()).await)
    }

    async fn resume(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        responses: HashMap<CorrelationId, RemoteResult>,
    ) -> ExecutionResponse {
        respond(self.complete(ctx.as_ref(), responses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use convoy_core::domain::repository::memory::MemoryExecutionContext;
    use convoy_core::{InputValue, PhaseElement, PhaseType, ContextElement};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn definition() -> StepDefinition {
        StepDefinition::new("restart", "Restart", StepType::Command)
            .with_input("command", InputValue::expression("systemctl restart ${service}"))
            .with_input("working_directory", InputValue::literal("/opt/app"))
    }

    fn context() -> MemoryExecutionContext {
        MemoryExecutionContext::builder()
            .step_execution_id("cmd-1")
            .variable("service", "web")
            .element(ContextElement::Phase(PhaseElement {
                phase_name: "Phase 1".into(),
                phase_type: PhaseType::Ssh,
                service_id: "svc".into(),
                infra_mapping_id: "infra-1".into(),
                artifact_id: None,
                rollback: false,
            }))
            .build()
    }

    fn resumed_context(response: &ExecutionResponse) -> Arc<dyn ExecutionContext> {
        let data = response.execution_data.clone().unwrap();
        Arc::new(
            MemoryExecutionContext::builder()
                .step_execution_id("cmd-1")
                .state_execution_data(data)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_execute_dispatches_routed_task() {
        let fixture = Fixture::new();
        let step = CommandStep::new(definition(), fixture.deps.clone());

        let response = step.execute(Arc::new(context())).await;
        assert_eq!(response.status, ExecutionStatus::Paused);
        assert!(response.is_async);

        let queued = fixture.pool.queued();
        assert_eq!(queued.len(), 1);
        let task = &queued[0];
        assert_eq!(task.task_type, task_types::COMMAND);
        assert_eq!(task.correlation_id, response.correlation_ids[0]);
        assert_eq!(task.parameters[0], json!("systemctl restart web"));
        assert_eq!(task.routing.get("infra_mapping_id").map(String::as_str), Some("infra-1"));
        assert_eq!(task.routing.get("env_id").map(String::as_str), Some("env-1"));
        assert_eq!(task.timeout, Duration::from_secs(30 * 60));
        assert_eq!(
            fixture.correlations.owner(&task.correlation_id),
            Some(convoy_core::StepExecutionId("cmd-1".into()))
        );
    }

    #[tokio::test]
    async fn test_resume_outcomes() {
        let fixture = Fixture::new();
        let step = CommandStep::new(definition(), fixture.deps.clone());
        let paused = step.execute(Arc::new(context())).await;
        let id = paused.correlation_ids[0].clone();

        let ok = step
            .resume(
                resumed_context(&paused),
                HashMap::from([(id.clone(), RemoteResult::success(json!({ "exit_code": 0 })))]),
            )
            .await;
        assert_eq!(ok.status, ExecutionStatus::Success);
        let data: CommandExecutionData = ok.execution_data.unwrap().to_typed().unwrap();
        assert_eq!(data.exit_code, Some(0));

        let remote_error = step
            .resume(
                resumed_context(&paused),
                HashMap::from([(id.clone(), RemoteResult::error("ssh: connection refused"))]),
            )
            .await;
        assert_eq!(remote_error.status, ExecutionStatus::Failed);
        assert_eq!(remote_error.error_message.as_deref(), Some("ssh: connection refused"));

        let non_zero = step
            .resume(
                resumed_context(&paused),
                HashMap::from([(id, RemoteResult::success(json!({ "exit_code": 3 })))]),
            )
            .await;
        assert_eq!(non_zero.status, ExecutionStatus::Failed);
        assert_eq!(non_zero.error_message.as_deref(), Some("Command exited with code 3"));
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let fixture = Fixture::new();
        let def = StepDefinition::new("restart", "Restart", StepType::Command);
        let step = CommandStep::new(def, fixture.deps.clone());

        let response = step.execute(Arc::new(context())).await;
        assert_eq!(response.status, ExecutionStatus::Failed);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Step 'Restart' requires input 'command'")
        );
        assert!(fixture.pool.queued().is_empty());
    }

    #[tokio::test]
    async fn test_unrendered_command_fails() {
        let fixture = Fixture::new();
        let step = CommandStep::new(definition(), fixture.deps.clone());
        let ctx = MemoryExecutionContext::builder().build();

        let response = step.execute(Arc::new(ctx)).await;
        assert_eq!(response.status, ExecutionStatus::Failed);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Expression not rendered: systemctl restart ${service}")
        );
    }
}
