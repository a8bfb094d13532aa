use async_trait::async_trait;
use convoy_core::domain::instance::InstanceElement;
use convoy_core::domain::remote_task::{task_types, RemoteTask};
use convoy_core::{
    ContextElement, CoreError, CorrelationId, ExecutionContext, ExecutionResponse,
    ExecutionStatus, RemoteResult, StepDefinition, StepExecutor, StepExecutorBase, StepType,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::{load_data, respond, routed, snapshot, task_timeout, StepDependencies};

/// Persisted state of a container rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRolloutExecutionData {
    /// Image being rolled out
    pub image: String,
    /// Target cluster
    pub cluster_name: Option<String>,
    /// One correlation id per container slot, in slot order
    pub slots: Vec<CorrelationId>,
}

/// Starts a batch of container slots and waits for all of them
pub struct ContainerRolloutStep {
    definition: StepDefinition,
    deps: StepDependencies,
}

impl ContainerRolloutStep {
    /// Create the step
    pub fn new(definition: StepDefinition, deps: StepDependencies) -> Self {
        Self { definition, deps }
    }

    fn instance_count(&self, ctx: &dyn ExecutionContext) -> Result<usize, CoreError> {
        let raw = self.definition.required_string("instance_count", ctx)?;
        match raw.trim().parse::<usize>() {
            Ok(count) if count > 0 => Ok(count),
            _ => Err(CoreError::InvalidInput(format!(
                "Invalid instance_count for step '{}': {}",
                self.definition.name, raw
            ))),
        }
    }

    async fn roll_out(&self, ctx: &dyn ExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let count = self.instance_count(ctx)?;
        let image = self.definition.required_string("image", ctx)?;
        let cluster_name = self.definition.optional_string("cluster_name", ctx)?;
        let timeout = task_timeout(&self.deps.config, &self.definition);

        let slots: Vec<CorrelationId> = (0..count).map(|_| CorrelationId::new_random()).collect();
        let step_id = ctx.step_execution_id();
        let dispatches = slots.iter().enumerate().map(|(slot, id)| {
            let task = routed(RemoteTask::builder(task_types::CONTAINER_DEPLOY, id.clone()), ctx)
                .parameter(json!(image))
                .parameter(json!(cluster_name))
                .parameter(json!(slot))
                .timeout(timeout)
                .build();
            self.deps.dispatcher.dispatch(step_id, task)
        });
        try_join_all(dispatches).await?;

        info!(step_execution_id = %step_id, slots = count, image = %image, "container slots dispatched");
        let data = ContainerRolloutExecutionData {
            image,
            cluster_name,
            slots: slots.clone(),
        };
        Ok(ExecutionResponse::paused(slots, snapshot(&data)?))
    }

    fn collect(
        &self,
        ctx: &dyn ExecutionContext,
        mut responses: HashMap<CorrelationId, RemoteResult>,
    ) -> Result<ExecutionResponse, CoreError> {
        let data: ContainerRolloutExecutionData = load_data(ctx, StepType::ContainerRollout)?;

        let mut instances = Vec::with_capacity(data.slots.len());
        let mut failures = Vec::new();
        for (slot, id) in data.slots.iter().enumerate() {
            match responses.remove(id) {
                Some(RemoteResult::Success { payload }) => {
                    instances.push(container_instance(id, &payload));
                }
                Some(RemoteResult::Error { message }) => {
                    failures.push(format!("slot {}: {}", slot, message));
                }
                None => {
                    return Err(CoreError::Other(format!(
                        "No result for container slot {} ({})",
                        slot, id
                    )))
                }
            }
        }

        if !failures.is_empty() {
            return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                .error_message(format!(
                    "{} of {} container slots failed: {}",
                    failures.len(),
                    data.slots.len(),
                    failures.join("; ")
                ))
                .execution_data(snapshot(&data)?)
                .build());
        }

        Ok(ExecutionResponse::builder(ExecutionStatus::Success)
            .execution_data(snapshot(&data)?)
            .context_element(ContextElement::Instances { instances })
            .build())
    }
}

fn container_instance(id: &CorrelationId, payload: &Value) -> InstanceElement {
    let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_string);
    InstanceElement {
        instance_id: field("container_id").unwrap_or_else(|| id.to_string()),
        host_name: field("host_name").unwrap_or_default(),
        host_id: field("host_id").unwrap_or_default(),
        is_new_instance: true,
    }
}

impl StepExecutorBase for ContainerRolloutStep {
    fn step_type(&self) -> StepType {
        StepType::ContainerRollout
    }
}

#[async_trait]
impl StepExecutor for ContainerRolloutStep {
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse {
        respond(self.roll_out(ctx.as_ref()).await)
    }

    async fn resume(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        responses: HashMap<CorrelationId, RemoteResult>,
    ) -> ExecutionResponse {
        respond(self.collect(ctx.as_ref(), responses))
    }
}
