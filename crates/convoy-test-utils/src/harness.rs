//! End-to-end wiring of the engine, the standard steps and in-memory collaborators.

use chrono::{DateTime, Utc};
use convoy_core::domain::instance::{InfraMapping, Instance};
use convoy_core::domain::remote_task::RemoteTask;
use convoy_core::domain::repository::memory::{
    MemoryAccountService, MemoryExecutionContext, MemoryInventoryService, MemoryOutputStore,
    MemoryPollRegistrar, MemoryStepStateRepository, MemoryTicketBackend, MemoryWorkerPool,
    RecordingEventHandler,
};
use convoy_core::scheduling::{CapacityGuard, HostOverrideLedger, RunLocks};
use convoy_core::{
    CoreError, CorrelationId, CorrelationRegistry, DeliveryOutcome, EngineConfig,
    ExecutionContext, ExecutionResponse, RemoteResult, RemoteTaskDispatcher, StepDefinition,
    StepExecutionService, StepRegistry, WorkflowExecutionId,
};
use convoy_steps::{register_standard_steps, StepDependencies};
use std::sync::Arc;
use tracing::debug;

/// A step execution engine running the standard steps against in-memory collaborators
pub struct TestHarness {
    pub service: Arc<StepExecutionService>,
    pub pool: Arc<MemoryWorkerPool>,
    pub correlations: Arc<CorrelationRegistry>,
    pub outputs: Arc<MemoryOutputStore>,
    pub inventory: Arc<MemoryInventoryService>,
    pub accounts: Arc<MemoryAccountService>,
    pub tickets: Arc<MemoryTicketBackend>,
    pub polls: Arc<MemoryPollRegistrar>,
    pub events: Arc<RecordingEventHandler>,
    pub deps: StepDependencies,
}

impl TestHarness {
    /// Harness with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Harness with a custom configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self::customized(config, |_| {})
    }

    /// Harness whose step collaborators are adjusted before the steps are
    /// registered, e.g. to swap in a mock
    pub fn customized(config: EngineConfig, customize: impl FnOnce(&mut StepDependencies)) -> Self {
        let config = Arc::new(config);
        let pool = Arc::new(MemoryWorkerPool::new());
        let correlations = Arc::new(CorrelationRegistry::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let inventory = Arc::new(MemoryInventoryService::new());
        let accounts = Arc::new(MemoryAccountService::new());
        let tickets = Arc::new(MemoryTicketBackend::new("JIRA"));
        let polls = Arc::new(MemoryPollRegistrar::new());
        let events = Arc::new(RecordingEventHandler::new());

        let dispatcher = RemoteTaskDispatcher::new(pool.clone(), correlations.clone())
            .with_event_handler(events.clone());
        let mut deps = StepDependencies {
            dispatcher: Arc::new(dispatcher),
            output_store: outputs.clone(),
            inventory: inventory.clone(),
            accounts: accounts.clone(),
            ticket_backend: Some(tickets.clone()),
            poll_registrar: Some(polls.clone()),
            host_overrides: Arc::new(HostOverrideLedger::new()),
            capacity: Arc::new(CapacityGuard::new()),
            run_locks: Arc::new(RunLocks::new()),
            config: config.clone(),
        };
        customize(&mut deps);

        let registry = Arc::new(StepRegistry::new());
        register_standard_steps(&registry, deps.clone());
        let service = deps.run_scoped().into_iter().fold(
            StepExecutionService::new(
                registry,
                correlations.clone(),
                Arc::new(MemoryStepStateRepository::new()),
                events.clone(),
                config,
            ),
            |service, state| service.with_run_state(state),
        );

        Self {
            service: Arc::new(service),
            pool,
            correlations,
            outputs,
            inventory,
            accounts,
            tickets,
            polls,
            events,
            deps,
        }
    }

    /// Register an infrastructure with its instances
    pub fn add_infra(&self, mapping: InfraMapping, instances: Vec<Instance>) {
        debug!(infra_mapping_id = %mapping.id, instances = instances.len(), "registering test infrastructure");
        self.inventory.add_infra(mapping, instances);
    }

    /// Start a step
    pub async fn start(
        &self,
        definition: StepDefinition,
        ctx: &MemoryExecutionContext,
    ) -> Result<ExecutionResponse, CoreError> {
        self.service.start(definition, Arc::new(ctx.clone())).await
    }

    /// Deliver a remote result as an outside caller would
    pub async fn deliver(
        &self,
        correlation_id: &CorrelationId,
        result: RemoteResult,
    ) -> Result<DeliveryOutcome, CoreError> {
        self.service
            .deliver_result(caller(), correlation_id, result)
            .await
    }

    /// Abort the step `ctx` runs
    pub async fn abort(&self, ctx: &MemoryExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let step_id = ctx.step_execution_id().clone();
        self.service.abort(Arc::new(ctx.clone()), &step_id).await
    }

    /// Time out the step `ctx` runs as of `now`
    pub async fn expire(
        &self,
        ctx: &MemoryExecutionContext,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResponse, CoreError> {
        let step_id = ctx.step_execution_id().clone();
        self.service
            .handle_timeout(Arc::new(ctx.clone()), &step_id, now)
            .await
    }

    /// Release a finished run
    pub async fn release_run(&self, run: &str) -> Result<usize, CoreError> {
        self.service
            .release_run(&WorkflowExecutionId(run.to_string()))
            .await
    }

    /// Queued tasks of a type, in queue order
    pub fn queued(&self, task_type: &str) -> Vec<RemoteTask> {
        self.pool
            .queued()
            .into_iter()
            .filter(|t| t.task_type == task_type)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn caller() -> Arc<dyn ExecutionContext> {
    Arc::new(MemoryExecutionContext::builder().build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{command_step, DeploymentContextBuilder};
    use convoy_core::domain::remote_task::task_types;
    use convoy_core::ExecutionStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_harness_runs_a_command_to_completion() {
        let harness = TestHarness::new();
        let ctx = DeploymentContextBuilder::new("cmd-1").phase("infra-1").build();

        let paused = harness
            .start(command_step("Restart", "systemctl restart web"), &ctx)
            .await
            .unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);

        let task = harness.queued(task_types::COMMAND).remove(0);
        let outcome = harness
            .deliver(&task.correlation_id, RemoteResult::success(json!({ "exit_code": 0 })))
            .await
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Resumed(ref r) if r.status == ExecutionStatus::Success));
        assert_eq!(harness.events.count("task.dispatched"), 1);
    }
}
