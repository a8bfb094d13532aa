//!
//! Standard step library for the Convoy deployment orchestrator
//!
//! Every step is a plain struct holding its definition and the collaborators
//! it needs. [`register_standard_steps`] installs a factory per step type in
//! a [`StepRegistry`].

use convoy_core::domain::remote_task::RemoteTaskBuilder;
use convoy_core::domain::repository::{AccountService, InventoryService, OutputStore, PollRegistrar, TicketBackend};
use convoy_core::scheduling::{CapacityGuard, HostOverrideLedger, RunLocks, RunScoped};
use convoy_core::{
    CoreError, EngineConfig, ExecutionContext, ExecutionResponse, StepExecutionData, StepRegistry,
    StepType, TaskDispatcher,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub mod steps;

pub use steps::approval::ApprovalStep;
pub use steps::command::CommandStep;
pub use steps::container_rollout::ContainerRolloutStep;
pub use steps::helm_deploy::HelmDeployStep;
pub use steps::node_select::NodeSelectStep;

/// Collaborators shared by the standard steps
#[derive(Clone)]
pub struct StepDependencies {
    /// Remote task submission
    pub dispatcher: Arc<dyn TaskDispatcher>,
    /// Run-scoped outputs shared between phases
    pub output_store: Arc<dyn OutputStore>,
    /// Instance inventory
    pub inventory: Arc<dyn InventoryService>,
    /// Account lookups for license ceilings
    pub accounts: Arc<dyn AccountService>,
    /// Ticket system used by ticket-driven approvals
    pub ticket_backend: Option<Arc<dyn TicketBackend>>,
    /// Re-evaluation scheduling for pending approvals
    pub poll_registrar: Option<Arc<dyn PollRegistrar>>,
    /// Execution-host override claims
    pub host_overrides: Arc<HostOverrideLedger>,
    /// Concurrent instance reservations
    pub capacity: Arc<CapacityGuard>,
    /// Serializes the phases of one run that share run-scoped outputs
    pub run_locks: Arc<RunLocks>,
    /// Engine configuration
    pub config: Arc<EngineConfig>,
}

impl StepDependencies {
    /// State the steps keep per run, released with the run
    pub fn run_scoped(&self) -> Vec<Arc<dyn RunScoped>> {
        let host_overrides: Arc<dyn RunScoped> = self.host_overrides.clone();
        let capacity: Arc<dyn RunScoped> = self.capacity.clone();
        let run_locks: Arc<dyn RunScoped> = self.run_locks.clone();
        vec![host_overrides, capacity, run_locks]
    }
}

/// Factory module for the standard steps
pub mod factory {
    use super::*;

    /// Register a factory for every standard step type
    pub fn register_standard_steps(registry: &StepRegistry, deps: StepDependencies) {
        let d = deps.clone();
        registry.register(
            StepType::Command,
            Arc::new(move |def| Ok(Arc::new(CommandStep::new(def.clone(), d.clone())))),
        );

        let d = deps.clone();
        registry.register(
            StepType::HelmDeploy,
            Arc::new(move |def| Ok(Arc::new(HelmDeployStep::new(def.clone(), d.clone())))),
        );

        let d = deps.clone();
        registry.register(
            StepType::ContainerRollout,
            Arc::new(move |def| Ok(Arc::new(ContainerRolloutStep::new(def.clone(), d.clone())))),
        );

        let d = deps.clone();
        registry.register(
            StepType::NodeSelect,
            Arc::new(move |def| Ok(Arc::new(NodeSelectStep::new(def.clone(), d.clone())))),
        );

        registry.register(
            StepType::Approval,
            Arc::new(move |def| Ok(Arc::new(ApprovalStep::new(def.clone(), deps.clone())))),
        );
    }
}

pub use factory::register_standard_steps;

/// Turn a step's internal result into a response
pub(crate) fn respond(result: Result<ExecutionResponse, CoreError>) -> ExecutionResponse {
    result.unwrap_or_else(|e| ExecutionResponse::from_error(&e))
}

/// Rebuild the typed snapshot persisted by a previous `execute` or `resume`
pub(crate) fn load_data<T: DeserializeOwned>(
    ctx: &dyn ExecutionContext,
    step_type: StepType,
) -> Result<T, CoreError> {
    ctx.state_execution_data()
        .ok_or_else(|| {
            CoreError::Other(format!(
                "{} step has no persisted execution data",
                step_type.display_name()
            ))
        })?
        .to_typed()
}

/// Snapshot typed step data
pub(crate) fn snapshot<T: serde::Serialize>(data: &T) -> Result<StepExecutionData, CoreError> {
    StepExecutionData::from_typed(data)
}

/// Attach the routing abstractions every deployment task carries
pub(crate) fn routed(builder: RemoteTaskBuilder, ctx: &dyn ExecutionContext) -> RemoteTaskBuilder {
    builder
        .route("app_id", Some(ctx.app_id()))
        .route("env_id", ctx.env_id())
        .route("infra_mapping_id", ctx.infra_mapping_id())
}

/// Worker timeout for a task; unbounded steps fall back to the type default
pub(crate) fn task_timeout(config: &EngineConfig, def: &convoy_core::StepDefinition) -> Duration {
    config
        .effective_timeout(def)
        .or_else(|| config.timeout_for(def.step_type))
        .unwrap_or_else(|| Duration::from_secs(config.deployment_timeout_secs))
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use convoy_core::StepDefinition;

    #[test]
    fn test_register_standard_steps() {
        let registry = StepRegistry::new();
        register_standard_steps(&registry, Fixture::new().deps);

        assert_eq!(registry.registered_types().len(), StepType::ALL.len());
        for step_type in StepType::ALL {
            let def = StepDefinition::new("s", "step", step_type);
            assert_eq!(registry.create(&def).unwrap().step_type(), step_type);
        }
    }

    #[test]
    fn test_task_timeout_falls_back_for_unbounded_steps() {
        let config = EngineConfig::default();
        let def = StepDefinition::new("s", "Run", StepType::Command)
            .with_timeout(convoy_core::TimeoutPolicy::Unbounded);
        assert_eq!(
            task_timeout(&config, &def),
            Duration::from_secs(config.command_timeout_secs)
        );
    }
}
