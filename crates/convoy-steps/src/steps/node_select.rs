//! Node selection for a deployment phase.
//!
//! The instance count is cumulative across the phases of a run: a phase
//! asking for N instances adds only what earlier phases have not deployed.
//! Earlier selections are read back from the run's `deployed_instances`
//! output and never selected twice.

use async_trait::async_trait;
use convoy_core::config::ArtifactExclusionPolicy;
use convoy_core::domain::expression::contains_expression;
use convoy_core::domain::instance::{
    InfraKind, InfraMapping, Instance, InstanceElement, InstanceUnitType, SelectionParams,
};
use convoy_core::domain::repository::OutputScope;
use convoy_core::scheduling::{expand_host_names, target_count, OverrideOutcome};
use convoy_core::{
    ContextElement, CoreError, ExecutionContext, ExecutionResponse, ExecutionStatus,
    StepDefinition, StepExecutor, StepExecutorBase, StepType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{respond, snapshot, StepDependencies};

/// Run-scoped output holding every instance selected so far
pub const DEPLOYED_INSTANCES_OUTPUT: &str = "deployed_instances";

/// Benign outcome when every candidate already runs the artifact
pub const ARTIFACT_EXCLUSION_MESSAGE: &str =
    "No nodes selected (Nodes already deployed with the same artifact)";

/// Selection exceeded the infrastructure's host list
pub const TOO_MANY_NODES_MESSAGE: &str =
    "Too many nodes selected. Did you change service infrastructure without updating Select Nodes in the workflow?";

/// Specific hosts were requested without naming any
pub const HOSTNAMES_REQUIRED_MESSAGE: &str = "Hostnames must be specified";

/// Specific hosts cannot be combined with an auto scale group
pub const AUTO_SCALE_HOSTS_MESSAGE: &str = "Cannot specify hosts when using an auto scale group";

/// Persisted result of a node selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSelectExecutionData {
    /// Rendered instance count
    pub instance_count: u32,
    /// Unit of the count
    pub instance_unit_type: InstanceUnitType,
    /// Whether specific hosts were selected
    pub specific_hosts: bool,
    /// Requested host names, after expansion
    pub host_names: Vec<String>,
    /// Instances selected by this phase
    pub selected: Vec<Instance>,
    /// Instances selected by earlier phases of the run
    pub already_deployed: usize,
    /// Instances skipped because they already run the artifact
    pub excluded_by_artifact: usize,
}

/// Picks the instances a phase deploys to
pub struct NodeSelectStep {
    definition: StepDefinition,
    deps: StepDependencies,
}

/// Facts needed to explain an empty selection
struct EmptySelection<'a> {
    specific: bool,
    host_names: &'a [String],
    cumulative: usize,
    already_deployed: usize,
    unresolved: &'a [String],
    mapping: &'a InfraMapping,
}

impl NodeSelectStep {
    /// Create the step
    pub fn new(definition: StepDefinition, deps: StepDependencies) -> Self {
        Self { definition, deps }
    }

    /// Definition-time validation, keyed by input name
    pub fn validate_fields(&self) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        let specific = self.specific_hosts().unwrap_or(false);
        let hosts: Vec<String> = self
            .definition
            .literal_as("host_names")
            .ok()
            .flatten()
            .unwrap_or_default();
        if specific && hosts.is_empty() {
            errors.insert("host_names".to_string(), HOSTNAMES_REQUIRED_MESSAGE.to_string());
        }
        errors
    }

    fn specific_hosts(&self) -> Result<bool, CoreError> {
        Ok(self.definition.literal_as("specific_hosts")?.unwrap_or(false))
    }

    fn unit(&self) -> Result<InstanceUnitType, CoreError> {
        Ok(self
            .definition
            .literal_as("instance_unit_type")?
            .unwrap_or_default())
    }

    /// Render the instance count. A missing count is 0.
    pub fn render_instance_count(
        &self,
        ctx: &dyn ExecutionContext,
        unit: InstanceUnitType,
    ) -> Result<u32, CoreError> {
        let rendered = match self.definition.render_input("instance_count", ctx)? {
            None | Some(Value::Null) => return Ok(0),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        let count: i64 = rendered.trim().parse().map_err(|_| {
            CoreError::InvalidInput(format!("Instance count is not a number: {}", rendered))
        })?;

        match unit {
            InstanceUnitType::Count if count <= 0 => Err(CoreError::InvalidInput(format!(
                "Instance count must be greater than 0, got {}",
                count
            ))),
            InstanceUnitType::Percentage if !(1..=100).contains(&count) => {
                Err(CoreError::InvalidInput(format!(
                    "Instance percentage must be between 1 and 100, got {}",
                    count
                )))
            }
            _ => u32::try_from(count).map_err(|_| {
                CoreError::InvalidInput(format!("Instance count is too large: {}", count))
            }),
        }
    }

    fn render_host_names(&self, ctx: &dyn ExecutionContext) -> Result<Vec<String>, CoreError> {
        let raw: Vec<String> = self.definition.literal_as("host_names")?.unwrap_or_default();
        if raw.is_empty() {
            return Err(CoreError::InvalidInput(HOSTNAMES_REQUIRED_MESSAGE.to_string()));
        }
        let rendered = raw
            .iter()
            .map(|host| {
                let value = ctx.render_expression(host)?;
                if contains_expression(&value) {
                    return Err(CoreError::ExpressionNotRendered(host.clone()));
                }
                Ok(value)
            })
            .collect::<Result<Vec<String>, CoreError>>()?;
        Ok(expand_host_names(&rendered))
    }

    async fn select_nodes(&self, ctx: &dyn ExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let phase = ctx.phase().ok_or_else(|| {
            CoreError::InvalidInput("Node select must run inside a deployment phase".to_string())
        })?;
        let env_id = ctx
            .env_id()
            .ok_or_else(|| CoreError::InvalidInput("Node select requires an environment".to_string()))?
            .to_string();
        let app_id = ctx.app_id().to_string();
        let infra_id = phase.infra_mapping_id.clone();
        let run = ctx.workflow_execution_id().clone();
        let step_id = ctx.step_execution_id().clone();
        let inventory = &self.deps.inventory;

        let specific = self.specific_hosts()?;
        let unit = self.unit()?;
        let host_names = if specific {
            self.render_host_names(ctx)?
        } else {
            Vec::new()
        };
        let count = if specific {
            0
        } else {
            self.render_instance_count(ctx, unit)?
        };

        let mapping = inventory
            .infra_mapping(&app_id, &infra_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("Infrastructure mapping {} not found", infra_id))
            })?;
        if specific && matches!(mapping.kind, InfraKind::AutoScaleGroup { .. }) {
            return Err(CoreError::InvalidInput(AUTO_SCALE_HOSTS_MESSAGE.to_string()));
        }
        let infra_hosts = inventory
            .list_host_display_names(&app_id, &env_id, &infra_id)
            .await?;

        let mut params = if specific {
            SelectionParams::specific_hosts(host_names)
        } else {
            SelectionParams {
                count,
                unit,
                ..SelectionParams::default()
            }
        };

        // Phases of a run read, extend and save deployed_instances one at a time
        let _run_guard = self.deps.run_locks.acquire(&run).await;

        // Run-wide host override
        let standard = ctx.standard_params();
        let outcome = self.deps.host_overrides.process_execution_hosts(
            &run,
            &step_id,
            &standard.execution_hosts,
            &mut params,
        );
        if outcome == OverrideOutcome::AlreadyClaimed {
            info!(step_execution_id = %step_id, "execution hosts already claimed by another phase");
            return Ok(ExecutionResponse::builder(ExecutionStatus::Success)
                .error_message(outcome.message().unwrap_or_default())
                .build());
        }

        // Exclusions
        let already_deployed: Vec<Instance> = match self
            .deps
            .output_store
            .find(&run, DEPLOYED_INSTANCES_OUTPUT)
            .await?
        {
            Some(output) => serde_json::from_value(output.value)?,
            None => Vec::new(),
        };
        let exclude_same_artifact = match self.deps.config.exclusion_policy(phase.phase_type) {
            ArtifactExclusionPolicy::FromWorkflowParams => standard.exclude_hosts_with_same_artifact,
            ArtifactExclusionPolicy::Always => true,
            ArtifactExclusionPolicy::Never => false,
        };
        let running_artifact = match (&phase.artifact_id, exclude_same_artifact) {
            (Some(artifact_id), true) => {
                inventory
                    .instances_running_artifact(&app_id, &infra_id, artifact_id)
                    .await?
            }
            _ => Vec::new(),
        };

        let cumulative = target_count(count, unit, infra_hosts.len());
        if !params.select_specific_hosts {
            params.count = cumulative.saturating_sub(already_deployed.len()) as u32;
            params.unit = InstanceUnitType::Count;
        }
        let params = params
            .excluding(already_deployed.iter().map(|i| i.id.clone()))
            .excluding(running_artifact.iter().cloned());

        let report = EmptySelection {
            specific: params.select_specific_hosts,
            host_names: &params.host_names,
            cumulative,
            already_deployed: already_deployed.len(),
            unresolved: &[],
            mapping: &mapping,
        };

        if params.select_specific_hosts {
            let unresolved: Vec<String> = params
                .host_names
                .iter()
                .filter(|h| !infra_hosts.contains(h))
                .cloned()
                .collect();
            if !unresolved.is_empty() {
                return Ok(ExecutionResponse::failed(empty_selection_message(
                    &EmptySelection {
                        unresolved: &unresolved,
                        ..report
                    },
                )));
            }
        }

        let selected = inventory
            .select_instances(&app_id, &env_id, &infra_id, &params)
            .await?;
        debug!(
            step_execution_id = %step_id,
            selected = selected.len(),
            already_deployed = already_deployed.len(),
            excluded_by_artifact = running_artifact.len(),
            "instances selected"
        );

        let data = NodeSelectExecutionData {
            instance_count: params.count,
            instance_unit_type: unit,
            specific_hosts: params.select_specific_hosts,
            host_names: params.host_names.clone(),
            selected: selected.clone(),
            already_deployed: already_deployed.len(),
            excluded_by_artifact: running_artifact.len(),
        };

        if selected.is_empty() {
            if running_artifact.is_empty() {
                return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(empty_selection_message(&report))
                    .execution_data(snapshot(&data)?)
                    .build());
            }
            return Ok(ExecutionResponse::builder(ExecutionStatus::Success)
                .error_message(ARTIFACT_EXCLUSION_MESSAGE)
                .execution_data(snapshot(&data)?)
                .context_element(instances_element(&already_deployed, &selected))
                .build());
        }

        if selected.len() > infra_hosts.len() {
            return Err(CoreError::PolicyViolation(TOO_MANY_NODES_MESSAGE.to_string()));
        }

        // License ceiling across the run
        let tier = self.deps.accounts.license_tier(ctx.account_id()).await?;
        let limit = self.deps.config.license_limits.limit_for(tier);
        let reserved = self
            .deps
            .capacity
            .reserve(&run, &step_id, selected.len(), limit)?;

        let mut deployed = already_deployed.clone();
        deployed.extend(selected.iter().cloned());
        self.deps
            .output_store
            .save(
                &run,
                DEPLOYED_INSTANCES_OUTPUT,
                serde_json::to_value(&deployed)?,
                OutputScope::Workflow,
            )
            .await?;

        info!(
            step_execution_id = %step_id,
            selected = selected.len(),
            reserved,
            "nodes selected"
        );
        let mut response = ExecutionResponse::builder(ExecutionStatus::Success)
            .execution_data(snapshot(&data)?)
            .context_element(instances_element(&already_deployed, &selected));
        if let Some(message) = outcome.message() {
            response = response.error_message(message);
        }
        Ok(response.build())
    }
}

/// Every instance of the run so far; only this phase's picks are new
fn instances_element(already_deployed: &[Instance], selected: &[Instance]) -> ContextElement {
    let instances = already_deployed
        .iter()
        .map(|i| InstanceElement::from_instance(i, false))
        .chain(selected.iter().map(|i| InstanceElement::from_instance(i, true)))
        .collect();
    ContextElement::Instances { instances }
}

fn empty_selection_message(report: &EmptySelection<'_>) -> String {
    let mut message = String::from("No nodes were selected. ");
    if report.specific {
        if report.host_names.is_empty() {
            message.push_str("'Use Specific Hosts' was chosen but no host names were specified.");
        } else {
            message.push_str(&format!(
                "'Use Specific Hosts' was chosen with host [{}]",
                report.host_names.join(", ")
            ));
        }
    } else {
        message.push_str(&format!(
            "This phase deploys to {} instances (cumulative)",
            report.cumulative
        ));
    }
    message.push_str(&format!(
        " and {} instances have already been deployed.",
        report.already_deployed
    ));

    if !report.unresolved.is_empty() {
        let infra = report.mapping.name.as_deref().unwrap_or(&report.mapping.id);
        message.push_str(&format!(
            "\n\nThe service infrastructure [{}] does not have host [{}].",
            infra,
            report.unresolved.join(", ")
        ));
    }

    let hint = if report.specific {
        Some("Check whether you've selected a unique set of host names for each phase.".to_string())
    } else {
        match &report.mapping.kind {
            InfraKind::Physical => None,
            InfraKind::CloudFiltered => Some(
                "Check whether the filters specified in your service infrastructure are correct."
                    .to_string(),
            ),
            InfraKind::AutoScaleGroup { group_name } => Some(format!(
                "Check whether your Auto Scale group [{}] capacity has changed.",
                group_name.as_deref().unwrap_or("unknown")
            )),
        }
    };
    if let Some(hint) = hint {
        message.push_str("\n\n");
        message.push_str(&hint);
    }
    message
}

impl StepExecutorBase for NodeSelectStep {
    fn step_type(&self) -> StepType {
        StepType::NodeSelect
    }
}

#[async_trait]
impl StepExecutor for NodeSelectStep {
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse {
        respond(self.select_nodes(ctx.as_ref()).await)
    }
}
