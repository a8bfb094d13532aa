//! Step definitions for the standard steps.

use convoy_core::{InputValue, StepDefinition, StepType};
use serde_json::{json, Value};

/// Command step running `command`
pub fn command_step(name: &str, command: &str) -> StepDefinition {
    StepDefinition::new(slug(name), name, StepType::Command)
        .with_input("command", InputValue::literal(command))
}

/// Node select asking for `count` instances, cumulative across phases
pub fn select_count(count: u32) -> StepDefinition {
    StepDefinition::new("select-nodes", "Select Nodes", StepType::NodeSelect)
        .with_input("instance_count", InputValue::Literal(json!(count)))
}

/// Node select asking for a percentage of the infrastructure
pub fn select_percentage(percent: u32) -> StepDefinition {
    select_count(percent).with_input("instance_unit_type", InputValue::literal("PERCENTAGE"))
}

/// Node select targeting named hosts; entries may hold expressions
pub fn select_hosts(hosts: &[&str]) -> StepDefinition {
    StepDefinition::new("select-nodes", "Select Nodes", StepType::NodeSelect)
        .with_input("specific_hosts", InputValue::Literal(json!(true)))
        .with_input("host_names", InputValue::Literal(json!(hosts)))
}

/// Helm deploy of `chart` with inline values only
pub fn helm_deploy(chart: &str) -> StepDefinition {
    StepDefinition::new("helm-deploy", "Helm Deploy", StepType::HelmDeploy)
        .with_input("chart_name", InputValue::literal(chart))
}

/// Container rollout of `image` over `slots` container slots
pub fn container_rollout(image: &str, slots: usize) -> StepDefinition {
    StepDefinition::new("rollout", "Container Rollout", StepType::ContainerRollout)
        .with_input("image", InputValue::literal(image))
        .with_input("instance_count", InputValue::literal(slots.to_string()))
}

/// Manual approval
pub fn manual_approval() -> StepDefinition {
    approval(json!({ "kind": "manual" }))
}

/// Ticket approval driven by AND criteria, with an optional rejection status
pub fn ticket_criteria_approval(ticket: &str, approval_status: &str, rejection_status: Option<&str>) -> StepDefinition {
    let mut spec = json!({
        "kind": "ticket_criteria",
        "ticket": ticket,
        "approval": { "operator": "AND", "conditions": { "status": [approval_status] } },
    });
    if let Some(status) = rejection_status {
        spec["rejection"] = json!({ "conditions": { "status": [status] } });
    }
    approval(spec)
}

/// Ticket approval on a single status field
pub fn ticket_status_approval(ticket: &str, approval_value: &str, rejection_value: &str) -> StepDefinition {
    approval(json!({
        "kind": "ticket_status",
        "ticket": ticket,
        "approval_value": approval_value,
        "rejection_value": rejection_value,
    }))
}

fn approval(spec: Value) -> StepDefinition {
    StepDefinition::new("approval", "Approval", StepType::Approval)
        .with_input("approval", InputValue::Literal(spec))
}

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}
