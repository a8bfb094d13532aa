//! Node selection rules exercised through the engine.

use convoy_core::scheduling::LicenseTier;
use convoy_core::{EngineConfig, ExecutionStatus, StepExecutionId, WorkflowExecutionId};
use convoy_integration_tests::utils::{harness_with_hosts, INFRA};
use convoy_steps::steps::node_select::ARTIFACT_EXCLUSION_MESSAGE;
use convoy_test_utils::assertions::{assert_message, assert_new_instances, assert_status};
use convoy_test_utils::builders::{
    auto_scale_infra, cloud_infra, instance_pool, physical_infra, select_count, select_hosts,
    select_percentage, DeploymentContextBuilder,
};
use convoy_test_utils::mocks::{create_mock_account_service, create_mock_inventory};
use convoy_test_utils::TestHarness;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn percentage_of_the_infrastructure_rounds_up() {
    let harness = harness_with_hosts(7);
    let ctx = DeploymentContextBuilder::new("select").phase(INFRA).build();

    let response = harness.start(select_percentage(50), &ctx).await.unwrap();
    assert_new_instances(&response, &["i-000", "i-001", "i-002", "i-003"]).unwrap();
}

#[tokio::test]
async fn execution_hosts_override_the_first_phase_only() {
    let harness = harness_with_hosts(6);
    let phase = |step: &str| {
        DeploymentContextBuilder::new(step)
            .phase(INFRA)
            .execution_hosts(&["host-004"])
            .build()
    };

    let first = harness.start(select_count(3), &phase("p1")).await.unwrap();
    assert_new_instances(&first, &["i-004"]).unwrap();
    assert_message(&first, "Targeted nodes have overridden configured nodes").unwrap();

    let second = harness.start(select_count(3), &phase("p2")).await.unwrap();
    assert_status(&second, ExecutionStatus::Success).unwrap();
    assert_message(
        &second,
        "No nodes selected as targeted nodes have already been deployed",
    )
    .unwrap();
    assert!(second.instances().is_none());
}

#[tokio::test]
async fn hosts_running_the_artifact_are_skipped() {
    let harness = harness_with_hosts(4);
    harness.inventory.set_running_artifact(
        INFRA,
        "build-12",
        vec!["i-000".to_string(), "i-002".to_string()],
    );
    let ctx = |step: &str| {
        DeploymentContextBuilder::new(step)
            .phase(INFRA)
            .artifact("build-12")
            .exclude_same_artifact()
            .build()
    };

    let response = harness.start(select_count(4), &ctx("p1")).await.unwrap();
    assert_new_instances(&response, &["i-001", "i-003"]).unwrap();

    // Everything left already runs the artifact
    let response = harness.start(select_count(4), &ctx("p2")).await.unwrap();
    assert_status(&response, ExecutionStatus::Success).unwrap();
    assert_message(&response, ARTIFACT_EXCLUSION_MESSAGE).unwrap();
}

#[tokio::test]
async fn specific_hosts_must_exist_in_the_infrastructure() {
    let harness = harness_with_hosts(3);
    let ctx = DeploymentContextBuilder::new("select")
        .phase(INFRA)
        .variable("extra", "host-002, host-009")
        .build();

    let response = harness
        .start(select_hosts(&["host-001", "${extra}"]), &ctx)
        .await
        .unwrap();
    assert_status(&response, ExecutionStatus::Failed).unwrap();
    assert_message(
        &response,
        "No nodes were selected. 'Use Specific Hosts' was chosen with host [host-001, host-002, host-009] \
         and 0 instances have already been deployed.\n\n\
         The service infrastructure [infra-1-hosts] does not have host [host-009].\n\n\
         Check whether you've selected a unique set of host names for each phase.",
    )
    .unwrap();
}

#[tokio::test]
async fn empty_cloud_selection_points_at_the_filters() {
    let harness = TestHarness::new();
    harness.add_infra(cloud_infra(INFRA), Vec::new());
    let ctx = DeploymentContextBuilder::new("select").phase(INFRA).build();

    let response = harness.start(select_count(2), &ctx).await.unwrap();
    assert_status(&response, ExecutionStatus::Failed).unwrap();
    assert_message(
        &response,
        "No nodes were selected. This phase deploys to 2 instances (cumulative) \
         and 0 instances have already been deployed.\n\n\
         Check whether the filters specified in your service infrastructure are correct.",
    )
    .unwrap();
}

#[tokio::test]
async fn auto_scale_groups_reject_specific_hosts() {
    let harness = TestHarness::new();
    harness.add_infra(auto_scale_infra(INFRA, "web-asg"), instance_pool(2));
    let ctx = DeploymentContextBuilder::new("select").phase(INFRA).build();

    let response = harness.start(select_hosts(&["host-000"]), &ctx).await.unwrap();
    assert_status(&response, ExecutionStatus::Failed).unwrap();
    assert_message(&response, "Cannot specify hosts when using an auto scale group").unwrap();
}

#[tokio::test]
async fn license_ceiling_spans_the_run() {
    let harness = harness_with_hosts(15);
    harness.accounts.set_tier("account-1", LicenseTier::Community);

    let p1 = DeploymentContextBuilder::new("p1").phase(INFRA).build();
    let first = harness.start(select_count(8), &p1).await.unwrap();
    assert_status(&first, ExecutionStatus::Success).unwrap();

    let p2 = DeploymentContextBuilder::new("p2").phase(INFRA).build();
    let second = harness.start(select_count(12), &p2).await.unwrap();
    assert_status(&second, ExecutionStatus::Failed).unwrap();
    assert_message(
        &second,
        "The license for this account does not allow more than 10 concurrent instance deployments. \
         Please contact support.",
    )
    .unwrap();
    assert_eq!(
        harness.deps.capacity.reserved(&WorkflowExecutionId("run-1".into())),
        8
    );

    // Another run has its own budget
    let other = DeploymentContextBuilder::new("p1-other").run("run-2").phase(INFRA).build();
    let response = harness.start(select_count(10), &other).await.unwrap();
    assert_status(&response, ExecutionStatus::Success).unwrap();
    assert_eq!(
        harness.service.status(&StepExecutionId("p2".into())).await.unwrap(),
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn released_run_returns_its_license_budget() {
    let harness = TestHarness::customized(EngineConfig::default(), |deps| {
        deps.inventory = Arc::new(create_mock_inventory(physical_infra(INFRA), instance_pool(15)));
        deps.accounts = Arc::new(create_mock_account_service(LicenseTier::Community));
    });
    let run = WorkflowExecutionId("run-1".into());

    let p1 = DeploymentContextBuilder::new("p1")
        .phase(INFRA)
        .execution_hosts(&["host-003"])
        .build();
    let first = harness.start(select_count(8), &p1).await.unwrap();
    assert_new_instances(&first, &["i-003"]).unwrap();

    let p2 = DeploymentContextBuilder::new("p2").phase(INFRA).build();
    let second = harness.start(select_count(12), &p2).await.unwrap();
    assert_status(&second, ExecutionStatus::Failed).unwrap();
    assert_eq!(harness.deps.capacity.reserved(&run), 1);
    assert!(harness.deps.host_overrides.claimant(&run).is_some());

    assert_eq!(harness.release_run("run-1").await, Ok(2));
    assert_eq!(harness.deps.capacity.reserved(&run), 0);
    assert_eq!(harness.deps.host_overrides.claimant(&run), None);
    assert!(!harness.deps.run_locks.tracks(&run));
}
