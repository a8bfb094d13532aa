//! A rolling deployment driven through the engine: select nodes, run a
//! command on them, then roll out containers and a Helm release.

use convoy_core::domain::remote_task::task_types;
use convoy_core::{
    ContextElement, ContextElementKind, DeliveryOutcome, ExecutionStatus, RemoteResult,
    StepExecutionId, WorkflowExecutionId,
};
use convoy_integration_tests::utils::{harness_with_hosts, resume, INFRA};
use convoy_steps::steps::node_select::DEPLOYED_INSTANCES_OUTPUT;
use convoy_test_utils::assertions::{assert_new_instances, assert_status};
use convoy_test_utils::builders::{
    command_step, container_rollout, helm_deploy, select_count, DeploymentContextBuilder,
};
use convoy_core::domain::repository::OutputStore;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn rolling_deployment_across_two_phases() {
    let harness = harness_with_hosts(6);

    // Phase 1: two hosts, then a command on them
    let phase1 = DeploymentContextBuilder::new("phase-1-select").phase(INFRA).build();
    let selected = harness.start(select_count(2), &phase1).await.unwrap();
    assert_status(&selected, ExecutionStatus::Success).unwrap();
    assert_new_instances(&selected, &["i-000", "i-001"]).unwrap();

    let command_ctx = DeploymentContextBuilder::new("phase-1-restart").phase(INFRA).build();
    let paused = harness
        .start(command_step("Restart", "systemctl restart web"), &command_ctx)
        .await
        .unwrap();
    assert_status(&paused, ExecutionStatus::Paused).unwrap();
    let task = harness.queued(task_types::COMMAND).remove(0);
    let done = resume(&harness, &task, RemoteResult::success(json!({ "exit_code": 0 }))).await;
    assert_eq!(done.status, ExecutionStatus::Success);

    // Phase 2: cumulative count of 5 adds three more hosts
    let phase2 = DeploymentContextBuilder::new("phase-2-select").phase(INFRA).build();
    let selected = harness.start(select_count(5), &phase2).await.unwrap();
    assert_new_instances(&selected, &["i-002", "i-003", "i-004"]).unwrap();
    assert_eq!(selected.instances().unwrap().len(), 5);

    let deployed = harness
        .outputs
        .find(&WorkflowExecutionId("run-1".into()), DEPLOYED_INSTANCES_OUTPUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployed.value.as_array().unwrap().len(), 5);
    assert_eq!(
        harness.deps.capacity.reserved(&WorkflowExecutionId("run-1".into())),
        5
    );
}

#[tokio::test]
async fn failed_command_fails_the_step() {
    let harness = harness_with_hosts(1);
    let ctx = DeploymentContextBuilder::new("restart").phase(INFRA).build();

    harness
        .start(command_step("Restart", "systemctl restart web"), &ctx)
        .await
        .unwrap();
    let task = harness.queued(task_types::COMMAND).remove(0);
    let failed = resume(&harness, &task, RemoteResult::error("Unit web.service not found")).await;

    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("Unit web.service not found"));
    assert_eq!(
        harness.service.status(&StepExecutionId("restart".into())).await.unwrap(),
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn container_rollout_resumes_once_every_slot_reported() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("rollout").phase(INFRA).build();

    let paused = harness
        .start(container_rollout("registry/web:2", 3), &ctx)
        .await
        .unwrap();
    assert_eq!(paused.correlation_ids.len(), 3);

    let tasks = harness.queued(task_types::CONTAINER_DEPLOY);
    for (remaining, task) in [(2, &tasks[2]), (1, &tasks[0])] {
        let outcome = harness
            .deliver(&task.correlation_id, RemoteResult::success(json!({ "container_id": task.correlation_id.0 })))
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Buffered { remaining });
    }

    let done = resume(&harness, &tasks[1], RemoteResult::success(json!({}))).await;
    assert_eq!(done.status, ExecutionStatus::Success);
    assert_eq!(done.instances().unwrap().len(), 3);
}

#[tokio::test]
async fn helm_release_is_installed_after_reading_history() {
    let harness = harness_with_hosts(0);
    harness.pool.set_sync_result(
        task_types::HELM_RELEASE_HISTORY,
        RemoteResult::success(json!({ "revisions": [{ "revision": 7 }] })),
    );
    let ctx = DeploymentContextBuilder::new("helm").phase(INFRA).build();

    let paused = harness.start(helm_deploy("stable/web"), &ctx).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(harness.pool.sync_calls().len(), 1);

    let install = harness.queued(task_types::HELM_INSTALL).remove(0);
    let done = resume(&harness, &install, RemoteResult::success(json!({ "revision": 8 }))).await;
    assert_eq!(done.status, ExecutionStatus::Success);

    let release = done
        .context_elements
        .iter()
        .find(|e| e.kind() == ContextElementKind::Custom("helm_release".into()))
        .cloned();
    match release {
        Some(ContextElement::Custom { value, .. }) => {
            assert_eq!(value["revision"], json!(8));
            assert_eq!(value["previous_revision"], json!(7));
        }
        other => panic!("expected a helm_release element, got {:?}", other),
    }
}
