//! Delivery guarantees of the correlation registry as seen through the engine.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use convoy_core::domain::remote_task::task_types;
use convoy_core::{
    CoreError, CorrelationId, DeliveryOutcome, ExecutionStatus, RemoteResult, StepExecutionId,
    TimeoutPolicy,
};
use convoy_integration_tests::utils::{harness_with_hosts, resume, INFRA};
use convoy_test_utils::assertions::{assert_message, assert_status};
use convoy_test_utils::builders::{command_step, container_rollout, DeploymentContextBuilder};
use pretty_assertions::assert_eq;
use serde_json::json;

fn exit_ok() -> RemoteResult {
    RemoteResult::success(json!({ "exit_code": 0 }))
}

#[tokio::test]
async fn second_delivery_is_a_duplicate() {
    let harness = harness_with_hosts(1);
    let ctx = DeploymentContextBuilder::new("cmd").phase(INFRA).build();
    harness
        .start(command_step("Restart", "systemctl restart web"), &ctx)
        .await
        .unwrap();

    let task = harness.queued(task_types::COMMAND).remove(0);
    assert_eq!(
        harness.service.waiting_step(&task.correlation_id),
        Some(StepExecutionId("cmd".into()))
    );

    let done = resume(&harness, &task, exit_ok()).await;
    assert_eq!(done.status, ExecutionStatus::Success);
    assert_eq!(harness.service.waiting_step(&task.correlation_id), None);

    assert_eq!(
        harness.deliver(&task.correlation_id, exit_ok()).await,
        Err(CoreError::DuplicateDelivery(task.correlation_id.0.clone()))
    );
    assert_eq!(
        harness.service.status(&StepExecutionId("cmd".into())).await.unwrap(),
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn released_run_forgets_delivered_ids() {
    let harness = harness_with_hosts(1);
    let done_ctx = DeploymentContextBuilder::new("cmd").phase(INFRA).build();
    let open_ctx = DeploymentContextBuilder::new("cmd-2").phase(INFRA).build();
    harness
        .start(command_step("Restart", "systemctl restart web"), &done_ctx)
        .await
        .unwrap();
    harness
        .start(command_step("Check", "curl -f localhost"), &open_ctx)
        .await
        .unwrap();
    let tasks = harness.queued(task_types::COMMAND);
    resume(&harness, &tasks[0], exit_ok()).await;

    assert_eq!(harness.release_run("run-1").await, Ok(1));
    assert_eq!(harness.correlations.owner(&tasks[0].correlation_id), None);
    assert_eq!(
        harness.deliver(&tasks[0].correlation_id, exit_ok()).await,
        Err(CoreError::CorrelationNotFound(tasks[0].correlation_id.0.clone()))
    );

    // The step still waiting keeps its registration
    let done = resume(&harness, &tasks[1], exit_ok()).await;
    assert_eq!(done.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn result_after_abort_is_late() {
    let harness = harness_with_hosts(1);
    let ctx = DeploymentContextBuilder::new("cmd").phase(INFRA).build();
    harness
        .start(command_step("Restart", "systemctl restart web"), &ctx)
        .await
        .unwrap();
    let task = harness.queued(task_types::COMMAND).remove(0);

    let aborted = harness.abort(&ctx).await.unwrap();
    assert_status(&aborted, ExecutionStatus::Aborted).unwrap();
    assert_message(&aborted, "Command step was aborted").unwrap();

    assert_eq!(
        harness.deliver(&task.correlation_id, exit_ok()).await,
        Err(CoreError::LateDelivery(task.correlation_id.0.clone()))
    );
}

#[tokio::test]
async fn result_after_timeout_is_late() {
    let harness = harness_with_hosts(1);
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let ctx = DeploymentContextBuilder::new("cmd").phase(INFRA).now(started).build();
    let definition = command_step("Restart", "systemctl restart web")
        .with_timeout(TimeoutPolicy::Fixed { secs: 90 });
    harness.start(definition, &ctx).await.unwrap();
    let task = harness.queued(task_types::COMMAND).remove(0);

    let expired_ids = harness
        .service
        .expired_steps(started + ChronoDuration::seconds(90))
        .await
        .unwrap();
    assert_eq!(expired_ids, vec![StepExecutionId("cmd".into())]);

    let expired = harness
        .expire(&ctx, started + ChronoDuration::seconds(90))
        .await
        .unwrap();
    assert_status(&expired, ExecutionStatus::Failed).unwrap();
    assert_message(&expired, "Command step timed out after 1m 30s").unwrap();

    assert_eq!(
        harness.deliver(&task.correlation_id, exit_ok()).await,
        Err(CoreError::LateDelivery(task.correlation_id.0.clone()))
    );
}

#[tokio::test]
async fn unknown_correlation_id_is_refused() {
    let harness = harness_with_hosts(0);
    let stray = CorrelationId("never-dispatched".into());
    assert_eq!(
        harness.deliver(&stray, exit_ok()).await,
        Err(CoreError::CorrelationNotFound("never-dispatched".into()))
    );
}

#[tokio::test]
async fn starting_twice_returns_the_recorded_response() {
    let harness = harness_with_hosts(1);
    let ctx = DeploymentContextBuilder::new("cmd").phase(INFRA).build();
    let first = harness
        .start(command_step("Restart", "systemctl restart web"), &ctx)
        .await
        .unwrap();
    let second = harness
        .start(command_step("Restart", "systemctl restart web"), &ctx)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.queued(task_types::COMMAND).len(), 1);
}

#[tokio::test]
async fn batch_results_are_buffered_until_complete() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("rollout").phase(INFRA).build();
    let paused = harness
        .start(container_rollout("registry.local/web:1.4.2", 2), &ctx)
        .await
        .unwrap();
    assert_eq!(paused.correlation_ids.len(), 2);

    let tasks = harness.queued(task_types::CONTAINER_DEPLOY);
    let outcome = harness
        .deliver(&tasks[1].correlation_id, RemoteResult::error("slot 1 pull failed"))
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Buffered { remaining: 1 });
    assert_eq!(
        harness.service.status(&StepExecutionId("rollout".into())).await.unwrap(),
        ExecutionStatus::Paused
    );

    let resumed = resume(&harness, &tasks[0], RemoteResult::success(json!({}))).await;
    assert_status(&resumed, ExecutionStatus::Failed).unwrap();
}
