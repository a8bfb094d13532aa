//! Approval gates driven through the engine.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use convoy_core::{CoreError, DeliveryOutcome, ExecutionKind, ExecutionStatus, RemoteResult};
use convoy_integration_tests::utils::harness_with_hosts;
use convoy_test_utils::assertions::{assert_message, assert_status};
use convoy_test_utils::builders::{
    manual_approval, ticket_criteria_approval, ticket_status_approval, DeploymentContextBuilder,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;

#[tokio::test]
async fn manual_approval_is_decided_by_a_person() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("approve").build();

    let paused = harness.start(manual_approval(), &ctx).await.unwrap();
    assert_status(&paused, ExecutionStatus::Paused).unwrap();

    let outcome = harness
        .deliver(
            &paused.correlation_ids[0],
            RemoteResult::success(json!({ "action": "REJECT", "approved_by": "ops-lead" })),
        )
        .await
        .unwrap();
    match outcome {
        DeliveryOutcome::Resumed(response) => {
            assert_status(&response, ExecutionStatus::Rejected).unwrap();
            assert_message(&response, "Rejected by ops-lead").unwrap();
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn ticket_approval_polls_until_approved() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("approve")
        .variable("change", "CHG-100")
        .build();

    let paused = harness
        .start(ticket_criteria_approval("${change}", "Approved", Some("Rejected")), &ctx)
        .await
        .unwrap();
    assert_message(&paused, "Waiting for approval on Ticket CHG-100").unwrap();

    // The poller answers with the current fields; still pending
    let first_poll = paused.correlation_ids[0].clone();
    let pending = match harness
        .deliver(&first_poll, RemoteResult::success(json!({ "status": "Review" })))
        .await
        .unwrap()
    {
        DeliveryOutcome::Resumed(response) => response,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_status(&pending, ExecutionStatus::Paused).unwrap();
    let second_poll = pending.correlation_ids[0].clone();
    assert_ne!(first_poll, second_poll);
    assert_eq!(harness.polls.registrations().len(), 2);

    // The first poll id is spent
    assert_eq!(
        harness
            .deliver(&first_poll, RemoteResult::success(json!({ "status": "Approved" })))
            .await,
        Err(CoreError::DuplicateDelivery(first_poll.0.clone()))
    );

    // Poller with no payload makes the step read the ticket itself
    harness.tickets.set_snapshot(
        "CHG-100",
        HashMap::from([("status".to_string(), "approved".to_string())]),
    );
    let approved = match harness
        .deliver(&second_poll, RemoteResult::success(json!(null)))
        .await
        .unwrap()
    {
        DeliveryOutcome::Resumed(response) => response,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_status(&approved, ExecutionStatus::Success).unwrap();
    assert_message(&approved, "Approval provided on Ticket: CHG-100").unwrap();
}

#[tokio::test]
async fn ticket_status_rejection() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("approve").build();

    let paused = harness
        .start(ticket_status_approval("OPS-9", "Done", "Won't Do"), &ctx)
        .await
        .unwrap();
    let outcome = harness
        .deliver(&paused.correlation_ids[0], RemoteResult::success(json!({ "status": "won't do" })))
        .await
        .unwrap();
    match outcome {
        DeliveryOutcome::Resumed(response) => {
            assert_status(&response, ExecutionStatus::Rejected).unwrap();
            assert_message(&response, "Rejection provided on Ticket: OPS-9").unwrap();
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn unanswered_approval_times_out() {
    let harness = harness_with_hosts(0);
    let started = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let ctx = DeploymentContextBuilder::new("approve")
        .kind(ExecutionKind::Pipeline)
        .now(started)
        .build();

    let paused = harness.start(manual_approval(), &ctx).await.unwrap();

    // Not yet due
    let early = harness
        .expire(&ctx, started + ChronoDuration::days(6))
        .await
        .unwrap();
    assert_eq!(early.status, ExecutionStatus::Paused);

    let expired = harness
        .expire(&ctx, started + ChronoDuration::days(7))
        .await
        .unwrap();
    assert_status(&expired, ExecutionStatus::Failed).unwrap();
    assert_message(&expired, "Pipeline was not approved within 7d").unwrap();

    assert_eq!(
        harness
            .deliver(&paused.correlation_ids[0], RemoteResult::success(json!({ "action": "APPROVE" })))
            .await,
        Err(CoreError::LateDelivery(paused.correlation_ids[0].0.clone()))
    );
}

#[tokio::test]
async fn aborted_approval_reports_the_run_kind() {
    let harness = harness_with_hosts(0);
    let ctx = DeploymentContextBuilder::new("approve")
        .kind(ExecutionKind::Workflow)
        .build();
    harness.start(manual_approval(), &ctx).await.unwrap();

    let aborted = harness.abort(&ctx).await.unwrap();
    assert_status(&aborted, ExecutionStatus::Aborted).unwrap();
    assert_message(&aborted, "Workflow was aborted").unwrap();

    // Aborting again is a no-op
    let again = harness.abort(&ctx).await.unwrap();
    assert_eq!(again, aborted);
}
