// Convoy Integration Tests
//
// This crate contains integration tests that drive the step execution engine
// through the standard steps end to end.

/// Shared setup for the integration tests
pub mod utils {
    use convoy_core::domain::remote_task::RemoteTask;
    use convoy_core::{DeliveryOutcome, ExecutionResponse, RemoteResult};
    use convoy_test_utils::builders::{instance_pool, physical_infra};
    use convoy_test_utils::TestHarness;

    /// Infrastructure used by most tests
    pub const INFRA: &str = "infra-1";

    /// Harness with one physical infrastructure of `size` hosts
    pub fn harness_with_hosts(size: usize) -> TestHarness {
        let harness = TestHarness::new();
        harness.add_infra(physical_infra(INFRA), instance_pool(size));
        harness
    }

    /// Deliver a result and expect the step to resume
    pub async fn resume(harness: &TestHarness, task: &RemoteTask, result: RemoteResult) -> ExecutionResponse {
        match harness.deliver(&task.correlation_id, result).await {
            Ok(DeliveryOutcome::Resumed(response)) => response,
            other => panic!("expected the step to resume, got {:?}", other),
        }
    }
}
