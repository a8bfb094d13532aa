//! Mocks of the worker pool and the task dispatcher.

use async_trait::async_trait;
use convoy_core::domain::remote_task::{RemoteTask, TaskId};
use convoy_core::domain::repository::WorkerPool;
use convoy_core::{CoreError, CorrelationId, RemoteResult, StepExecutionId, TaskDispatcher};
use mockall::mock;
use serde_json::json;

mock! {
    pub WorkerPool {}

    #[async_trait]
    impl WorkerPool for WorkerPool {
        async fn queue_task(&self, task: RemoteTask) -> Result<TaskId, CoreError>;
        async fn execute_task_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError>;
    }
}

/// Creates a worker pool that accepts every task and answers synchronous
/// calls with an empty success.
pub fn create_mock_worker_pool() -> MockWorkerPool {
    let mut mock = MockWorkerPool::new();

    mock.expect_queue_task()
        .returning(|task| Ok(TaskId(format!("task-{}", task.correlation_id))));

    mock.expect_execute_task_sync()
        .returning(|_| Ok(RemoteResult::success(json!({}))));

    mock
}

mock! {
    pub TaskDispatcher {}

    #[async_trait]
    impl TaskDispatcher for TaskDispatcher {
        async fn dispatch(&self, step: &StepExecutionId, task: RemoteTask) -> Result<TaskId, CoreError>;
        async fn dispatch_batch(
            &self,
            step: &StepExecutionId,
            tasks: Vec<RemoteTask>,
        ) -> Result<Vec<CorrelationId>, CoreError>;
        async fn execute_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError>;
    }
}

/// Creates a dispatcher that accepts every task without registering anything.
pub fn create_mock_task_dispatcher() -> MockTaskDispatcher {
    let mut mock = MockTaskDispatcher::new();

    mock.expect_dispatch()
        .returning(|_, task| Ok(TaskId(format!("task-{}", task.correlation_id))));

    mock.expect_dispatch_batch()
        .returning(|_, tasks| Ok(tasks.into_iter().map(|t| t.correlation_id).collect()));

    mock.expect_execute_sync()
        .returning(|_| Ok(RemoteResult::success(json!({}))));

    mock
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::domain::remote_task::task_types;

    #[tokio::test]
    async fn test_mock_worker_pool_default_behavior() {
        let pool = create_mock_worker_pool();
        let task = RemoteTask::builder(task_types::COMMAND, CorrelationId("c1".into())).build();

        let task_id = pool.queue_task(task.clone()).await.unwrap();
        assert_eq!(task_id, TaskId("task-c1".into()));
        assert_eq!(
            pool.execute_task_sync(task).await.unwrap(),
            RemoteResult::success(json!({}))
        );
    }

    #[tokio::test]
    async fn test_mock_dispatcher_custom_behavior() {
        let mut dispatcher = MockTaskDispatcher::new();
        dispatcher
            .expect_dispatch()
            .times(1)
            .returning(|_, _| Err(CoreError::ExternalDependency("pool full".into())));

        let task = RemoteTask::builder(task_types::HELM_INSTALL, CorrelationId("c2".into())).build();
        let result = dispatcher.dispatch(&StepExecutionId("s1".into()), task).await;
        assert_eq!(result, Err(CoreError::ExternalDependency("pool full".into())));
    }
}
