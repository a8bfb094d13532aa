use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::correlation_registry::CorrelationRegistry;
use crate::domain::events::{DomainEventHandler, TaskDispatched};
use crate::domain::remote_task::{RemoteTask, TaskId};
use crate::domain::repository::WorkerPool;
use crate::domain::step::{CorrelationId, StepExecutionId};
use crate::types::RemoteResult;
use crate::CoreError;

/// Submits remote tasks on behalf of steps
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Register the task's correlation id for `step` and enqueue the task
    async fn dispatch(&self, step: &StepExecutionId, task: RemoteTask) -> Result<TaskId, CoreError>;

    /// Dispatch several tasks for one step, returning their correlation ids in order
    async fn dispatch_batch(
        &self,
        step: &StepExecutionId,
        tasks: Vec<RemoteTask>,
    ) -> Result<Vec<CorrelationId>, CoreError> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = task.correlation_id.clone();
            self.dispatch(step, task).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Run a task synchronously; nothing is registered
    async fn execute_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError>;
}

/// Dispatcher backed by a [`WorkerPool`] and the [`CorrelationRegistry`]
pub struct RemoteTaskDispatcher {
    worker_pool: Arc<dyn WorkerPool>,
    registry: Arc<CorrelationRegistry>,
    event_handler: Option<Arc<dyn DomainEventHandler>>,
}

impl RemoteTaskDispatcher {
    /// Create a dispatcher
    pub fn new(worker_pool: Arc<dyn WorkerPool>, registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            worker_pool,
            registry,
            event_handler: None,
        }
    }

    /// Emit a [`TaskDispatched`] event for every queued task
    pub fn with_event_handler(mut self, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }
}

#[async_trait]
impl TaskDispatcher for RemoteTaskDispatcher {
    async fn dispatch(&self, step: &StepExecutionId, task: RemoteTask) -> Result<TaskId, CoreError> {
        let correlation_id = task.correlation_id.clone();
        let task_type = task.task_type.clone();

        // Register first so a fast worker can never answer an unknown id
        self.registry.register(step, &correlation_id)?;

        let task_id = match self.worker_pool.queue_task(task).await {
            Ok(task_id) => task_id,
            Err(e) => {
                self.registry.unregister(&correlation_id);
                warn!(
                    step_execution_id = %step,
                    correlation_id = %correlation_id,
                    task_type = %task_type,
                    "worker pool rejected task: {}",
                    e
                );
                return Err(match e {
                    CoreError::ExternalDependency(_) => e,
                    other => CoreError::ExternalDependency(other.to_string()),
                });
            }
        };

        debug!(
            step_execution_id = %step,
            correlation_id = %correlation_id,
            task_type = %task_type,
            task_id = %task_id.0,
            "task dispatched"
        );

        if let Some(handler) = &self.event_handler {
            let event = TaskDispatched {
                step_execution_id: step.clone(),
                correlation_id,
                task_type,
                timestamp: chrono::Utc::now(),
            };
            if let Err(e) = handler.handle_event(Box::new(event)).await {
                warn!("Failed to handle task.dispatched event: {}", e);
            }
        }

        Ok(task_id)
    }

    async fn execute_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError> {
        debug!(task_type = %task.task_type, correlation_id = %task.correlation_id, "executing task synchronously");
        self.worker_pool.execute_task_sync(task).await
    }
}
