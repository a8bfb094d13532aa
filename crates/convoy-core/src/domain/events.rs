use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use crate::domain::step::{CorrelationId, StepExecutionId, StepType};
use crate::types::ExecutionStatus;
use crate::CoreError;

/// Domain event trait for all events in the system
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the step execution this event is associated with
    fn step_execution_id(&self) -> &StepExecutionId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Receives domain events emitted by the engine
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle one event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

macro_rules! impl_domain_event {
    ($ty:ty, $name:expr) => {
        impl DomainEvent for $ty {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn step_execution_id(&self) -> &StepExecutionId {
                &self.step_execution_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        }
    };
}

/// Event: step execution started
#[derive(Debug)]
pub struct StepStarted {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Type of the step
    pub step_type: StepType,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepStarted, "step.started");

/// Event: step paused waiting on correlated results
#[derive(Debug)]
pub struct StepPaused {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Correlation ids the step waits on
    pub correlation_ids: Vec<CorrelationId>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepPaused, "step.paused");

/// Event: a complete batch was handed to the step
#[derive(Debug)]
pub struct StepResumed {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Correlation ids that completed the batch
    pub correlation_ids: Vec<CorrelationId>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepResumed, "step.resumed");

/// Event: step reached a terminal status
#[derive(Debug)]
pub struct StepCompleted {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Terminal status
    pub status: ExecutionStatus,
    /// Message attached to the response
    pub message: Option<String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepCompleted, "step.completed");

/// Event: a remote task was queued for the step
#[derive(Debug)]
pub struct TaskDispatched {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Correlation id of the task
    pub correlation_id: CorrelationId,
    /// Type of the task
    pub task_type: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(TaskDispatched, "task.dispatched");

/// Event: a late or duplicate result was refused
#[derive(Debug)]
pub struct DeliveryRejected {
    /// The step execution the id belonged to
    pub step_execution_id: StepExecutionId,
    /// The refused correlation id
    pub correlation_id: CorrelationId,
    /// Why it was refused
    pub reason: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(DeliveryRejected, "delivery.rejected");

/// Handler that only logs events
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

#[async_trait]
impl DomainEventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        tracing::debug!(
            event_type = event.event_type(),
            step_execution_id = %event.step_execution_id(),
            "domain event"
        );
        Ok(())
    }
}
