/// Approval gate decisions
pub mod approval_gate;

/// Correlation id bookkeeping
pub mod correlation_registry;

/// Step execution engine
pub mod step_execution_service;

/// Step type to executor factories
pub mod step_registry;

/// Remote task dispatch
pub mod task_dispatcher;
