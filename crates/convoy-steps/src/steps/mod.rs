//! Standard step implementations

/// Ticket-driven and manual approval gates
pub mod approval;

/// Service command execution
pub mod command;

/// Multi-slot container rollout
pub mod container_rollout;

/// Helm release install with optional remote values
pub mod helm_deploy;

/// Phase node selection
pub mod node_select;
