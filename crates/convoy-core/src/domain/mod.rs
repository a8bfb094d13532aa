//! Domain layer - core models, collaborator interfaces and events

/// Approval criteria and change windows
pub mod approval;

/// Domain events
pub mod events;

/// Expression helpers
pub mod expression;

/// Instances and selection requests
pub mod instance;

/// Remote task envelope
pub mod remote_task;

/// Collaborator traits and in-memory implementations
pub mod repository;

/// Step definitions and identifiers
pub mod step;
