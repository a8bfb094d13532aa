//! Node selection scheduling
//!
//! [`selector`] is the pure algorithm. [`host_override`], [`capacity`] and
//! [`run_lock`] hold the run-scoped state shared by concurrently executing
//! phases.

use crate::domain::step::WorkflowExecutionId;

/// License ceilings and the run-scoped instance counter
pub mod capacity;

/// Execution-host override claims
pub mod host_override;

/// Per-run locks around selection
pub mod run_lock;

/// Pure selection algorithm
pub mod selector;

pub use capacity::{CapacityGuard, LicenseLimits, LicenseTier};
pub use host_override::{HostOverrideLedger, OverrideOutcome};
pub use run_lock::RunLocks;
pub use selector::{expand_host_names, select, target_count, SelectionError};

/// State kept per run until the run finishes
pub trait RunScoped: Send + Sync {
    /// Forget everything held for a finished run
    fn release_run(&self, run: &WorkflowExecutionId);
}
