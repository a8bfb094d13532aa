//! Cross-phase propagation of a run's explicit execution-host override

use dashmap::DashMap;

use crate::domain::instance::SelectionParams;
use super::RunScoped;
use crate::domain::step::{StepExecutionId, WorkflowExecutionId};

/// Message reported by the phase that claims the override
pub const OVERRIDE_CLAIMED_MESSAGE: &str = "Targeted nodes have overridden configured nodes";

/// Message reported by phases running after the override was claimed
pub const OVERRIDE_ALREADY_DEPLOYED_MESSAGE: &str =
    "No nodes selected as targeted nodes have already been deployed";

/// What the override did to a phase's selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideOutcome {
    /// The run declares no override
    NotOverridden,
    /// This phase owns the override and deploys to exactly those hosts
    Claimed,
    /// Another phase already owns the override; select nothing
    AlreadyClaimed,
}

impl OverrideOutcome {
    /// Informational message for the phase
    pub fn message(&self) -> Option<&'static str> {
        match self {
            OverrideOutcome::NotOverridden => None,
            OverrideOutcome::Claimed => Some(OVERRIDE_CLAIMED_MESSAGE),
            OverrideOutcome::AlreadyClaimed => Some(OVERRIDE_ALREADY_DEPLOYED_MESSAGE),
        }
    }
}

/// Records which phase of each run claimed the execution-host override
#[derive(Debug, Default)]
pub struct HostOverrideLedger {
    claims: DashMap<WorkflowExecutionId, StepExecutionId>,
}

impl HostOverrideLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the run's override to `params`.
    ///
    /// The first phase to call this for a run claims the hosts. Calls from the
    /// same phase are repeatable; every other phase of the run gets a zero count.
    pub fn process_execution_hosts(
        &self,
        run: &WorkflowExecutionId,
        phase: &StepExecutionId,
        execution_hosts: &[String],
        params: &mut SelectionParams,
    ) -> OverrideOutcome {
        if execution_hosts.is_empty() {
            return OverrideOutcome::NotOverridden;
        }

        let claimant = self
            .claims
            .entry(run.clone())
            .or_insert_with(|| phase.clone())
            .clone();

        if &claimant == phase {
            params.select_specific_hosts = true;
            params.host_names = execution_hosts.to_vec();
            params.count = execution_hosts.len() as u32;
            OverrideOutcome::Claimed
        } else {
            params.select_specific_hosts = false;
            params.host_names.clear();
            params.count = 0;
            OverrideOutcome::AlreadyClaimed
        }
    }

    /// Phase that claimed the run's override
    pub fn claimant(&self, run: &WorkflowExecutionId) -> Option<StepExecutionId> {
        self.claims.get(run).map(|c| c.clone())
    }
}

impl RunScoped for HostOverrideLedger {
    fn release_run(&self, run: &WorkflowExecutionId) {
        self.claims.remove(run);
    }
}
