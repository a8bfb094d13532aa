//! Execution contexts for deployment phases.

use chrono::{DateTime, Utc};
use convoy_core::domain::repository::memory::{MemoryExecutionContext, MemoryExecutionContextBuilder};
use convoy_core::{
    ContextElement, ExecutionKind, PhaseElement, PhaseType, WorkflowStandardParams,
};

/// Phase element for an SSH phase over `infra_mapping_id`
pub fn phase_element(infra_mapping_id: &str) -> PhaseElement {
    PhaseElement {
        phase_name: "Phase 1".to_string(),
        phase_type: PhaseType::Ssh,
        service_id: "svc".to_string(),
        infra_mapping_id: infra_mapping_id.to_string(),
        artifact_id: None,
        rollback: false,
    }
}

/// Builds the context of one step inside a deployment phase
pub struct DeploymentContextBuilder {
    inner: MemoryExecutionContextBuilder,
    phase: Option<PhaseElement>,
    standard: WorkflowStandardParams,
}

impl DeploymentContextBuilder {
    /// Context for step `step_id` of run `run-1`
    pub fn new(step_id: &str) -> Self {
        Self {
            inner: MemoryExecutionContext::builder().step_execution_id(step_id),
            phase: None,
            standard: WorkflowStandardParams::default(),
        }
    }

    /// Run the step inside a phase over the infrastructure
    pub fn phase(mut self, infra_mapping_id: &str) -> Self {
        self.phase = Some(phase_element(infra_mapping_id));
        self
    }

    /// Use a specific phase element
    pub fn phase_element(mut self, phase: PhaseElement) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Artifact rolled out by the phase
    pub fn artifact(mut self, artifact_id: &str) -> Self {
        if let Some(phase) = self.phase.as_mut() {
            phase.artifact_id = Some(artifact_id.to_string());
        }
        self
    }

    /// Run id
    pub fn run(mut self, run_id: &str) -> Self {
        self.inner = self.inner.workflow_execution_id(run_id);
        self
    }

    /// Account id
    pub fn account(mut self, account_id: &str) -> Self {
        self.inner = self.inner.account_id(account_id);
        self
    }

    /// Run-wide execution host override
    pub fn execution_hosts(mut self, hosts: &[&str]) -> Self {
        self.standard.execution_hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    /// Skip hosts already running the artifact
    pub fn exclude_same_artifact(mut self) -> Self {
        self.standard.exclude_hosts_with_same_artifact = true;
        self
    }

    /// Expression variable
    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.inner = self.inner.variable(name, value);
        self
    }

    /// Pipeline or workflow run
    pub fn kind(mut self, kind: ExecutionKind) -> Self {
        self.inner = self.inner.kind(kind);
        self
    }

    /// Freeze the clock
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.inner = self.inner.now(now);
        self
    }

    /// Finish
    pub fn build(self) -> MemoryExecutionContext {
        let mut inner = self
            .inner
            .element(ContextElement::Standard(self.standard));
        if let Some(phase) = self.phase {
            inner = inner.element(ContextElement::Phase(phase));
        }
        inner.build()
    }
}
