//! License-tier ceilings and the run-scoped concurrent instance counter

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::RunScoped;
use crate::domain::step::{StepExecutionId, WorkflowExecutionId};
use crate::CoreError;

/// License tier of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseTier {
    /// Free tier
    Community,
    /// Entry paid tier
    Essentials,
    /// Trial
    Trial,
    /// Paid
    Paid,
}

/// Concurrent instance ceilings per tier; `None` means unlimited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLimits {
    /// Community ceiling
    #[serde(default = "default_community_limit")]
    pub community: Option<usize>,
    /// Essentials ceiling
    #[serde(default = "default_essentials_limit")]
    pub essentials: Option<usize>,
    /// Trial ceiling
    #[serde(default)]
    pub trial: Option<usize>,
    /// Paid ceiling
    #[serde(default)]
    pub paid: Option<usize>,
}

fn default_community_limit() -> Option<usize> {
    Some(10)
}

fn default_essentials_limit() -> Option<usize> {
    Some(100)
}

impl Default for LicenseLimits {
    fn default() -> Self {
        Self {
            community: default_community_limit(),
            essentials: default_essentials_limit(),
            trial: None,
            paid: None,
        }
    }
}

impl LicenseLimits {
    /// Ceiling for a tier
    pub fn limit_for(&self, tier: LicenseTier) -> Option<usize> {
        match tier {
            LicenseTier::Community => self.community,
            LicenseTier::Essentials => self.essentials,
            LicenseTier::Trial => self.trial,
            LicenseTier::Paid => self.paid,
        }
    }
}

/// Message for a run that would exceed its tier's ceiling
pub fn license_limit_message(limit: usize) -> String {
    format!(
        "The license for this account does not allow more than {} concurrent instance deployments. Please contact support.",
        limit
    )
}

/// Per-run count of instances reserved by each phase.
///
/// A reservation reads and updates the run's entry under the map's entry
/// lock, so concurrently executing phases of one run never both fit under
/// the ceiling when together they exceed it.
#[derive(Debug, Default)]
pub struct CapacityGuard {
    runs: DashMap<WorkflowExecutionId, HashMap<StepExecutionId, usize>>,
}

impl CapacityGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` instances for `phase`, replacing its previous reservation.
    ///
    /// Returns the run's new total, or a policy violation when the total would
    /// exceed `limit`; the previous reservation is kept in that case.
    pub fn reserve(
        &self,
        run: &WorkflowExecutionId,
        phase: &StepExecutionId,
        count: usize,
        limit: Option<usize>,
    ) -> Result<usize, CoreError> {
        let mut entry = self.runs.entry(run.clone()).or_default();
        let others: usize = entry
            .iter()
            .filter(|(p, _)| *p != phase)
            .map(|(_, n)| *n)
            .sum();
        let total = others + count;

        if let Some(limit) = limit {
            if total > limit {
                debug!(run = %run, phase = %phase, total, limit, "license ceiling exceeded");
                return Err(CoreError::PolicyViolation(license_limit_message(limit)));
            }
        }

        entry.insert(phase.clone(), count);
        Ok(total)
    }

    /// Instances reserved for a run
    pub fn reserved(&self, run: &WorkflowExecutionId) -> usize {
        self.runs.get(run).map(|r| r.values().sum()).unwrap_or(0)
    }
}

impl RunScoped for CapacityGuard {
    fn release_run(&self, run: &WorkflowExecutionId) {
        self.runs.remove(run);
    }
}
