use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::domain::step::{CorrelationId, StepExecutionId};
use crate::types::RemoteResult;
use crate::CoreError;

/// Why a correlation id no longer accepts results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    /// A result was delivered
    Delivered,
    /// The awaiting step was aborted, timed out or finished without it
    Cancelled,
}

/// Results collected for the batch a step currently awaits
#[derive(Debug, Default)]
struct Batch {
    expected: Vec<CorrelationId>,
    received: HashMap<CorrelationId, RemoteResult>,
}

/// Progress of a batch after accepting one result
#[derive(Debug, Clone, PartialEq)]
pub enum BatchProgress {
    /// More results are awaited
    Pending {
        /// Results still missing
        remaining: usize,
    },
    /// Every awaited result arrived
    Complete(HashMap<CorrelationId, RemoteResult>),
}

/// Process-wide map from correlation id to the step awaiting it.
///
/// Every id is delivered at most once. Ids that were delivered or cancelled
/// are remembered so that repeated deliveries are reported rather than lost.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    waits: DashMap<CorrelationId, StepExecutionId>,
    batches: DashMap<StepExecutionId, Batch>,
    retired: DashMap<CorrelationId, (StepExecutionId, Retirement)>,
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a correlation id to the step that awaits it
    pub fn register(&self, step: &StepExecutionId, id: &CorrelationId) -> Result<(), CoreError> {
        if self.retired.contains_key(id) {
            return Err(CoreError::DuplicateDelivery(id.0.clone()));
        }
        match self.waits.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) if existing.get() != step => {
                Err(CoreError::Other(format!(
                    "Correlation id {} is already awaited by step {}",
                    id,
                    existing.get()
                )))
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                trace!(step_execution_id = %step, correlation_id = %id, "correlation registered");
                slot.insert(step.clone());
                Ok(())
            }
        }
    }

    /// Drop a registration whose task never left the process
    pub fn unregister(&self, id: &CorrelationId) {
        self.waits.remove(id);
    }

    /// Step awaiting a correlation id
    pub fn lookup(&self, id: &CorrelationId) -> Result<StepExecutionId, CoreError> {
        if let Some(step) = self.waits.get(id) {
            return Ok(step.clone());
        }
        Err(self.rejection(id))
    }

    /// Step a correlation id belonged to, whether or not it still waits
    pub fn owner(&self, id: &CorrelationId) -> Option<StepExecutionId> {
        self.waits
            .get(id)
            .map(|s| s.clone())
            .or_else(|| self.retired.get(id).map(|r| r.0.clone()))
    }

    /// Seal the batch a step awaits. Ids not yet registered are registered now.
    pub fn await_batch(
        &self,
        step: &StepExecutionId,
        ids: &[CorrelationId],
    ) -> Result<(), CoreError> {
        for id in ids {
            self.register(step, id)?;
        }
        self.batches.insert(
            step.clone(),
            Batch {
                expected: ids.to_vec(),
                received: HashMap::new(),
            },
        );
        debug!(step_execution_id = %step, expected = ids.len(), "batch sealed");
        Ok(())
    }

    /// Accept one result for a step, consuming the correlation id
    pub fn accept(
        &self,
        step: &StepExecutionId,
        id: &CorrelationId,
        result: RemoteResult,
    ) -> Result<BatchProgress, CoreError> {
        match self.waits.remove_if(id, |_, owner| owner == step) {
            Some(_) => {}
            None => return Err(self.rejection(id)),
        }
        self.retired
            .insert(id.clone(), (step.clone(), Retirement::Delivered));

        let mut batch = self.batches.entry(step.clone()).or_insert_with(|| Batch {
            expected: vec![id.clone()],
            received: HashMap::new(),
        });
        batch.received.insert(id.clone(), result);

        let remaining = batch
            .expected
            .iter()
            .filter(|e| !batch.received.contains_key(*e))
            .count();
        if remaining > 0 {
            return Ok(BatchProgress::Pending { remaining });
        }
        drop(batch);

        let received = self
            .batches
            .remove(step)
            .map(|(_, b)| b.received)
            .unwrap_or_default();
        Ok(BatchProgress::Complete(received))
    }

    /// Correlation ids a step still awaits
    pub fn pending_for(&self, step: &StepExecutionId) -> Vec<CorrelationId> {
        let mut ids: Vec<CorrelationId> = self
            .waits
            .iter()
            .filter(|e| e.value() == step)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every registration of a step; later deliveries are late
    pub fn cancel_step(&self, step: &StepExecutionId) -> Vec<CorrelationId> {
        let cancelled = self.pending_for(step);
        for id in &cancelled {
            self.waits.remove(id);
            self.retired
                .insert(id.clone(), (step.clone(), Retirement::Cancelled));
        }
        self.batches.remove(step);
        if !cancelled.is_empty() {
            debug!(step_execution_id = %step, cancelled = cancelled.len(), "registrations cancelled");
        }
        cancelled
    }

    /// Rebuild the batch a persisted step awaits, with the results it had
    /// already received. A step whose batch is live is left untouched.
    ///
    /// Returns whether the batch was restored.
    pub fn restore_batch(
        &self,
        step: &StepExecutionId,
        expected: &[CorrelationId],
        received: &[(CorrelationId, RemoteResult)],
    ) -> Result<bool, CoreError> {
        if self.batches.contains_key(step) {
            return Ok(false);
        }
        for id in expected {
            if received.iter().any(|(r, _)| r == id) {
                self.waits.remove(id);
                self.retired
                    .insert(id.clone(), (step.clone(), Retirement::Delivered));
            } else {
                self.register(step, id)?;
            }
        }
        self.batches.insert(
            step.clone(),
            Batch {
                expected: expected.to_vec(),
                received: received.iter().cloned().collect(),
            },
        );
        debug!(
            step_execution_id = %step,
            expected = expected.len(),
            received = received.len(),
            "batch restored"
        );
        Ok(true)
    }

    /// Drop everything remembered about a finished step
    pub fn forget_step(&self, step: &StepExecutionId) -> usize {
        let before = self.retired.len();
        self.retired.retain(|_, (owner, _)| owner != step);
        self.waits.retain(|_, owner| owner != step);
        self.batches.remove(step);
        before.saturating_sub(self.retired.len())
    }

    fn rejection(&self, id: &CorrelationId) -> CoreError {
        match self.retired.get(id).map(|r| r.1) {
            Some(Retirement::Delivered) => CoreError::DuplicateDelivery(id.0.clone()),
            Some(Retirement::Cancelled) => CoreError::LateDelivery(id.0.clone()),
            None => CoreError::CorrelationNotFound(id.0.clone()),
        }
    }
}
