//! Per-run exclusion for the read, select and record sequence of a phase

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::RunScoped;
use crate::domain::step::WorkflowExecutionId;

/// One async lock per run.
///
/// Phases of the same run take the lock while they read earlier selections,
/// pick their instances and record them, so two phases never pick the same
/// host. Phases of different runs do not contend.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: DashMap<WorkflowExecutionId, Arc<Mutex<()>>>,
}

impl RunLocks {
    /// Create an empty set of locks
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the run's lock
    pub async fn acquire(&self, run: &WorkflowExecutionId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(run.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!(run = %run, "waiting for run lock");
        lock.lock_owned().await
    }

    /// Whether a lock exists for the run
    pub fn tracks(&self, run: &WorkflowExecutionId) -> bool {
        self.locks.contains_key(run)
    }
}

impl RunScoped for RunLocks {
    fn release_run(&self, run: &WorkflowExecutionId) {
        self.locks.remove(run);
    }
}
