use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::correlation_registry::{BatchProgress, CorrelationRegistry};
use crate::application::step_registry::StepRegistry;
use crate::domain::events::{
    DeliveryRejected, DomainEvent, DomainEventHandler, StepCompleted, StepPaused, StepResumed,
    StepStarted,
};
use crate::domain::repository::{StepExecutionRecord, StepStateRepository};
use crate::domain::step::{CorrelationId, StepDefinition, StepExecutionId, WorkflowExecutionId};
use crate::types::{
    format_duration, AbortReason, ContextElement, ContextElementKind, ExecutionKind,
    ExecutionResponse, ExecutionStatus, RemoteResult, StepExecutionData,
};
use crate::logging::LogExt;
use crate::scheduling::RunScoped;
use crate::{CoreError, EngineConfig, ExecutionContext};

/// What happened to a delivered result
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The result was stored; the step still awaits others of its batch
    Buffered {
        /// Results still missing
        remaining: usize,
    },
    /// The batch completed and the step was resumed
    Resumed(ExecutionResponse),
}

/// Drives steps through execute, pause, resume and teardown
pub struct StepExecutionService {
    /// Factories for step executors
    registry: Arc<StepRegistry>,

    /// Pending correlations
    correlations: Arc<CorrelationRegistry>,

    /// Repository for step execution state
    state_repo: Arc<dyn StepStateRepository>,

    /// Event handler
    event_handler: Arc<dyn DomainEventHandler>,

    /// Timeouts and policies
    config: Arc<EngineConfig>,

    /// One lock per step execution
    step_locks: DashMap<StepExecutionId, Arc<Mutex<()>>>,

    /// Run-scoped state dropped when a run is released
    run_state: Vec<Arc<dyn RunScoped>>,
}

impl StepExecutionService {
    /// Create a new step execution service
    pub fn new(
        registry: Arc<StepRegistry>,
        correlations: Arc<CorrelationRegistry>,
        state_repo: Arc<dyn StepStateRepository>,
        event_handler: Arc<dyn DomainEventHandler>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            correlations,
            state_repo,
            event_handler,
            config,
            step_locks: DashMap::new(),
            run_state: Vec::new(),
        }
    }

    /// Also release `state` when a run is released
    pub fn with_run_state(mut self, state: Arc<dyn RunScoped>) -> Self {
        self.run_state.push(state);
        self
    }

    /// Correlation registry used by the service
    pub fn correlations(&self) -> &Arc<CorrelationRegistry> {
        &self.correlations
    }

    /// Run a step for the first time.
    ///
    /// Starting a step that already has a record returns the stored response
    /// without executing it again.
    pub async fn start(
        &self,
        definition: StepDefinition,
        ctx: Arc<dyn ExecutionContext>,
    ) -> Result<ExecutionResponse, CoreError> {
        let step_id = ctx.step_execution_id().clone();
        let lock = self.lock_for(&step_id);
        let _guard = lock.lock().await;

        // Already started
        if let Some(record) = self.state_repo.find(&step_id).await? {
            debug!(step_execution_id = %step_id, status = %record.status(), "step already started");
            return Ok(record.response);
        }

        let executor = self.registry.create(&definition)?;
        let started_at = ctx.now();

        info!(
            step_execution_id = %step_id,
            step_type = %definition.step_type,
            step_name = %definition.name,
            "Starting step"
        );
        self.emit(StepStarted {
            step_execution_id: step_id.clone(),
            step_type: definition.step_type,
            timestamp: started_at,
        })
        .await;

        let response = executor.execute(ctx.clone()).await;
        let response = self.settle(&step_id, &definition, response).await;

        let deadline = if response.status.is_terminal() {
            None
        } else {
            self.config
                .effective_timeout(&definition)
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| started_at + d)
        };

        let record = StepExecutionRecord {
            step_execution_id: step_id.clone(),
            workflow_execution_id: ctx.workflow_execution_id().clone(),
            definition,
            response: response.clone(),
            started_at,
            deadline,
            updated_at: ctx.now(),
            buffered: Vec::new(),
        };
        self.state_repo
            .save(&record)
            .await
            .log_err("Failed to persist step state")?;
        self.release_if_terminal(&step_id, &response);

        Ok(response)
    }

    /// Deliver one remote result.
    ///
    /// The step is resumed once every result of its current batch arrived.
    /// Duplicate, late and unknown deliveries are reported as errors.
    pub async fn deliver_result(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        correlation_id: &CorrelationId,
        result: RemoteResult,
    ) -> Result<DeliveryOutcome, CoreError> {
        let step_id = match self.correlations.lookup(correlation_id) {
            Ok(step_id) => step_id,
            Err(e) => return Err(self.reject(correlation_id, e).await),
        };

        let lock = self.lock_for(&step_id);
        let _guard = lock.lock().await;

        let mut record = self
            .state_repo
            .find(&step_id)
            .await?
            .ok_or_else(|| CoreError::StepNotFound(step_id.0.clone()))?;

        // First write wins: a finished step never takes another result
        if record.is_terminal() {
            let err = CoreError::LateDelivery(correlation_id.0.clone());
            return Err(self.reject(correlation_id, err).await);
        }

        let results = match self
            .correlations
            .accept(&step_id, correlation_id, result.clone())
        {
            Ok(BatchProgress::Pending { remaining }) => {
                debug!(
                    step_execution_id = %step_id,
                    correlation_id = %correlation_id,
                    remaining,
                    "result buffered"
                );
                record.buffered.push((correlation_id.clone(), result));
                record.updated_at = Utc::now();
                self.state_repo
                    .save(&record)
                    .await
                    .log_err("Failed to persist buffered result")?;
                return Ok(DeliveryOutcome::Buffered { remaining });
            }
            Ok(BatchProgress::Complete(results)) => results,
            Err(e) => return Err(self.reject(correlation_id, e).await),
        };

        let executor = self.registry.create(&record.definition)?;
        let resume_ctx = PersistedContext::wrap(ctx, &record);

        info!(
            step_execution_id = %step_id,
            correlation_id = %correlation_id,
            results = results.len(),
            "Resuming step"
        );
        let mut resumed_ids: Vec<CorrelationId> = results.keys().cloned().collect();
        resumed_ids.sort();
        self.emit(StepResumed {
            step_execution_id: step_id.clone(),
            correlation_ids: resumed_ids,
            timestamp: Utc::now(),
        })
        .await;

        let response = executor.resume(resume_ctx, results).await;
        let response = self.settle(&step_id, &record.definition, response).await;

        record.response = response.clone();
        record.buffered.clear();
        record.updated_at = Utc::now();
        if response.status.is_terminal() {
            record.deadline = None;
        }
        self.state_repo
            .save(&record)
            .await
            .log_err("Failed to persist step state")?;
        self.release_if_terminal(&step_id, &response);

        Ok(DeliveryOutcome::Resumed(response))
    }

    /// Step awaiting a correlation id, if any
    pub fn waiting_step(&self, correlation_id: &CorrelationId) -> Option<StepExecutionId> {
        self.correlations.lookup(correlation_id).ok()
    }

    /// Abort a step. Aborting a finished step returns its final response unchanged.
    pub async fn abort(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        step_id: &StepExecutionId,
    ) -> Result<ExecutionResponse, CoreError> {
        self.tear_down(ctx, step_id, |_| Some(AbortReason::Manual))
            .await
    }

    /// Time out a step whose deadline passed at `now`.
    ///
    /// A step that is finished, unbounded or not yet due keeps its response.
    pub async fn handle_timeout(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        step_id: &StepExecutionId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResponse, CoreError> {
        let config = self.config.clone();
        self.tear_down(ctx, step_id, move |record| {
            let deadline = record.deadline?;
            if now < deadline {
                return None;
            }
            let configured = config.effective_timeout(&record.definition)?;
            let elapsed = (now - record.started_at).to_std().unwrap_or_default();
            Some(AbortReason::Timeout { configured, elapsed })
        })
        .await
    }

    /// Paused steps whose deadline passed at `now`
    pub async fn expired_steps(&self, now: DateTime<Utc>) -> Result<Vec<StepExecutionId>, CoreError> {
        let mut expired: Vec<StepExecutionId> = self
            .state_repo
            .list_paused()
            .await?
            .into_iter()
            .filter(|r| r.deadline.map_or(false, |d| d <= now))
            .map(|r| r.step_execution_id)
            .collect();
        expired.sort();
        Ok(expired)
    }

    /// Re-register the correlation ids of every persisted paused step.
    ///
    /// Called once after a restart, before results are delivered. Results a
    /// step had already received for its current batch are restored too.
    /// Returns the number of steps whose batch was restored.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let paused = self
            .state_repo
            .list_paused()
            .await
            .log_err("Failed to list paused steps")?;

        let mut restored = 0;
        for record in paused {
            let step_id = &record.step_execution_id;
            let lock = self.lock_for(step_id);
            let _guard = lock.lock().await;

            match self.correlations.restore_batch(
                step_id,
                &record.response.correlation_ids,
                &record.buffered,
            ) {
                Ok(true) => restored += 1,
                Ok(false) => debug!(step_execution_id = %step_id, "batch already live"),
                Err(e) => {
                    warn!(step_execution_id = %step_id, "could not restore correlation ids: {}", e)
                }
            }
        }
        info!(restored, "Recovered paused steps");
        Ok(restored)
    }

    /// Forget a finished run: the correlation history and locks of its
    /// finished steps, then every registered run-scoped state.
    ///
    /// Steps of the run that still wait keep their registrations.
    /// Returns the number of steps released.
    pub async fn release_run(&self, run: &WorkflowExecutionId) -> Result<usize, CoreError> {
        let records = self.state_repo.list_for_run(run).await?;

        let mut released = 0;
        for record in &records {
            let step_id = &record.step_execution_id;
            if !record.is_terminal() {
                warn!(
                    workflow_execution_id = %run,
                    step_execution_id = %step_id,
                    "step still waiting; keeping its registrations"
                );
                continue;
            }
            let forgotten = self.correlations.forget_step(step_id);
            self.step_locks.remove(step_id);
            debug!(step_execution_id = %step_id, forgotten, "step released");
            released += 1;
        }
        for state in &self.run_state {
            state.release_run(run);
        }

        info!(workflow_execution_id = %run, released, "Run released");
        Ok(released)
    }

    /// Current status of a step
    pub async fn status(&self, step_id: &StepExecutionId) -> Result<ExecutionStatus, CoreError> {
        self.state_repo
            .find(step_id)
            .await?
            .map(|r| r.status())
            .ok_or_else(|| CoreError::StepNotFound(step_id.0.clone()))
    }

    async fn tear_down<F>(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        step_id: &StepExecutionId,
        reason_for: F,
    ) -> Result<ExecutionResponse, CoreError>
    where
        F: FnOnce(&StepExecutionRecord) -> Option<AbortReason> + Send,
    {
        let lock = self.lock_for(step_id);
        let _guard = lock.lock().await;

        let mut record = self
            .state_repo
            .find(step_id)
            .await?
            .ok_or_else(|| CoreError::StepNotFound(step_id.0.clone()))?;

        if record.is_terminal() {
            debug!(step_execution_id = %step_id, status = %record.status(), "step already finished");
            return Ok(record.response);
        }

        let reason = match reason_for(&record) {
            Some(reason) => reason,
            None => return Ok(record.response),
        };

        // Cancel before the step runs so racing results are refused
        let cancelled = self.correlations.cancel_step(step_id);
        info!(
            step_execution_id = %step_id,
            reason = ?reason,
            cancelled = cancelled.len(),
            "Tearing down paused step"
        );

        let executor = self.registry.create(&record.definition)?;
        let resume_ctx = PersistedContext::wrap(ctx, &record);
        let response = executor.handle_abort(resume_ctx, reason).await;

        let response = if response.status.is_terminal() {
            response
        } else {
            warn!(step_execution_id = %step_id, "abort handler left the step waiting; forcing a terminal status");
            forced_teardown(&record.definition, reason)
        };
        let response = self.settle(step_id, &record.definition, response).await;

        record.response = response.clone();
        record.buffered.clear();
        record.deadline = None;
        record.updated_at = Utc::now();
        self.state_repo
            .save(&record)
            .await
            .log_err("Failed to persist step state")?;
        self.release_if_terminal(step_id, &response);

        Ok(response)
    }

    /// Validate a response and bring the correlation registry in line with it
    async fn settle(
        &self,
        step_id: &StepExecutionId,
        definition: &StepDefinition,
        response: ExecutionResponse,
    ) -> ExecutionResponse {
        let mut response = match response.validate() {
            Ok(()) => response,
            Err(e) => {
                error!(step_execution_id = %step_id, "step returned an invalid response: {}", e);
                ExecutionResponse::builder(ExecutionStatus::Error)
                    .error_message(format!(
                        "{} step returned an invalid response: {}",
                        definition.step_type.display_name(),
                        e
                    ))
                    .build()
            }
        };

        if !response.status.is_terminal() {
            // Registrations of the previous hop that the step no longer awaits
            for stale in self.correlations.pending_for(step_id) {
                if !response.correlation_ids.contains(&stale) {
                    self.correlations.unregister(&stale);
                }
            }
            match self
                .correlations
                .await_batch(step_id, &response.correlation_ids)
            {
                Ok(()) => {
                    info!(
                        step_execution_id = %step_id,
                        correlation_ids = ?response.correlation_ids,
                        "Step paused"
                    );
                    self.emit(StepPaused {
                        step_execution_id: step_id.clone(),
                        correlation_ids: response.correlation_ids.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                    return response;
                }
                Err(e) => {
                    error!(step_execution_id = %step_id, "could not await correlation ids: {}", e);
                    response = ExecutionResponse::builder(ExecutionStatus::Error)
                        .error_message(format!("Could not await correlation ids: {}", e))
                        .build();
                }
            }
        }

        self.correlations.cancel_step(step_id);
        info!(
            step_execution_id = %step_id,
            status = %response.status,
            message = ?response.error_message,
            "Step finished"
        );
        self.emit(StepCompleted {
            step_execution_id: step_id.clone(),
            status: response.status,
            message: response.error_message.clone(),
            timestamp: Utc::now(),
        })
        .await;
        response
    }

    async fn reject(&self, correlation_id: &CorrelationId, err: CoreError) -> CoreError {
        warn!(correlation_id = %correlation_id, "Refusing delivery: {}", err);
        if let Some(step_id) = self.correlations.owner(correlation_id) {
            self.emit(DeliveryRejected {
                step_execution_id: step_id,
                correlation_id: correlation_id.clone(),
                reason: err.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        }
        err
    }

    async fn emit<E: DomainEvent + 'static>(&self, event: E) {
        let event_type = event.event_type();
        if let Err(e) = self.event_handler.handle_event(Box::new(event)).await {
            warn!("Failed to handle {} event: {}", event_type, e);
        }
    }

    fn lock_for(&self, step_id: &StepExecutionId) -> Arc<Mutex<()>> {
        self.step_locks
            .entry(step_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_if_terminal(&self, step_id: &StepExecutionId, response: &ExecutionResponse) {
        if response.status.is_terminal() {
            self.step_locks.remove(step_id);
        }
    }
}

fn forced_teardown(definition: &StepDefinition, reason: AbortReason) -> ExecutionResponse {
    let name = definition.step_type.display_name();
    match reason {
        AbortReason::Manual => ExecutionResponse::builder(ExecutionStatus::Aborted)
            .error_message(format!("{} step was aborted", name))
            .build(),
        AbortReason::Timeout { configured, .. } => ExecutionResponse::failed(format!(
            "{} step timed out after {}",
            name,
            format_duration(configured)
        )),
    }
}

/// Caller context seen through the persisted record of a step
struct PersistedContext {
    inner: Arc<dyn ExecutionContext>,
    step_execution_id: StepExecutionId,
    workflow_execution_id: WorkflowExecutionId,
    data: Option<StepExecutionData>,
}

impl PersistedContext {
    fn wrap(inner: Arc<dyn ExecutionContext>, record: &StepExecutionRecord) -> Arc<dyn ExecutionContext> {
        Arc::new(Self {
            inner,
            step_execution_id: record.step_execution_id.clone(),
            workflow_execution_id: record.workflow_execution_id.clone(),
            data: record.response.execution_data.clone(),
        })
    }
}

impl ExecutionContext for PersistedContext {
    fn render_expression(&self, raw: &str) -> Result<String, CoreError> {
        self.inner.render_expression(raw)
    }

    fn context_element(&self, kind: &ContextElementKind) -> Option<ContextElement> {
        self.inner.context_element(kind)
    }

    fn state_execution_data(&self) -> Option<StepExecutionData> {
        self.data.clone()
    }

    fn step_execution_id(&self) -> &StepExecutionId {
        &self.step_execution_id
    }

    fn workflow_execution_id(&self) -> &WorkflowExecutionId {
        &self.workflow_execution_id
    }

    fn app_id(&self) -> &str {
        self.inner.app_id()
    }

    fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    fn env_id(&self) -> Option<&str> {
        self.inner.env_id()
    }

    fn execution_kind(&self) -> ExecutionKind {
        self.inner.execution_kind()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}
