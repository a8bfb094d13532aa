//! Collaborator traits for the Convoy core
//!
//! This module defines the narrow interfaces through which the core talks
//! to persistence, the worker pool, inventory, accounts and approval
//! backends. External crates implement these traits; in-memory versions
//! live in [`memory`] behind the `testing` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::approval::TicketSnapshot;
use super::instance::{InfraMapping, Instance, SelectionParams};
use super::remote_task::{RemoteTask, TaskId};
use super::step::{CorrelationId, StepDefinition, StepExecutionId, WorkflowExecutionId};
use crate::scheduling::capacity::LicenseTier;
use crate::types::{ExecutionResponse, ExecutionStatus, RemoteResult};
use crate::CoreError;

/// Persisted state of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// The step execution
    pub step_execution_id: StepExecutionId,
    /// Run the step belongs to
    pub workflow_execution_id: WorkflowExecutionId,
    /// Definition the executor is rebuilt from
    pub definition: StepDefinition,
    /// Last response produced by the step
    pub response: ExecutionResponse,
    /// When `execute` was first invoked
    pub started_at: DateTime<Utc>,
    /// When a paused step times out; `None` for unbounded steps
    pub deadline: Option<DateTime<Utc>>,
    /// Last update
    pub updated_at: DateTime<Utc>,
    /// Results of the current batch received before the batch completed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffered: Vec<(CorrelationId, RemoteResult)>,
}

impl StepExecutionRecord {
    /// Current status
    pub fn status(&self) -> ExecutionStatus {
        self.response.status
    }

    /// Whether the step is finished
    pub fn is_terminal(&self) -> bool {
        self.response.status.is_terminal()
    }
}

/// Repository for step execution state
#[async_trait]
pub trait StepStateRepository: Send + Sync {
    /// Find a record by step execution id
    async fn find(&self, id: &StepExecutionId) -> Result<Option<StepExecutionRecord>, CoreError>;

    /// Insert or replace a record
    async fn save(&self, record: &StepExecutionRecord) -> Result<(), CoreError>;

    /// All records whose step is still waiting
    async fn list_paused(&self) -> Result<Vec<StepExecutionRecord>, CoreError>;

    /// All records of a run
    async fn list_for_run(
        &self,
        run: &WorkflowExecutionId,
    ) -> Result<Vec<StepExecutionRecord>, CoreError>;
}

/// External pool of workers executing remote tasks
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Enqueue a task for out-of-process execution
    async fn queue_task(&self, task: RemoteTask) -> Result<TaskId, CoreError>;

    /// Execute a task and wait for its result
    async fn execute_task_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError>;
}

/// Visibility of a stored output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputScope {
    /// Current phase only
    Phase,
    /// Whole workflow run
    Workflow,
    /// Whole pipeline run
    Pipeline,
}

/// Id of a stored output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(pub String);

/// A value saved in the output store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutput {
    /// Id
    pub id: OutputId,
    /// Name
    pub name: String,
    /// Value
    pub value: Value,
    /// Scope
    pub scope: OutputScope,
}

/// Run-scoped store used to pass data between phases
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Save a named value, replacing any previous value of the same name
    async fn save(
        &self,
        run: &WorkflowExecutionId,
        name: &str,
        value: Value,
        scope: OutputScope,
    ) -> Result<OutputId, CoreError>;

    /// Find a named value
    async fn find(
        &self,
        run: &WorkflowExecutionId,
        name: &str,
    ) -> Result<Option<StoredOutput>, CoreError>;

    /// Delete a value by id
    async fn delete_by_id(&self, id: &OutputId) -> Result<(), CoreError>;
}

/// Inventory and infrastructure lookups
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Instances of the infrastructure matching the params
    async fn select_instances(
        &self,
        app_id: &str,
        env_id: &str,
        infra_mapping_id: &str,
        params: &SelectionParams,
    ) -> Result<Vec<Instance>, CoreError>;

    /// Display names of every host in the infrastructure
    async fn list_host_display_names(
        &self,
        app_id: &str,
        env_id: &str,
        infra_mapping_id: &str,
    ) -> Result<Vec<String>, CoreError>;

    /// Infrastructure mapping by id
    async fn infra_mapping(
        &self,
        app_id: &str,
        infra_mapping_id: &str,
    ) -> Result<Option<InfraMapping>, CoreError>;

    /// Ids of instances already running the artifact
    async fn instances_running_artifact(
        &self,
        app_id: &str,
        infra_mapping_id: &str,
        artifact_id: &str,
    ) -> Result<Vec<String>, CoreError>;
}

/// Account lookups
#[async_trait]
pub trait AccountService: Send + Sync {
    /// License tier of the account
    async fn license_tier(&self, account_id: &str) -> Result<LicenseTier, CoreError>;
}

/// External ticketing system consulted by approvals
#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Name of the ticket system, used to prefix errors
    fn ticket_type(&self) -> &str;

    /// Current field values of a ticket
    async fn fetch_ticket_snapshot(&self, ticket_ref: &str) -> Result<TicketSnapshot, CoreError>;
}

/// Schedules re-evaluation of a pending approval
#[async_trait]
pub trait PollRegistrar: Send + Sync {
    /// Deliver the next ticket snapshot for `approval_id` under `correlation_id`
    async fn register_for_future_poll(
        &self,
        approval_id: &str,
        ticket_ref: &str,
        correlation_id: &CorrelationId,
    ) -> Result<(), CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::events::{DomainEvent, DomainEventHandler};
    use crate::domain::expression::substitute;
    use crate::scheduling::selector;
    use crate::types::{
        ContextElement, ContextElementKind, ExecutionKind, StepExecutionData,
    };
    use crate::ExecutionContext;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory step state repository
    #[derive(Default)]
    pub struct MemoryStepStateRepository {
        records: DashMap<StepExecutionId, StepExecutionRecord>,
    }

    impl MemoryStepStateRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StepStateRepository for MemoryStepStateRepository {
        async fn find(
            &self,
            id: &StepExecutionId,
        ) -> Result<Option<StepExecutionRecord>, CoreError> {
            Ok(self.records.get(id).map(|r| r.clone()))
        }

        async fn save(&self, record: &StepExecutionRecord) -> Result<(), CoreError> {
            self.records
                .insert(record.step_execution_id.clone(), record.clone());
            Ok(())
        }

        async fn list_paused(&self) -> Result<Vec<StepExecutionRecord>, CoreError> {
            Ok(self
                .records
                .iter()
                .filter(|r| !r.is_terminal())
                .map(|r| r.clone())
                .collect())
        }

        async fn list_for_run(
            &self,
            run: &WorkflowExecutionId,
        ) -> Result<Vec<StepExecutionRecord>, CoreError> {
            Ok(self
                .records
                .iter()
                .filter(|r| &r.workflow_execution_id == run)
                .map(|r| r.clone())
                .collect())
        }
    }

    /// Worker pool that records what it is given
    #[derive(Default)]
    pub struct MemoryWorkerPool {
        queued: Mutex<Vec<RemoteTask>>,
        reject_with: Mutex<Option<String>>,
        sync_results: DashMap<String, RemoteResult>,
        sync_calls: Mutex<Vec<RemoteTask>>,
        counter: AtomicUsize,
    }

    impl MemoryWorkerPool {
        /// Create an empty pool
        pub fn new() -> Self {
            Self::default()
        }

        /// Tasks queued so far
        pub fn queued(&self) -> Vec<RemoteTask> {
            self.queued.lock().clone()
        }

        /// Synchronous tasks executed so far
        pub fn sync_calls(&self) -> Vec<RemoteTask> {
            self.sync_calls.lock().clone()
        }

        /// Refuse every enqueue with the message until cleared
        pub fn reject_enqueue(&self, message: Option<&str>) {
            *self.reject_with.lock() = message.map(str::to_string);
        }

        /// Result returned for synchronous tasks of a type
        pub fn set_sync_result(&self, task_type: &str, result: RemoteResult) {
            self.sync_results.insert(task_type.to_string(), result);
        }
    }

    #[async_trait]
    impl WorkerPool for MemoryWorkerPool {
        async fn queue_task(&self, task: RemoteTask) -> Result<TaskId, CoreError> {
            if let Some(message) = self.reject_with.lock().clone() {
                return Err(CoreError::ExternalDependency(message));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.queued.lock().push(task);
            Ok(TaskId(format!("task-{}", n + 1)))
        }

        async fn execute_task_sync(&self, task: RemoteTask) -> Result<RemoteResult, CoreError> {
            let result = self
                .sync_results
                .get(&task.task_type)
                .map(|r| r.clone())
                .ok_or_else(|| {
                    CoreError::ExternalDependency(format!(
                        "no worker can execute task type {}",
                        task.task_type
                    ))
                });
            self.sync_calls.lock().push(task);
            result
        }
    }

    /// In-memory output store
    #[derive(Default)]
    pub struct MemoryOutputStore {
        outputs: DashMap<(WorkflowExecutionId, String), StoredOutput>,
    }

    impl MemoryOutputStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl OutputStore for MemoryOutputStore {
        async fn save(
            &self,
            run: &WorkflowExecutionId,
            name: &str,
            value: Value,
            scope: OutputScope,
        ) -> Result<OutputId, CoreError> {
            let id = OutputId(uuid::Uuid::new_v4().to_string());
            self.outputs.insert(
                (run.clone(), name.to_string()),
                StoredOutput {
                    id: id.clone(),
                    name: name.to_string(),
                    value,
                    scope,
                },
            );
            Ok(id)
        }

        async fn find(
            &self,
            run: &WorkflowExecutionId,
            name: &str,
        ) -> Result<Option<StoredOutput>, CoreError> {
            Ok(self
                .outputs
                .get(&(run.clone(), name.to_string()))
                .map(|o| o.clone()))
        }

        async fn delete_by_id(&self, id: &OutputId) -> Result<(), CoreError> {
            self.outputs.retain(|_, o| &o.id != id);
            Ok(())
        }
    }

    /// In-memory inventory keyed by infrastructure mapping id
    #[derive(Default)]
    pub struct MemoryInventoryService {
        pools: DashMap<String, Vec<Instance>>,
        mappings: DashMap<String, InfraMapping>,
        artifacts: DashMap<(String, String), Vec<String>>,
    }

    impl MemoryInventoryService {
        /// Create an empty inventory
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an infrastructure with its instances
        pub fn add_infra(&self, mapping: InfraMapping, instances: Vec<Instance>) {
            self.pools.insert(mapping.id.clone(), instances);
            self.mappings.insert(mapping.id.clone(), mapping);
        }

        /// Record that instances run an artifact
        pub fn set_running_artifact(&self, infra_mapping_id: &str, artifact_id: &str, ids: Vec<String>) {
            self.artifacts
                .insert((infra_mapping_id.to_string(), artifact_id.to_string()), ids);
        }
    }

    #[async_trait]
    impl InventoryService for MemoryInventoryService {
        async fn select_instances(
            &self,
            _app_id: &str,
            _env_id: &str,
            infra_mapping_id: &str,
            params: &SelectionParams,
        ) -> Result<Vec<Instance>, CoreError> {
            let pool = self
                .pools
                .get(infra_mapping_id)
                .map(|p| p.clone())
                .unwrap_or_default();
            Ok(selector::select(&pool, params)?)
        }

        async fn list_host_display_names(
            &self,
            _app_id: &str,
            _env_id: &str,
            infra_mapping_id: &str,
        ) -> Result<Vec<String>, CoreError> {
            Ok(self
                .pools
                .get(infra_mapping_id)
                .map(|p| p.iter().map(|i| i.host_name.clone()).collect())
                .unwrap_or_default())
        }

        async fn infra_mapping(
            &self,
            _app_id: &str,
            infra_mapping_id: &str,
        ) -> Result<Option<InfraMapping>, CoreError> {
            Ok(self.mappings.get(infra_mapping_id).map(|m| m.clone()))
        }

        async fn instances_running_artifact(
            &self,
            _app_id: &str,
            infra_mapping_id: &str,
            artifact_id: &str,
        ) -> Result<Vec<String>, CoreError> {
            Ok(self
                .artifacts
                .get(&(infra_mapping_id.to_string(), artifact_id.to_string()))
                .map(|ids| ids.clone())
                .unwrap_or_default())
        }
    }

    /// Account service with per-account tiers; unknown accounts are paid
    #[derive(Default)]
    pub struct MemoryAccountService {
        tiers: DashMap<String, LicenseTier>,
    }

    impl MemoryAccountService {
        /// Create a service where every account is paid
        pub fn new() -> Self {
            Self::default()
        }

        /// Set an account's tier
        pub fn set_tier(&self, account_id: &str, tier: LicenseTier) {
            self.tiers.insert(account_id.to_string(), tier);
        }
    }

    #[async_trait]
    impl AccountService for MemoryAccountService {
        async fn license_tier(&self, account_id: &str) -> Result<LicenseTier, CoreError> {
            Ok(self
                .tiers
                .get(account_id)
                .map(|t| *t)
                .unwrap_or(LicenseTier::Paid))
        }
    }

    /// Ticket backend serving snapshots from memory
    pub struct MemoryTicketBackend {
        ticket_type: String,
        tickets: DashMap<String, TicketSnapshot>,
    }

    impl MemoryTicketBackend {
        /// Create a backend reporting the given ticket type
        pub fn new(ticket_type: &str) -> Self {
            Self {
                ticket_type: ticket_type.to_string(),
                tickets: DashMap::new(),
            }
        }

        /// Replace a ticket's fields
        pub fn set_snapshot(&self, ticket_ref: &str, snapshot: TicketSnapshot) {
            self.tickets.insert(ticket_ref.to_string(), snapshot);
        }
    }

    #[async_trait]
    impl TicketBackend for MemoryTicketBackend {
        fn ticket_type(&self) -> &str {
            &self.ticket_type
        }

        async fn fetch_ticket_snapshot(&self, ticket_ref: &str) -> Result<TicketSnapshot, CoreError> {
            self.tickets
                .get(ticket_ref)
                .map(|t| t.clone())
                .ok_or_else(|| {
                    CoreError::ExternalDependency(format!("Ticket {} not found", ticket_ref))
                })
        }
    }

    /// Poll registrar that records registrations
    #[derive(Default)]
    pub struct MemoryPollRegistrar {
        registrations: Mutex<Vec<(String, String, CorrelationId)>>,
        fail_with: Mutex<Option<String>>,
    }

    impl MemoryPollRegistrar {
        /// Create a registrar accepting every registration
        pub fn new() -> Self {
            Self::default()
        }

        /// Refuse registrations with the message until cleared
        pub fn fail_with(&self, message: Option<&str>) {
            *self.fail_with.lock() = message.map(str::to_string);
        }

        /// Registrations as (approval id, ticket ref, correlation id)
        pub fn registrations(&self) -> Vec<(String, String, CorrelationId)> {
            self.registrations.lock().clone()
        }
    }

    #[async_trait]
    impl PollRegistrar for MemoryPollRegistrar {
        async fn register_for_future_poll(
            &self,
            approval_id: &str,
            ticket_ref: &str,
            correlation_id: &CorrelationId,
        ) -> Result<(), CoreError> {
            if let Some(message) = self.fail_with.lock().clone() {
                return Err(CoreError::ExternalDependency(message));
            }
            self.registrations.lock().push((
                approval_id.to_string(),
                ticket_ref.to_string(),
                correlation_id.clone(),
            ));
            Ok(())
        }
    }

    /// Event handler that keeps every event type it sees
    #[derive(Default)]
    pub struct RecordingEventHandler {
        events: Mutex<Vec<(String, StepExecutionId)>>,
    }

    impl RecordingEventHandler {
        /// Create an empty recorder
        pub fn new() -> Self {
            Self::default()
        }

        /// Event types recorded for a step, in order
        pub fn event_types_for(&self, id: &StepExecutionId) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .filter(|(_, s)| s == id)
                .map(|(t, _)| t.clone())
                .collect()
        }

        /// Number of events of a type across all steps
        pub fn count(&self, event_type: &str) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|(t, _)| t == event_type)
                .count()
        }
    }

    #[async_trait]
    impl DomainEventHandler for RecordingEventHandler {
        async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
            self.events.lock().push((
                event.event_type().to_string(),
                event.step_execution_id().clone(),
            ));
            Ok(())
        }
    }

    /// Execution context backed by plain values
    #[derive(Debug, Clone)]
    pub struct MemoryExecutionContext {
        step_execution_id: StepExecutionId,
        workflow_execution_id: WorkflowExecutionId,
        app_id: String,
        account_id: String,
        env_id: Option<String>,
        variables: HashMap<String, String>,
        elements: Vec<ContextElement>,
        data: Option<StepExecutionData>,
        kind: ExecutionKind,
        now: Option<DateTime<Utc>>,
    }

    impl MemoryExecutionContext {
        /// Start building a context
        pub fn builder() -> MemoryExecutionContextBuilder {
            MemoryExecutionContextBuilder {
                ctx: MemoryExecutionContext {
                    step_execution_id: StepExecutionId::new_random(),
                    workflow_execution_id: WorkflowExecutionId("run-1".to_string()),
                    app_id: "app-1".to_string(),
                    account_id: "account-1".to_string(),
                    env_id: Some("env-1".to_string()),
                    variables: HashMap::new(),
                    elements: Vec::new(),
                    data: None,
                    kind: ExecutionKind::Workflow,
                    now: None,
                },
            }
        }

        /// Same context for another step of the same run
        pub fn for_step(&self, id: StepExecutionId) -> Self {
            let mut ctx = self.clone();
            ctx.step_execution_id = id;
            ctx.data = None;
            ctx
        }

        /// Same context with a different clock
        pub fn at(&self, now: DateTime<Utc>) -> Self {
            let mut ctx = self.clone();
            ctx.now = Some(now);
            ctx
        }

        /// Same context with a different phase element
        pub fn with_phase(&self, phase: crate::types::PhaseElement) -> Self {
            let mut ctx = self.clone();
            ctx.elements.retain(|e| !matches!(e, ContextElement::Phase(_)));
            ctx.elements.push(ContextElement::Phase(phase));
            ctx
        }
    }

    /// Builder for [`MemoryExecutionContext`]
    #[derive(Debug)]
    pub struct MemoryExecutionContextBuilder {
        ctx: MemoryExecutionContext,
    }

    impl MemoryExecutionContextBuilder {
        /// Set the step execution id
        pub fn step_execution_id(mut self, id: &str) -> Self {
            self.ctx.step_execution_id = StepExecutionId(id.to_string());
            self
        }

        /// Set the run id
        pub fn workflow_execution_id(mut self, id: &str) -> Self {
            self.ctx.workflow_execution_id = WorkflowExecutionId(id.to_string());
            self
        }

        /// Set the app id
        pub fn app_id(mut self, id: &str) -> Self {
            self.ctx.app_id = id.to_string();
            self
        }

        /// Set the account id
        pub fn account_id(mut self, id: &str) -> Self {
            self.ctx.account_id = id.to_string();
            self
        }

        /// Set the environment id
        pub fn env_id(mut self, id: Option<&str>) -> Self {
            self.ctx.env_id = id.map(str::to_string);
            self
        }

        /// Add an expression variable
        pub fn variable(mut self, name: &str, value: &str) -> Self {
            self.ctx
                .variables
                .insert(name.to_string(), value.to_string());
            self
        }

        /// Add a context element
        pub fn element(mut self, element: ContextElement) -> Self {
            self.ctx.elements.push(element);
            self
        }

        /// Seed persisted step data
        pub fn state_execution_data(mut self, data: StepExecutionData) -> Self {
            self.ctx.data = Some(data);
            self
        }

        /// Set the run kind
        pub fn kind(mut self, kind: ExecutionKind) -> Self {
            self.ctx.kind = kind;
            self
        }

        /// Freeze the clock
        pub fn now(mut self, now: DateTime<Utc>) -> Self {
            self.ctx.now = Some(now);
            self
        }

        /// Finish
        pub fn build(self) -> MemoryExecutionContext {
            self.ctx
        }
    }

    impl ExecutionContext for MemoryExecutionContext {
        fn render_expression(&self, raw: &str) -> Result<String, CoreError> {
            Ok(substitute(raw, |name| self.variables.get(name).cloned()))
        }

        fn context_element(&self, kind: &ContextElementKind) -> Option<ContextElement> {
            self.elements.iter().find(|e| &e.kind() == kind).cloned()
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
            &self.app_id
        }

        fn account_id(&self) -> &str {
            &self.account_id
        }

        fn env_id(&self) -> Option<&str> {
            self.env_id.as_deref()
        }

        fn execution_kind(&self) -> ExecutionKind {
            self.kind
        }

        fn now(&self) -> DateTime<Utc> {
            self.now.unwrap_or_else(Utc::now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::domain::instance::InfraKind;
    use crate::domain::remote_task::task_types;

    #[tokio::test]
    async fn test_worker_pool_rejects_when_told() {
        let pool = MemoryWorkerPool::new();
        let task = RemoteTask::builder(task_types::COMMAND, CorrelationId("c1".into())).build();

        assert!(pool.queue_task(task.clone()).await.is_ok());
        pool.reject_enqueue(Some("quota exceeded"));
        assert_eq!(
            pool.queue_task(task).await,
            Err(CoreError::ExternalDependency("quota exceeded".into()))
        );
        assert_eq!(pool.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_output_store_round_trip() {
        let store = MemoryOutputStore::new();
        let run = WorkflowExecutionId("run-1".into());
        let id = store
            .save(&run, "deployed_instances", serde_json::json!(["i-1"]), OutputScope::Workflow)
            .await
            .unwrap();

        let found = store.find(&run, "deployed_instances").await.unwrap().unwrap();
        assert_eq!(found.value, serde_json::json!(["i-1"]));

        store.delete_by_id(&id).await.unwrap();
        assert!(store.find(&run, "deployed_instances").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inventory_lists_host_names() {
        let inventory = MemoryInventoryService::new();
        inventory.add_infra(
            InfraMapping {
                id: "infra-1".into(),
                name: Some("prod".into()),
                kind: InfraKind::Physical,
            },
            vec![
                Instance::new("i-1", "svc", "h-1", "host-1"),
                Instance::new("i-2", "svc", "h-2", "host-2"),
            ],
        );
        assert_eq!(
            inventory
                .list_host_display_names("app", "env", "infra-1")
                .await
                .unwrap(),
            vec!["host-1", "host-2"]
        );
        assert!(inventory
            .list_host_display_names("app", "env", "missing")
            .await
            .unwrap()
            .is_empty());
    }
}
