//! Helm release install.
//!
//! When values live in a chart repository or in git, the step first fetches
//! them through the worker pool, then reads the release history for rollback
//! and finally installs. Each remote hop pauses the step under a new
//! correlation id.

use async_trait::async_trait;
use convoy_core::domain::remote_task::{task_types, RemoteTask};
use convoy_core::domain::repository::OutputScope;
use convoy_core::{
    ContextElement, CoreError, CorrelationId, ExecutionContext, ExecutionResponse,
    ExecutionStatus, RemoteResult, StepDefinition, StepExecutor, StepExecutorBase, StepType,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{load_data, respond, routed, snapshot, task_timeout, StepDependencies};

/// Where remote values files come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValuesSource {
    /// Values shipped with the chart in its repository
    HelmRepo {
        /// Chart repository URL
        repo_url: String,
    },
    /// Values files stored in git
    Git {
        /// Repository URL
        repo_url: String,
        /// Branch to read from
        branch: String,
        /// Files to fetch, in override order
        file_paths: Vec<String>,
    },
}

/// Remote hop the step is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HelmTaskType {
    /// Fetching values files
    FetchValues,
    /// Installing the release
    Install,
}

/// Persisted state of a Helm deploy step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmDeployExecutionData {
    /// Hop currently awaited
    pub current_task_type: HelmTaskType,
    /// Correlation id of the install task
    pub activity_id: CorrelationId,
    /// Correlation id of the values fetch, when one was dispatched
    pub fetch_correlation_id: Option<CorrelationId>,
    /// Chart to install
    pub chart_name: String,
    /// Release name
    pub release_name: String,
    /// Target namespace
    pub namespace: String,
    /// Revision before this install; `None` for a fresh release
    pub previous_revision: Option<u64>,
    /// Revision created by this install
    #[serde(default)]
    pub new_revision: Option<u64>,
    /// Values documents, lowest precedence first
    #[serde(default)]
    pub values: Vec<String>,
}

/// Installs or upgrades a Helm release
pub struct HelmDeployStep {
    definition: StepDefinition,
    deps: StepDependencies,
}

impl HelmDeployStep {
    /// Create the step
    pub fn new(definition: StepDefinition, deps: StepDependencies) -> Self {
        Self { definition, deps }
    }

    async fn start(&self, ctx: &dyn ExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let chart_name = self.definition.required_string("chart_name", ctx)?;
        let release_name = match self.definition.optional_string("release_name", ctx)? {
            Some(name) => name,
            None => default_release_name(&chart_name),
        };
        let namespace = self
            .definition
            .optional_string("namespace", ctx)?
            .unwrap_or_else(|| "default".to_string());
        let inline_values = self.definition.optional_string("values", ctx)?;
        let values_source: Option<ValuesSource> = self.definition.literal_as("values_source")?;

        let mut data = HelmDeployExecutionData {
            current_task_type: HelmTaskType::FetchValues,
            activity_id: CorrelationId::new_random(),
            fetch_correlation_id: None,
            chart_name,
            release_name,
            namespace,
            previous_revision: None,
            new_revision: None,
            values: inline_values.into_iter().collect(),
        };

        match values_source {
            Some(source) => self.fetch_values(ctx, data, source).await,
            None => self.install(ctx, &mut data).await,
        }
    }

    async fn fetch_values(
        &self,
        ctx: &dyn ExecutionContext,
        mut data: HelmDeployExecutionData,
        source: ValuesSource,
    ) -> Result<ExecutionResponse, CoreError> {
        let fetch_id = CorrelationId::new_random();
        let builder = match &source {
            ValuesSource::HelmRepo { repo_url } => {
                RemoteTask::builder(task_types::HELM_VALUES_FETCH, fetch_id.clone())
                    .parameter(json!(repo_url))
                    .parameter(json!(data.chart_name))
            }
            ValuesSource::Git {
                repo_url,
                branch,
                file_paths,
            } => RemoteTask::builder(task_types::GIT_FETCH_FILES, fetch_id.clone())
                .parameter(json!(repo_url))
                .parameter(json!(branch))
                .parameter(json!(file_paths)),
        };
        let task = routed(builder, ctx)
            .timeout(task_timeout(&self.deps.config, &self.definition))
            .build();

        debug!(release = %data.release_name, correlation_id = %fetch_id, "fetching remote values");
        self.deps
            .dispatcher
            .dispatch(ctx.step_execution_id(), task)
            .await?;

        data.current_task_type = HelmTaskType::FetchValues;
        data.fetch_correlation_id = Some(fetch_id.clone());
        Ok(ExecutionResponse::paused(vec![fetch_id], snapshot(&data)?))
    }

    async fn install(
        &self,
        ctx: &dyn ExecutionContext,
        data: &mut HelmDeployExecutionData,
    ) -> Result<ExecutionResponse, CoreError> {
        // Rollback snapshot
        let history_task = routed(
            RemoteTask::builder(task_types::HELM_RELEASE_HISTORY, CorrelationId::new_random()),
            ctx,
        )
        .parameter(json!(data.release_name))
        .parameter(json!(data.namespace))
        .synchronous()
        .build();
        let history = self
            .deps
            .dispatcher
            .execute_sync(history_task)
            .await?
            .into_payload()?;
        data.previous_revision = latest_revision(&history);

        self.deps
            .output_store
            .save(
                ctx.workflow_execution_id(),
                &format!("helm_rollback_{}", data.release_name),
                json!({
                    "release_name": data.release_name,
                    "namespace": data.namespace,
                    "previous_revision": data.previous_revision,
                }),
                OutputScope::Workflow,
            )
            .await?;

        let task = routed(
            RemoteTask::builder(task_types::HELM_INSTALL, data.activity_id.clone()),
            ctx,
        )
        .parameter(json!(data.chart_name))
        .parameter(json!(data.release_name))
        .parameter(json!(data.namespace))
        .parameter(json!(data.values))
        .timeout(task_timeout(&self.deps.config, &self.definition))
        .build();

        info!(
            release = %data.release_name,
            previous_revision = ?data.previous_revision,
            "installing helm release"
        );
        self.deps
            .dispatcher
            .dispatch(ctx.step_execution_id(), task)
            .await?;

        data.current_task_type = HelmTaskType::Install;
        Ok(ExecutionResponse::paused(
            vec![data.activity_id.clone()],
            snapshot(data)?,
        ))
    }

    async fn proceed(
        &self,
        ctx: &dyn ExecutionContext,
        mut responses: HashMap<CorrelationId, RemoteResult>,
    ) -> Result<ExecutionResponse, CoreError> {
        let mut data: HelmDeployExecutionData = load_data(ctx, StepType::HelmDeploy)?;
        let awaited = match data.current_task_type {
            HelmTaskType::FetchValues => data.fetch_correlation_id.clone().ok_or_else(|| {
                CoreError::Other("Helm deploy step lost its values fetch id".to_string())
            })?,
            HelmTaskType::Install => data.activity_id.clone(),
        };
        let result = responses
            .remove(&awaited)
            .ok_or_else(|| CoreError::Other(format!("No result for activity {}", awaited)))?;

        let payload = match result {
            RemoteResult::Success { payload } => payload,
            RemoteResult::Error { message } => {
                return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(message)
                    .execution_data(snapshot(&data)?)
                    .build());
            }
        };

        match data.current_task_type {
            HelmTaskType::FetchValues => {
                // Fetched files rank below inline values
                let mut values = fetched_values(&payload);
                values.append(&mut data.values);
                data.values = values;
                self.install(ctx, &mut data).await
            }
            HelmTaskType::Install => {
                data.new_revision = payload.get("revision").and_then(Value::as_u64);
                Ok(ExecutionResponse::builder(ExecutionStatus::Success)
                    .execution_data(snapshot(&data)?)
                    .context_element(ContextElement::Custom {
                        name: "helm_release".to_string(),
                        value: json!({
                            "release_name": data.release_name,
                            "namespace": data.namespace,
                            "revision": data.new_revision,
                            "previous_revision": data.previous_revision,
                        }),
                    })
                    .build())
            }
        }
    }
}

fn default_release_name(chart_name: &str) -> String {
    chart_name
        .rsplit('/')
        .next()
        .unwrap_or(chart_name)
        .to_string()
}

/// Highest revision in a release history payload
fn latest_revision(history: &Value) -> Option<u64> {
    history
        .get("revisions")?
        .as_array()?
        .iter()
        .filter_map(|r| r.get("revision").and_then(Value::as_u64))
        .max()
}

/// Values documents from a fetch payload; a single string or a list of strings
fn fetched_values(payload: &Value) -> Vec<String> {
    match payload.get("values") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl StepExecutorBase for HelmDeployStep {
    fn step_type(&self) -> StepType {
        StepType::HelmDeploy
    }
}

#[async_trait]
impl StepExecutor for HelmDeployStep {
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse {
        respond(self.start(ctx.as_ref()).await)
    }

    async fn resume(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        responses: HashMap<CorrelationId, RemoteResult>,
    ) -> ExecutionResponse {
        respond(self.proceed(ctx.as_ref(), responses).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use convoy_core::domain::repository::memory::MemoryExecutionContext;
    use convoy_core::domain::repository::OutputStore;
    use convoy_core::{InputValue, StepExecutionData, WorkflowExecutionId};
    use pretty_assertions::assert_eq;

    fn definition() -> StepDefinition {
        StepDefinition::new("helm", "Deploy chart", StepType::HelmDeploy)
            .with_input("chart_name", InputValue::literal("stable/web"))
            .with_input("namespace", InputValue::literal("prod"))
            .with_input("values", InputValue::literal("replicas: 3"))
    }

    fn ctx_with(data: Option<StepExecutionData>) -> Arc<dyn ExecutionContext> {
        let builder = MemoryExecutionContext::builder().step_execution_id("helm-1");
        Arc::new(match data {
            Some(data) => builder.state_execution_data(data).build(),
            None => builder.build(),
        })
    }

    fn fixture_with_history() -> Fixture {
        let fixture = Fixture::new();
        fixture.pool.set_sync_result(
            task_types::HELM_RELEASE_HISTORY,
            RemoteResult::success(json!({ "revisions": [{ "revision": 3 }, { "revision": 4 }] })),
        );
        fixture
    }

    #[tokio::test]
    async fn test_install_without_remote_values() {
        let fixture = fixture_with_history();
        let step = HelmDeployStep::new(definition(), fixture.deps.clone());

        let paused = step.execute(ctx_with(None)).await;
        assert_eq!(paused.status, ExecutionStatus::Paused);

        let data: HelmDeployExecutionData =
            paused.execution_data.clone().unwrap().to_typed().unwrap();
        assert_eq!(data.current_task_type, HelmTaskType::Install);
        assert_eq!(data.release_name, "web");
        assert_eq!(data.previous_revision, Some(4));
        assert_eq!(paused.correlation_ids, vec![data.activity_id.clone()]);

        let queued = fixture.pool.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task_type, task_types::HELM_INSTALL);
        assert_eq!(fixture.pool.sync_calls().len(), 1);

        let rollback = fixture
            .outputs
            .find(&WorkflowExecutionId("run-1".into()), "helm_rollback_web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rollback.value["previous_revision"], json!(4));
        assert_eq!(rollback.scope, OutputScope::Workflow);
    }

    #[tokio::test]
    async fn test_multi_hop_fetch_then_install() {
        let fixture = fixture_with_history();
        let def = definition().with_input(
            "values_source",
            InputValue::Literal(json!({
                "kind": "git",
                "repo_url": "https://git.example.com/values.git",
                "branch": "main",
                "file_paths": ["prod.yaml"],
            })),
        );
        let step = HelmDeployStep::new(def, fixture.deps.clone());

        // Hop 1: values fetch
        let fetch = step.execute(ctx_with(None)).await;
        assert_eq!(fetch.status, ExecutionStatus::Paused);
        let data: HelmDeployExecutionData =
            fetch.execution_data.clone().unwrap().to_typed().unwrap();
        assert_eq!(data.current_task_type, HelmTaskType::FetchValues);
        assert_eq!(fixture.pool.queued()[0].task_type, task_types::GIT_FETCH_FILES);
        assert!(fixture.pool.sync_calls().is_empty());

        // Hop 2: install under a new correlation id
        let install = step
            .resume(
                ctx_with(fetch.execution_data.clone()),
                HashMap::from([(
                    fetch.correlation_ids[0].clone(),
                    RemoteResult::success(json!({ "values": ["image: web:2"] })),
                )]),
            )
            .await;
        assert_eq!(install.status, ExecutionStatus::Paused);
        assert_ne!(install.correlation_ids, fetch.correlation_ids);
        let data: HelmDeployExecutionData =
            install.execution_data.clone().unwrap().to_typed().unwrap();
        assert_eq!(data.current_task_type, HelmTaskType::Install);
        assert_eq!(data.values, vec!["image: web:2", "replicas: 3"]);
        assert_eq!(fixture.pool.queued()[1].task_type, task_types::HELM_INSTALL);

        // Done
        let done = step
            .resume(
                ctx_with(install.execution_data.clone()),
                HashMap::from([(
                    install.correlation_ids[0].clone(),
                    RemoteResult::success(json!({ "revision": 5 })),
                )]),
            )
            .await;
        assert_eq!(done.status, ExecutionStatus::Success);
        assert_eq!(
            done.context_elements,
            vec![ContextElement::Custom {
                name: "helm_release".into(),
                value: json!({
                    "release_name": "web",
                    "namespace": "prod",
                    "revision": 5,
                    "previous_revision": 4,
                }),
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_is_verbatim() {
        let fixture = fixture_with_history();
        let def = definition().with_input(
            "values_source",
            InputValue::Literal(json!({ "kind": "helm_repo", "repo_url": "https://charts.example.com" })),
        );
        let step = HelmDeployStep::new(def, fixture.deps.clone());
        let fetch = step.execute(ctx_with(None)).await;
        assert_eq!(fixture.pool.queued()[0].task_type, task_types::HELM_VALUES_FETCH);

        let failed = step
            .resume(
                ctx_with(fetch.execution_data.clone()),
                HashMap::from([(
                    fetch.correlation_ids[0].clone(),
                    RemoteResult::error("chart stable/web not found"),
                )]),
            )
            .await;
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("chart stable/web not found"));
        assert_eq!(fixture.pool.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_chart_names_the_field() {
        let fixture = fixture_with_history();
        let def = StepDefinition::new("helm", "Deploy chart", StepType::HelmDeploy);
        let step = HelmDeployStep::new(def, fixture.deps.clone());

        let response = step.execute(ctx_with(None)).await;
        assert_eq!(response.status, ExecutionStatus::Failed);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Step 'Deploy chart' requires input 'chart_name'")
        );
    }

    #[tokio::test]
    async fn test_history_failure_stops_before_install() {
        let fixture = Fixture::new();
        fixture.pool.set_sync_result(
            task_types::HELM_RELEASE_HISTORY,
            RemoteResult::error("tiller unreachable"),
        );
        let step = HelmDeployStep::new(definition(), fixture.deps.clone());

        let response = step.execute(ctx_with(None)).await;
        assert_eq!(response.status, ExecutionStatus::Failed);
        assert_eq!(response.error_message.as_deref(), Some("tiller unreachable"));
        assert!(fixture.pool.queued().is_empty());
    }

    #[test]
    fn test_latest_revision() {
        assert_eq!(latest_revision(&json!({ "revisions": [] })), None);
        assert_eq!(latest_revision(&json!({})), None);
        assert_eq!(
            latest_revision(&json!({ "revisions": [{ "revision": 7 }, { "revision": 2 }] })),
            Some(7)
        );
    }
}
