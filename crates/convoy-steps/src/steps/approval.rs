//! Approval gates.
//!
//! Manual approvals wait for an explicit decision delivered under the step's
//! correlation id. Ticket approvals register a poll with the ticket system and
//! are resumed with each new snapshot; a pending evaluation registers again
//! under a fresh correlation id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::application::approval_gate::{self, GateDecision};
use convoy_core::domain::approval::{ApprovalCriteria, ChangeWindow, TicketSnapshot};
use convoy_core::domain::expression::contains_expression;
use convoy_core::{
    AbortReason, CoreError, CorrelationId, ExecutionContext, ExecutionResponse, ExecutionStatus,
    RemoteResult, StepDefinition, StepExecutor, StepExecutorBase, StepType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{load_data, respond, snapshot, StepDependencies};

/// How an approval is decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalSpec {
    /// A person approves or rejects
    Manual {
        /// Groups allowed to decide
        #[serde(default)]
        user_groups: Vec<String>,
    },
    /// Criteria over the fields of an external ticket
    TicketCriteria {
        /// Ticket reference, may hold expressions
        ticket: String,
        /// Approval criteria
        approval: ApprovalCriteria,
        /// Rejection criteria
        #[serde(default)]
        rejection: Option<ApprovalCriteria>,
        /// Window the approval must fall into
        #[serde(default)]
        change_window: Option<ChangeWindow>,
    },
    /// A single status field of an external ticket
    TicketStatus {
        /// Ticket reference, may hold expressions
        ticket: String,
        /// Field holding the status
        #[serde(default = "default_status_field")]
        status_field: String,
        /// Status that approves
        approval_value: String,
        /// Status that rejects
        #[serde(default)]
        rejection_value: Option<String>,
    },
}

fn default_status_field() -> String {
    "status".to_string()
}

impl ApprovalSpec {
    fn kind(&self) -> ApprovalKind {
        match self {
            ApprovalSpec::Manual { .. } => ApprovalKind::Manual,
            ApprovalSpec::TicketCriteria { .. } => ApprovalKind::TicketCriteria,
            ApprovalSpec::TicketStatus { .. } => ApprovalKind::TicketStatus,
        }
    }

    fn ticket(&self) -> Option<&str> {
        match self {
            ApprovalSpec::Manual { .. } => None,
            ApprovalSpec::TicketCriteria { ticket, .. } | ApprovalSpec::TicketStatus { ticket, .. } => {
                Some(ticket)
            }
        }
    }
}

/// Kind recorded in the step data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalKind {
    /// Manual approval
    Manual,
    /// Ticket criteria
    TicketCriteria,
    /// Ticket status
    TicketStatus,
}

/// Persisted state of an approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalExecutionData {
    /// Id handed to the poll registrar
    pub approval_id: String,
    /// Approval kind
    pub kind: ApprovalKind,
    /// Rendered ticket reference
    #[serde(default)]
    pub ticket_ref: Option<String>,
    /// Correlation id the next decision or snapshot arrives under
    pub poll_correlation_id: CorrelationId,
    /// When the approval was requested
    pub requested_at: DateTime<Utc>,
    /// Who decided a manual approval
    #[serde(default)]
    pub approved_by: Option<String>,
    /// Comments left with a manual decision
    #[serde(default)]
    pub comments: Option<String>,
    /// Last observed ticket status
    #[serde(default)]
    pub current_status: Option<String>,
}

/// Action carried by a manual decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualAction {
    /// Approve
    Approve,
    /// Reject
    Reject,
}

/// Payload of a manual decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualDecision {
    /// Decision
    pub action: ManualAction,
    /// Who decided
    #[serde(default)]
    pub approved_by: Option<String>,
    /// Free-form comments
    #[serde(default)]
    pub comments: Option<String>,
}

/// Waits for a manual or ticket-driven approval
pub struct ApprovalStep {
    definition: StepDefinition,
    deps: StepDependencies,
}

impl ApprovalStep {
    /// Create the step
    pub fn new(definition: StepDefinition, deps: StepDependencies) -> Self {
        Self { definition, deps }
    }

    fn spec(&self) -> Result<ApprovalSpec, CoreError> {
        self.definition.literal_as("approval")?.ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "Step '{}' requires input 'approval'",
                self.definition.name
            ))
        })
    }

    async fn request(&self, ctx: &dyn ExecutionContext) -> Result<ExecutionResponse, CoreError> {
        let spec = self.spec()?;
        let approval_id = uuid::Uuid::new_v4().to_string();
        let mut data = ApprovalExecutionData {
            approval_id: approval_id.clone(),
            kind: spec.kind(),
            ticket_ref: None,
            poll_correlation_id: CorrelationId::new_random(),
            requested_at: ctx.now(),
            approved_by: None,
            comments: None,
            current_status: None,
        };

        let Some(raw_ticket) = spec.ticket() else {
            info!(approval_id = %approval_id, "waiting for manual approval");
            return Ok(ExecutionResponse::builder(ExecutionStatus::Paused)
                .correlation_id(data.poll_correlation_id.clone())
                .error_message("Waiting for Approval")
                .execution_data(snapshot(&data)?)
                .build());
        };

        let ticket = ctx.render_expression(raw_ticket)?;
        if contains_expression(&ticket) {
            return Ok(ExecutionResponse::failed(format!(
                "Expression not rendered for issue Number: {}",
                raw_ticket
            )));
        }
        data.ticket_ref = Some(ticket.clone());
        self.wait_for_ticket(data, format!("Waiting for approval on Ticket {}", ticket))
            .await
    }

    /// Register the next poll and pause, or fail when no poll can be scheduled
    async fn wait_for_ticket(
        &self,
        mut data: ApprovalExecutionData,
        message: String,
    ) -> Result<ExecutionResponse, CoreError> {
        let ticket = data.ticket_ref.clone().unwrap_or_default();
        let poll_id = CorrelationId::new_random();
        let registered = match &self.deps.poll_registrar {
            Some(registrar) => registrar
                .register_for_future_poll(&data.approval_id, &ticket, &poll_id)
                .await
                .map_err(|e| e.user_message()),
            None => Err("no poll registrar is configured".to_string()),
        };
        if let Err(reason) = registered {
            warn!(approval_id = %data.approval_id, reason = %reason, "approval poll not scheduled");
            return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                .error_message(format!("Failed to schedule Approval: {}", reason))
                .execution_data(snapshot(&data)?)
                .build());
        }

        debug!(approval_id = %data.approval_id, correlation_id = %poll_id, "approval poll registered");
        data.poll_correlation_id = poll_id.clone();
        Ok(ExecutionResponse::builder(ExecutionStatus::Paused)
            .correlation_id(poll_id)
            .error_message(message)
            .execution_data(snapshot(&data)?)
            .build())
    }

    async fn decide(
        &self,
        ctx: &dyn ExecutionContext,
        mut responses: HashMap<CorrelationId, RemoteResult>,
    ) -> Result<ExecutionResponse, CoreError> {
        let data: ApprovalExecutionData = load_data(ctx, StepType::Approval)?;
        let result = responses.remove(&data.poll_correlation_id).ok_or_else(|| {
            CoreError::Other(format!("No decision for approval {}", data.approval_id))
        })?;

        match self.spec()? {
            ApprovalSpec::Manual { .. } => self.manual_decision(data, result),
            ApprovalSpec::TicketCriteria {
                approval,
                rejection,
                change_window,
                ..
            } => {
                self.ticket_decision(ctx, data, result, "status", &approval, rejection.as_ref(), change_window.as_ref())
                    .await
            }
            ApprovalSpec::TicketStatus {
                status_field,
                approval_value,
                rejection_value,
                ..
            } => {
                let approval = ApprovalCriteria::single(status_field.as_str(), approval_value);
                let rejection =
                    rejection_value.map(|v| ApprovalCriteria::single(status_field.as_str(), v));
                self.ticket_decision(ctx, data, result, &status_field, &approval, rejection.as_ref(), None)
                    .await
            }
        }
    }

    fn manual_decision(
        &self,
        mut data: ApprovalExecutionData,
        result: RemoteResult,
    ) -> Result<ExecutionResponse, CoreError> {
        let payload = result.into_payload()?;
        let decision: ManualDecision = serde_json::from_value(payload)
            .map_err(|e| CoreError::InvalidInput(format!("Invalid approval decision: {}", e)))?;
        data.approved_by = decision.approved_by.clone();
        data.comments = decision.comments;
        info!(approval_id = %data.approval_id, action = ?decision.action, "manual approval decided");

        let response = match decision.action {
            ManualAction::Approve => ExecutionResponse::builder(ExecutionStatus::Success),
            ManualAction::Reject => ExecutionResponse::builder(ExecutionStatus::Rejected)
                .error_message(match &decision.approved_by {
                    Some(user) => format!("Rejected by {}", user),
                    None => "Rejected".to_string(),
                }),
        };
        Ok(response.execution_data(snapshot(&data)?).build())
    }

    #[allow(clippy::too_many_arguments)]
    async fn ticket_decision(
        &self,
        ctx: &dyn ExecutionContext,
        mut data: ApprovalExecutionData,
        result: RemoteResult,
        status_field: &str,
        approval: &ApprovalCriteria,
        rejection: Option<&ApprovalCriteria>,
        window: Option<&ChangeWindow>,
    ) -> Result<ExecutionResponse, CoreError> {
        let ticket = data.ticket_ref.clone().unwrap_or_default();
        let snapshot_or_error = match result {
            RemoteResult::Success { payload: Value::Object(fields) } => Ok(fields
                .into_iter()
                .map(|(field, value)| (field, field_text(value)))
                .collect::<TicketSnapshot>()),
            RemoteResult::Success { .. } => self.fetch_snapshot(&ticket).await,
            RemoteResult::Error { message } => Err(self.prefixed(message)),
        };
        let ticket_fields = match snapshot_or_error {
            Ok(fields) => fields,
            Err(message) => {
                return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(message)
                    .execution_data(snapshot(&data)?)
                    .build());
            }
        };
        data.current_status = ticket_fields.get(status_field).cloned();

        let decision = match approval_gate::evaluate(approval, rejection, window, &ticket_fields, ctx.now()) {
            Ok(decision) => decision,
            Err(e) => {
                return Ok(ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(e.user_message())
                    .execution_data(snapshot(&data)?)
                    .build());
            }
        };
        debug!(approval_id = %data.approval_id, ticket = %ticket, decision = ?decision, "ticket evaluated");

        match decision {
            GateDecision::Approved => Ok(ExecutionResponse::builder(ExecutionStatus::Success)
                .error_message(format!("Approval provided on Ticket: {}", ticket))
                .execution_data(snapshot(&data)?)
                .build()),
            GateDecision::Rejected => Ok(ExecutionResponse::builder(ExecutionStatus::Rejected)
                .error_message(format!("Rejection provided on Ticket: {}", ticket))
                .execution_data(snapshot(&data)?)
                .build()),
            GateDecision::WaitingForWindow(detail) => {
                self.wait_for_ticket(
                    data,
                    format!("Approved but waiting for Change Window ({})", detail),
                )
                .await
            }
            GateDecision::Pending => {
                self.wait_for_ticket(data, format!("Waiting for approval on Ticket {}", ticket))
                    .await
            }
        }
    }

    async fn fetch_snapshot(&self, ticket: &str) -> Result<TicketSnapshot, String> {
        let backend = self
            .deps
            .ticket_backend
            .as_ref()
            .ok_or_else(|| "No ticket backend is configured".to_string())?;
        backend
            .fetch_ticket_snapshot(ticket)
            .await
            .map_err(|e| format!("{}: {}", backend.ticket_type(), e.user_message()))
    }

    fn prefixed(&self, message: String) -> String {
        match &self.deps.ticket_backend {
            Some(backend) => format!("{}: {}", backend.ticket_type(), message),
            None => message,
        }
    }
}

fn field_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl StepExecutorBase for ApprovalStep {
    fn step_type(&self) -> StepType {
        StepType::Approval
    }
}

#[async_trait]
impl StepExecutor for ApprovalStep {
    async fn execute(&self, ctx: Arc<dyn ExecutionContext>) -> ExecutionResponse {
        respond(self.request(ctx.as_ref()).await)
    }

    async fn resume(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        responses: HashMap<CorrelationId, RemoteResult>,
    ) -> ExecutionResponse {
        respond(self.decide(ctx.as_ref(), responses).await)
    }

    async fn handle_abort(
        &self,
        ctx: Arc<dyn ExecutionContext>,
        reason: AbortReason,
    ) -> ExecutionResponse {
        let kind = ctx.execution_kind();
        let builder = match reason {
            AbortReason::Manual => ExecutionResponse::builder(ExecutionStatus::Aborted)
                .error_message(approval_gate::abort_message(kind)),
            AbortReason::Timeout { configured, .. } => {
                ExecutionResponse::builder(ExecutionStatus::Failed)
                    .error_message(approval_gate::timeout_message(kind, configured))
            }
        };
        match ctx.state_execution_data() {
            Some(data) => builder.execution_data(data).build(),
            None => builder.build(),
        }
    }
}
