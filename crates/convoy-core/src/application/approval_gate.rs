//! Decision logic shared by ticket-driven approvals
//!
//! The gate itself is stateless: every poll hands it a fresh ticket
//! snapshot and the step turns the decision into a response.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::approval::{ApprovalCriteria, ChangeWindow, TicketSnapshot, WindowCheck};
use crate::types::{format_duration, ExecutionKind};
use crate::CoreError;

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Approval criteria matched, inside the change window if one is declared
    Approved,
    /// Rejection criteria matched
    Rejected,
    /// Approval criteria matched but the window is not open
    WaitingForWindow(String),
    /// Nothing matched yet
    Pending,
}

/// Message for an approval missing its criteria
pub const EMPTY_CRITERIA_MESSAGE: &str = "Approval criteria empty in approval state";

/// Evaluate approval and rejection criteria against a snapshot.
///
/// Rejection is checked first and wins when both match. The change window is
/// only consulted once approval matched; a malformed window is an error.
pub fn evaluate(
    approval: &ApprovalCriteria,
    rejection: Option<&ApprovalCriteria>,
    window: Option<&ChangeWindow>,
    snapshot: &TicketSnapshot,
    now: DateTime<Utc>,
) -> Result<GateDecision, CoreError> {
    if approval.is_empty() {
        return Err(CoreError::InvalidInput(EMPTY_CRITERIA_MESSAGE.to_string()));
    }

    if rejection.map_or(false, |r| r.satisfied(snapshot)) {
        return Ok(GateDecision::Rejected);
    }

    if !approval.satisfied(snapshot) {
        return Ok(GateDecision::Pending);
    }

    match window {
        None => Ok(GateDecision::Approved),
        Some(window) => match window.check(snapshot, now)? {
            WindowCheck::Inside => Ok(GateDecision::Approved),
            WindowCheck::Outside(detail) => Ok(GateDecision::WaitingForWindow(detail)),
        },
    }
}

/// Message for an approval that was not decided within its timeout
pub fn timeout_message(kind: ExecutionKind, timeout: Duration) -> String {
    let subject = match kind {
        ExecutionKind::Pipeline => "Pipeline was",
        ExecutionKind::Workflow => "Workflow was",
        ExecutionKind::Unknown => "Approval",
    };
    format!("{} not approved within {}", subject, format_duration(timeout))
}

/// Message for an approval aborted while waiting
pub fn abort_message(kind: ExecutionKind) -> String {
    match kind {
        ExecutionKind::Pipeline => "Pipeline was aborted",
        ExecutionKind::Workflow => "Workflow was aborted",
        ExecutionKind::Unknown => "Workflow or Pipeline was aborted",
    }
    .to_string()
}
