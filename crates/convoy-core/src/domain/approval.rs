//! Approval criteria and change windows evaluated against ticket snapshots

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::CoreError;

/// Current field values of an external ticket
pub type TicketSnapshot = HashMap<String, String>;

/// How conditions of a criteria combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    /// Every field must match one of its values
    #[default]
    And,
    /// Any field match suffices
    Or,
}

/// Field to acceptable-values conditions plus a combination operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApprovalCriteria {
    /// Combination operator
    #[serde(default)]
    pub operator: ConditionOperator,
    /// Field name to acceptable values
    pub conditions: BTreeMap<String, Vec<String>>,
}

impl ApprovalCriteria {
    /// Criteria combined with AND
    pub fn all_of<I, F, V>(conditions: I) -> Self
    where
        I: IntoIterator<Item = (F, Vec<V>)>,
        F: Into<String>,
        V: Into<String>,
    {
        Self::with_operator(ConditionOperator::And, conditions)
    }

    /// Criteria combined with OR
    pub fn any_of<I, F, V>(conditions: I) -> Self
    where
        I: IntoIterator<Item = (F, Vec<V>)>,
        F: Into<String>,
        V: Into<String>,
    {
        Self::with_operator(ConditionOperator::Or, conditions)
    }

    /// Single field matching a single value
    pub fn single(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::all_of([(field.into(), vec![value.into()])])
    }

    fn with_operator<I, F, V>(operator: ConditionOperator, conditions: I) -> Self
    where
        I: IntoIterator<Item = (F, Vec<V>)>,
        F: Into<String>,
        V: Into<String>,
    {
        Self {
            operator,
            conditions: conditions
                .into_iter()
                .map(|(f, vs)| (f.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Whether there is nothing to evaluate
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a snapshot; empty criteria never match
    pub fn satisfied(&self, snapshot: &TicketSnapshot) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        let mut matches = self.conditions.iter().map(|(field, accepted)| {
            snapshot.get(field).map_or(false, |current| {
                accepted
                    .iter()
                    .any(|a| a.trim().eq_ignore_ascii_case(current.trim()))
            })
        });
        match self.operator {
            ConditionOperator::And => matches.all(|m| m),
            ConditionOperator::Or => matches.any(|m| m),
        }
    }
}

/// Ticket fields holding the change window bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeWindow {
    /// Field with the window start
    pub start_field: String,
    /// Field with the window end
    pub end_field: String,
}

/// Position of a point in time relative to a change window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCheck {
    /// Strictly inside the window
    Inside,
    /// Outside; carries a description of the window
    Outside(String),
}

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

impl ChangeWindow {
    /// Create a window over the two fields
    pub fn new(start_field: impl Into<String>, end_field: impl Into<String>) -> Self {
        Self {
            start_field: start_field.into(),
            end_field: end_field.into(),
        }
    }

    /// Parse both bounds and check `now` against them
    pub fn check(&self, snapshot: &TicketSnapshot, now: DateTime<Utc>) -> Result<WindowCheck, CoreError> {
        let start = parse_bound(snapshot.get(&self.start_field), false).ok_or_else(|| {
            CoreError::PolicyViolation("Change Window Start Time value in Ticket is invalid".to_string())
        })?;
        let end = parse_bound(snapshot.get(&self.end_field), true).ok_or_else(|| {
            CoreError::PolicyViolation("Change Window End Time value in Ticket is invalid".to_string())
        })?;

        if start >= end {
            return Err(CoreError::PolicyViolation(
                "Start Window Time must be earlier than End Window Time".to_string(),
            ));
        }

        if start < now && now < end {
            Ok(WindowCheck::Inside)
        } else {
            Ok(WindowCheck::Outside(format!(
                "Current time is not within the change window {} - {}",
                start.format(DATE_TIME_FORMAT),
                end.format(DATE_TIME_FORMAT)
            )))
        }
    }
}

/// Date-only values cover the whole day: midnight for a start, last second for an end
fn parse_bound(value: Option<&String>, is_end: bool) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT) {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT).ok()?;
    let time = if is_end {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}
