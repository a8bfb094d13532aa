//! Assertion utilities for execution responses.

use convoy_core::{ExecutionResponse, ExecutionStatus};
use thiserror::Error;

/// Error type for response validation failures
#[derive(Debug, Error, PartialEq)]
pub enum ResponseValidationError {
    #[error("Invalid status: expected {expected}, got {actual} ({message:?})")]
    InvalidStatus {
        expected: ExecutionStatus,
        actual: ExecutionStatus,
        message: Option<String>,
    },

    #[error("Invalid message: expected {expected:?}, got {actual:?}")]
    InvalidMessage {
        expected: String,
        actual: Option<String>,
    },

    #[error("Invalid instances: expected {expected:?}, got {actual:?}")]
    InvalidInstances {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Response breaks the response contract: {0}")]
    Contract(String),
}

/// Asserts that a response has the expected status and honors the response contract.
///
/// # Returns
///
/// * `Ok(())` - If the status matches and the response is valid
/// * `Err(ResponseValidationError)` - Otherwise
pub fn assert_status(
    response: &ExecutionResponse,
    expected: ExecutionStatus,
) -> Result<(), ResponseValidationError> {
    if response.status != expected {
        return Err(ResponseValidationError::InvalidStatus {
            expected,
            actual: response.status,
            message: response.error_message.clone(),
        });
    }
    response
        .validate()
        .map_err(|e| ResponseValidationError::Contract(e.to_string()))
}

/// Asserts that a response carries exactly the expected message.
pub fn assert_message(
    response: &ExecutionResponse,
    expected: &str,
) -> Result<(), ResponseValidationError> {
    if response.error_message.as_deref() != Some(expected) {
        return Err(ResponseValidationError::InvalidMessage {
            expected: expected.to_string(),
            actual: response.error_message.clone(),
        });
    }
    Ok(())
}

/// Asserts that the instances newly targeted by a response are exactly `expected`, in order.
pub fn assert_new_instances(
    response: &ExecutionResponse,
    expected: &[&str],
) -> Result<(), ResponseValidationError> {
    let actual = new_instance_ids(response);
    if actual != expected {
        return Err(ResponseValidationError::InvalidInstances {
            expected: expected.iter().map(|s| s.to_string()).collect(),
            actual,
        });
    }
    Ok(())
}

/// Ids of the instances a response marks as new
pub fn new_instance_ids(response: &ExecutionResponse) -> Vec<String> {
    response
        .instances()
        .unwrap_or_default()
        .iter()
        .filter(|i| i.is_new_instance)
        .map(|i| i.instance_id.clone())
        .collect()
}
