use thiserror::Error;

/// Core error type for the Convoy runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A step input or configuration value is missing or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An expression survived rendering unresolved
    #[error("Expression not rendered: {0}")]
    ExpressionNotRendered(String),

    /// An external collaborator rejected or failed a call
    #[error("External dependency error: {0}")]
    ExternalDependency(String),

    /// A remote worker reported a failure for a dispatched task
    #[error("{0}")]
    RemoteExecution(String),

    /// A licensing, capacity or change-window policy was violated
    #[error("{0}")]
    PolicyViolation(String),

    /// A paused step exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No step is waiting on the correlation id
    #[error("Correlation id not registered: {0}")]
    CorrelationNotFound(String),

    /// A result for the correlation id was already delivered
    #[error("Duplicate delivery for correlation id: {0}")]
    DuplicateDelivery(String),

    /// A result arrived after the awaiting step reached a terminal status
    #[error("Late delivery for correlation id: {0}")]
    LateDelivery(String),

    /// Step execution not found
    #[error("Step execution not found: {0}")]
    StepNotFound(String),

    /// No factory registered for the step type
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    /// A step produced a response that breaks the response contract
    #[error("Invalid execution response: {0}")]
    InvalidResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse grouping of errors used to pick a terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad inputs, unresolved expressions, missing specifications
    Configuration,
    /// Worker pool, remote execution and backend failures
    ExternalDependency,
    /// Licensing caps, capacity drift, change-window ordering
    Policy,
    /// Timeouts
    Timeout,
    /// Correlation bookkeeping failures
    Delivery,
    /// Anything else
    Internal,
}

impl CoreError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::InvalidInput(_) | CoreError::ExpressionNotRendered(_) => {
                ErrorCategory::Configuration
            }
            CoreError::ExternalDependency(_) | CoreError::RemoteExecution(_) => {
                ErrorCategory::ExternalDependency
            }
            CoreError::PolicyViolation(_) => ErrorCategory::Policy,
            CoreError::Timeout(_) => ErrorCategory::Timeout,
            CoreError::CorrelationNotFound(_)
            | CoreError::DuplicateDelivery(_)
            | CoreError::LateDelivery(_) => ErrorCategory::Delivery,
            CoreError::StepNotFound(_)
            | CoreError::UnknownStepType(_)
            | CoreError::InvalidResponse(_)
            | CoreError::SerializationError(_)
            | CoreError::StateStoreError(_)
            | CoreError::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Message suitable for an operator. Remote and policy messages pass through untouched.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::RemoteExecution(msg)
            | CoreError::PolicyViolation(msg)
            | CoreError::InvalidInput(msg)
            | CoreError::Other(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::InvalidInput("count".to_string()), "Invalid input: count"),
            (CoreError::ExpressionNotRendered("${x}".to_string()), "Expression not rendered: ${x}"),
            (CoreError::ExternalDependency("pool".to_string()), "External dependency error: pool"),
            (CoreError::RemoteExecution("exit 1".to_string()), "exit 1"),
            (CoreError::PolicyViolation("cap".to_string()), "cap"),
            (CoreError::Timeout("10m".to_string()), "Timeout: 10m"),
            (CoreError::CorrelationNotFound("c1".to_string()), "Correlation id not registered: c1"),
            (CoreError::DuplicateDelivery("c1".to_string()), "Duplicate delivery for correlation id: c1"),
            (CoreError::LateDelivery("c1".to_string()), "Late delivery for correlation id: c1"),
            (CoreError::StepNotFound("s1".to_string()), "Step execution not found: s1"),
            (CoreError::UnknownStepType("X".to_string()), "Unknown step type: X"),
            (CoreError::Other("other_err".to_string()), "other_err"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            CoreError::ExpressionNotRendered("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CoreError::RemoteExecution("x".into()).category(),
            ErrorCategory::ExternalDependency
        );
        assert_eq!(CoreError::PolicyViolation("x".into()).category(), ErrorCategory::Policy);
        assert_eq!(CoreError::LateDelivery("x".into()).category(), ErrorCategory::Delivery);
        assert_eq!(CoreError::SerializationError("x".into()).category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_user_message_passes_remote_text_verbatim() {
        let err = CoreError::RemoteExecution("helm: release not found".to_string());
        assert_eq!(err.user_message(), "helm: release not found");

        let err = CoreError::ExternalDependency("queue full".to_string());
        assert_eq!(err.user_message(), "External dependency error: queue full");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }
}
