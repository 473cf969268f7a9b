//! Error types.
//!
//! Only [`DriverError`] ever aborts a run. Tool and classification errors are
//! contained where they happen and turned into data: an error-flagged tool
//! result, or a fail-closed classification.

use thiserror::Error;

/// Failure talking to the model service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Rate limits, 5xx responses, connection resets, timeouts. Retryable.
    #[error("transient service error: {0}")]
    Transient(String),
    /// Malformed requests, auth failures, unparsable responses. Not retried.
    #[error("fatal service error: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        ServiceError::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ServiceError::Fatal(message.into())
    }
}

/// Failure of a single tool invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },
    #[error("{0}")]
    Execution(String),
    #[error("tool '{tool}' timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },
    #[error("tool '{tool}' panicked: {message}")]
    Panicked { tool: String, message: String },
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }
}

/// Failure to classify a single item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ClassifyError {
    pub transient: bool,
    pub message: String,
}

impl ClassifyError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ClassifyError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Transient(m) => ClassifyError::transient(m),
            ServiceError::Fatal(m) => ClassifyError::permanent(m),
        }
    }
}

/// A condition that terminates a whole driver run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("model service failed after {attempts} attempt(s): {source}")]
    Service {
        attempts: u32,
        #[source]
        source: ServiceError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_maps_into_classify_error() {
        let t: ClassifyError = ServiceError::transient("HTTP 429").into();
        assert!(t.transient);
        let f: ClassifyError = ServiceError::fatal("HTTP 400").into();
        assert!(!f.transient);
        assert_eq!(f.message, "HTTP 400");
    }

    #[test]
    fn tool_error_messages_are_descriptive() {
        assert_eq!(
            ToolError::UnknownTool("nope".into()).to_string(),
            "unknown tool 'nope'"
        );
        let timeout = ToolError::Timeout {
            tool: "slow".into(),
            seconds: 5,
        };
        assert!(timeout.to_string().contains("timed out after 5 seconds"));
    }

    #[test]
    fn driver_error_reports_attempts() {
        let err = DriverError::Service {
            attempts: 3,
            source: ServiceError::transient("connection reset"),
        };
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
