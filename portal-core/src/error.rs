//! Unified error handling system
//!
//! Provides structured error types with context, retry classification and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type PortalResult<T> = Result<T, PortalError>;

/// Backend code returned when a single-row read matched zero or several rows.
pub const CODE_NO_SINGLE_ROW: &str = "PGRST116";

/// Backend code returned for a value the relational engine cannot parse.
pub const CODE_INVALID_TEXT_REPRESENTATION: &str = "22P02";

/// Backend codes that signal a malformed request. Retrying them cannot help.
pub const NON_RETRYABLE_CODES: [&str; 2] = [CODE_NO_SINGLE_ROW, CODE_INVALID_TEXT_REPRESENTATION];

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Error reported by the hosted backend, or a transport failure reaching it
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        /// Backend error code (e.g. `PGRST116`), when the backend supplied one
        code: Option<String>,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Operation failed after retries: {operation} ({attempts} attempts)")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Permission denied: {message}")]
    Permission {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl PortalError {
    /// Build a backend error from a code and message reported by the backend
    pub fn backend(code: Option<&str>, message: impl Into<String>, component: &str) -> Self {
        PortalError::Backend {
            message: message.into(),
            code: code.map(str::to_string),
            status: None,
            source: None,
            context: ErrorContext::new(component),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            PortalError::Backend { context, .. } => Some(context),
            PortalError::Timeout { context, .. } => Some(context),
            PortalError::RetriesExhausted { context, .. } => Some(context),
            PortalError::Authentication { context, .. } => Some(context),
            PortalError::Permission { context, .. } => Some(context),
            PortalError::Config { context, .. } => Some(context),
            PortalError::Storage { context, .. } => Some(context),
            PortalError::Validation { context, .. } => Some(context),
            PortalError::NotFound { context, .. } => Some(context),
            PortalError::Internal { context, .. } => Some(context),
            PortalError::Io(_) | PortalError::Serialization(_) => None,
        }
    }

    /// Backend error code, if any
    pub fn error_code(&self) -> Option<&str> {
        match self {
            PortalError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PortalError::Timeout { .. })
    }

    /// Whether a failed read may be attempted again.
    ///
    /// Malformed-request codes and timeouts short-circuit the retry loop, as do
    /// errors that originate on our side of the wire.
    pub fn is_retryable(&self) -> bool {
        match self {
            PortalError::Backend { code, .. } => !code
                .as_deref()
                .is_some_and(|code| NON_RETRYABLE_CODES.contains(&code)),
            PortalError::Timeout { .. } => false,
            PortalError::Io(_) => true,
            PortalError::Internal { .. } => true,
            _ => false,
        }
    }

    /// Message suitable for display next to a retry action
    pub fn user_message(&self) -> String {
        match self {
            PortalError::Backend { message, .. } => message.clone(),
            PortalError::Timeout { .. } => {
                "The server took too long to respond. Please try again.".to_string()
            }
            PortalError::Authentication { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            PortalError::Internal { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal error occurred"
                );
            }
            PortalError::Config { .. } | PortalError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            PortalError::Backend { .. } | PortalError::Timeout { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    code = ?self.error_code(),
                    retryable = self.is_retryable(),
                    error = %self,
                    "Backend or timeout error"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! backend_error {
    ($msg:expr, $component:expr) => {
        $crate::PortalError::Backend {
            message: $msg.to_string(),
            code: None,
            status: None,
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $code:expr, $component:expr) => {
        $crate::PortalError::Backend {
            message: $msg.to_string(),
            code: Some($code.to_string()),
            status: None,
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::PortalError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'portal config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::PortalError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::PortalError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the record identifier")
                .with_suggestion("Check that the record is visible to the signed-in user"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_request_codes_are_not_retryable() {
        for code in NON_RETRYABLE_CODES {
            let err = backend_error!("bad request", code, "test");
            assert!(!err.is_retryable(), "{code} must not be retried");
            assert_eq!(err.error_code(), Some(code));
        }
    }

    #[test]
    fn transient_backend_errors_are_retryable() {
        let err = backend_error!("upstream unavailable", "test");
        assert!(err.is_retryable());

        let err = backend_error!("deadlock detected", "40P01", "test");
        assert!(err.is_retryable());
    }

    #[test]
    fn timeouts_are_classified_and_not_retried() {
        let err = PortalError::Timeout {
            operation: "select projects".to_string(),
            duration_ms: 8000,
            context: ErrorContext::new("test"),
        };
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("8000ms"));
    }
}
