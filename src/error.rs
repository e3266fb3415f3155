//! Unified error handling for the payment broker
//!
//! Maps every failure the broker surfaces to a client onto an HTTP status,
//! a machine-readable error code, and a user-facing message. Processor
//! failures never appear here: by design they are delivery failures that
//! advance the retry schedule, and duplicates answer as silent success.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::error::CacheError;
use crate::database::error::DatabaseError;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Client errors (4xx)
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Infrastructure errors (5xx)
    #[serde(rename = "COORDINATION_UNAVAILABLE")]
    CoordinationUnavailable,
    #[serde(rename = "LEDGER_UNAVAILABLE")]
    LedgerUnavailable,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Malformed or ill-typed input
    Validation { field: String, message: String },
    /// The shared coordination store is unreachable
    Coordination { message: String },
    /// The durable ledger is unreachable
    Ledger { message: String, is_retryable: bool },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation {
            field: field.into(),
            message: message.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation { .. } => 400,
            AppErrorKind::Coordination { .. } => 500,
            AppErrorKind::Ledger { .. } => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
            AppErrorKind::Coordination { .. } => ErrorCode::CoordinationUnavailable,
            AppErrorKind::Ledger { .. } => ErrorCode::LedgerUnavailable,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation { field, message } => {
                format!("Invalid field '{}': {}", field, message)
            }
            AppErrorKind::Coordination { .. } => {
                "Could not persist the payment for processing. Please retry".to_string()
            }
            AppErrorKind::Ledger { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Validation { .. } => false,
            AppErrorKind::Coordination { .. } => true,
            AppErrorKind::Ledger { is_retryable, .. } => *is_retryable,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::new(AppErrorKind::Coordination {
            message: err.to_string(),
        })
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Ledger {
            message: err.to_string(),
            is_retryable,
        })
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;

    #[test]
    fn test_validation_error() {
        let error = AppError::validation("amount", "must be a non-negative number");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("amount"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_coordination_error_is_retryable() {
        let error = AppError::from(CacheError::ConnectionError(
            "connection refused".to_string(),
        ));

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::CoordinationUnavailable);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_ledger_error_carries_retryability() {
        let connection_lost = AppError::from(DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        }));
        assert_eq!(connection_lost.status_code(), 500);
        assert_eq!(connection_lost.error_code(), ErrorCode::LedgerUnavailable);
        assert!(connection_lost.is_retryable());

        let bad_query = AppError::from(DatabaseError::new(DatabaseErrorKind::Query {
            message: "syntax error".to_string(),
        }));
        assert!(!bad_query.is_retryable());
    }

    #[test]
    fn test_request_id_attachment() {
        let error = AppError::validation("correlationId", "must be a UUID")
            .with_request_id("req-42");

        assert_eq!(error.request_id.as_deref(), Some("req-42"));
    }
}
