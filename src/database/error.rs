//! Database-specific error types

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Unique constraint violation (duplicate correlation id)
    UniqueViolation,
    /// Pool exhausted or connection lost
    Connection { message: String },
    /// Query failed for any other reason
    Query { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Query {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation)
    }

    /// Connection-level failures are worth retrying; query failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation => write!(f, "unique constraint violation"),
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::Query { message } => write!(f, "database query error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;
