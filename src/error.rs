//! Error types for sprint-storage
//!
//! Every variant maps to one wire code. Handlers return `StorageError` and the
//! response layer turns it into the `{error:{code,message,details}}` envelope.

use hyper::StatusCode;
use rusqlite::ErrorCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{message}")]
    Conflict {
        message: String,
        details: Option<Value>,
    },

    #[error("Idempotency key was already used with a different request")]
    IdempotencyConflict,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(message: impl Into<String>, details: Value) -> Self {
        Self::Conflict {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Stable wire code clients branch on
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) | Self::MethodNotAllowed => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::IdempotencyConflict => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to send to clients. Internal failures never leak details.
    pub fn public_message(&self) -> String {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Conflict { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(e) => is_unique_violation(e),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::ServiceUnavailable("database is busy, retry the request".to_string())
            }
            _ => Self::Database(e),
        }
    }
}

/// True when a statement failed on a UNIQUE or PRIMARY KEY index.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let e = StorageError::Validation("bad".into());
        assert_eq!(e.code(), "VALIDATION_ERROR");
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e = StorageError::IdempotencyConflict;
        assert_eq!(e.code(), "IDEMPOTENCY_CONFLICT");
        assert_eq!(e.status(), StatusCode::CONFLICT);

        let e = StorageError::conflict("dependency already exists");
        assert_eq!(e.code(), "CONFLICT");
        assert_eq!(e.public_message(), "dependency already exists");
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let e = StorageError::Internal("secret path /var/db".into());
        assert_eq!(e.code(), "INTERNAL_ERROR");
        assert_eq!(e.public_message(), "Internal server error");
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(StorageError::from(err).is_unique_violation());
    }
}
