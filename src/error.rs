//! Error handling module
//!
//! Centralized error type for every operation the core exposes.
//! The core only produces an error kind and a message; mapping kinds to a
//! transport status belongs to the caller.

use serde::Serialize;

use crate::domain::{AmountError, DomainError};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Postgres SQLSTATE codes that signal a concurrent state change
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Caller errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // Concurrency
    #[error("Conflict: {0}")]
    Conflict(String),

    // Infrastructure
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Unit of work timed out after {0} ms")]
    Timeout(u128),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Stable error category exposed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Invalid,
    Conflict,
    Infrastructure,
}

impl AppError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{} {}", entity, id))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::InvalidStatus(_) | AppError::InvalidAmount(_) => ErrorKind::Invalid,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Database(_)
            | AppError::Timeout(_)
            | AppError::Internal(_)
            | AppError::Config(_) => ErrorKind::Infrastructure,
        }
    }

    /// Check if the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Timeout(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());

        match code.as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                AppError::Conflict(format!("concurrent update detected: {}", err))
            }
            Some(UNIQUE_VIOLATION) => {
                AppError::Conflict(format!("duplicate record: {}", err))
            }
            _ => AppError::Database(err),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidAmount(msg) => AppError::InvalidAmount(msg),
            DomainError::InvalidStatus(msg) => AppError::InvalidStatus(msg),
            e @ DomainError::InvalidTransition { .. } => AppError::InvalidStatus(e.to_string()),
            DomainError::Forbidden(msg) => AppError::Forbidden(msg),
        }
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::not_found("ticket", 1).kind(), ErrorKind::NotFound);
        assert_eq!(
            AppError::Forbidden("nope".to_string()).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            AppError::InvalidAmount("zero".to_string()).kind(),
            ErrorKind::Invalid
        );
        assert_eq!(
            AppError::InvalidStatus("x".to_string()).kind(),
            ErrorKind::Invalid
        );
        assert_eq!(AppError::Timeout(5000).kind(), ErrorKind::Infrastructure);
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_domain_error_conversion() {
        let err: AppError = DomainError::invalid_transition("ticket", "refunded", "purchased").into();
        assert!(matches!(err, AppError::InvalidStatus(_)));

        let err: AppError = DomainError::Forbidden("admin only".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err: AppError = AmountError::Zero.into();
        assert!(matches!(err, AppError::InvalidAmount(_)));
    }

    #[test]
    fn test_plain_sqlx_error_is_infrastructure() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("purchase", "abc");
        assert_eq!(err.to_string(), "Not found: purchase abc");
    }
}
