//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Domain-specific errors
///
/// These errors represent business rule violations detected before any
/// write reaches the store. They are independent of the persistence layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid credit amount (zero, too precise, or out of range)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Value outside the allowed status domain
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// State machine does not allow the requested transition
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Requester is authenticated but not allowed to act
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Check if this is a client error (caller supplied a bad value)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_) | Self::InvalidStatus(_) | Self::InvalidTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = DomainError::invalid_transition("ticket", "refunded", "checked_in");

        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Invalid transition for ticket: refunded -> checked_in"
        );
    }

    #[test]
    fn test_forbidden_is_not_client_error() {
        let err = DomainError::Forbidden("admin role required".to_string());
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("admin role required"));
    }
}
