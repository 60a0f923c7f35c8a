//! Request Context
//!
//! The identity capability handed to the core by the authentication layer,
//! plus metadata used for auditing and tracing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

/// Role attached to an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::InvalidStatus(format!("unknown role '{}'", other))),
        }
    }
}

/// Context for an operation: who is asking, and how to correlate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated user ID
    pub user_id: Uuid,

    /// Role of the authenticated user
    pub role: Role,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl RequestContext {
    /// Create a context for a regular user
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::User,
            correlation_id: None,
        }
    }

    /// Create a context for an administrator
    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            correlation_id: None,
        }
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins may see everything; users only what they own.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    /// Fail with `Forbidden` unless the caller is an administrator
    pub fn require_admin(&self, action: &str) -> Result<(), DomainError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "admin role required to {}",
                action
            )))
        }
    }
}
