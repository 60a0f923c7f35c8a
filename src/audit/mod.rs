//! Audit Log
//!
//! Non-ledger audit trail. Entries are written through the same scope as the
//! decision they describe, so an audit row exists iff the decision committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::transaction::Scope;

/// Audit log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    RefundRequested,
    RefundCompleted,
    RefundRejected,
    /// Completed refund whose money is repaid outside the ledger
    ExternalRepaymentScheduled,
    CreditAdjusted,
    TicketCheckedIn,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RefundRequested => "refund.requested",
            AuditAction::RefundCompleted => "refund.completed",
            AuditAction::RefundRejected => "refund.rejected",
            AuditAction::ExternalRepaymentScheduled => "refund.external_repayment_scheduled",
            AuditAction::CreditAdjusted => "credit.adjusted",
            AuditAction::TicketCheckedIn => "ticket.checked_in",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: AuditAction,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    details: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    /// Create a new audit log builder
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            resource_type: None,
            resource_id: None,
            actor_id: None,
            details: None,
        }
    }

    /// Set the resource the entry is about
    pub fn resource(mut self, resource_type: &str, resource_id: Uuid) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id);
        self
    }

    /// Set the user who performed the action
    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Attach structured details
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Write the entry inside the caller's unit of work
    pub async fn write(self, scope: &mut Scope) -> AppResult<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, resource_type, resource_id, actor_id, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(self.action.as_str())
        .bind(&self.resource_type)
        .bind(self.resource_id)
        .bind(self.actor_id)
        .bind(&self.details)
        .execute(scope.conn())
        .await?;

        tracing::debug!(
            audit_id = %id,
            action = %self.action,
            scope_id = %scope.id(),
            "Audit log entry created"
        );

        Ok(id)
    }
}

/// Audit entries for one resource, oldest first
pub async fn entries_for_resource(
    scope: &mut Scope,
    resource_type: &str,
    resource_id: Uuid,
) -> AppResult<Vec<AuditLogEntry>> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT id, action, resource_type, resource_id, actor_id, details, created_at
        FROM audit_logs
        WHERE resource_type = $1 AND resource_id = $2
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(resource_type)
    .bind(resource_id)
    .fetch_all(scope.conn())
    .await?;

    Ok(entries)
}
