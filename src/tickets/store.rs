//! Ticket Store
//!
//! Owns ticket lifecycle state. Status changes go through
//! [`TicketStatus::ensure_transition`] and run inside the caller's scope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{PageRequest, TicketStatus};
use crate::error::{AppError, AppResult};
use crate::transaction::{Scope, TransactionRunner};

const TICKET_COLUMNS: &str =
    "id, purchase_id, event_id, status, checked_in_at, price, created_at, updated_at";

/// Ticket as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub event_id: Uuid,
    pub status: String,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn ticket_status(&self) -> AppResult<TicketStatus> {
        Ok(self.status.parse()?)
    }
}

/// Result of a scanner check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInOutcome {
    pub ticket: Ticket,
    /// True when the ticket had been checked in before this call
    pub already_checked_in: bool,
}

/// Attendance counters for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_tickets: i64,
    pub valid_tickets: i64,
    pub checked_in_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentCheckIn {
    pub ticket_id: Uuid,
    pub order_number: String,
    pub username: String,
    pub checked_in_at: DateTime<Utc>,
}

/// Ticket Store
#[derive(Debug, Clone)]
pub struct TicketStore {
    runner: TransactionRunner,
}

impl TicketStore {
    pub fn new(runner: TransactionRunner) -> Self {
        Self { runner }
    }

    // =========================================================================
    // Check-in lookup
    // =========================================================================

    /// Ticket eligible for check-in. Any other status reads as not found.
    pub async fn find_purchased_ticket(
        &self,
        ticket_id: Uuid,
        scope: Option<&mut Scope>,
    ) -> AppResult<Ticket> {
        self.runner
            .join(scope, move |s| {
                Box::pin(async move {
                    let sql = format!(
                        "SELECT {} FROM tickets WHERE id = $1 AND status = 'purchased'",
                        TICKET_COLUMNS
                    );
                    sqlx::query_as::<_, Ticket>(&sql)
                        .bind(ticket_id)
                        .fetch_optional(s.conn())
                        .await?
                        .ok_or_else(|| AppError::not_found("ticket", ticket_id))
                })
            })
            .await
    }

    /// Mark a ticket checked in.
    ///
    /// Idempotent: a ticket that is already checked in is returned as stored,
    /// with its original `checked_in_at`.
    pub async fn mark_checked_in(&self, scope: &mut Scope, ticket_id: Uuid) -> AppResult<Ticket> {
        let (ticket, _) = self.apply_check_in(scope, ticket_id).await?;
        Ok(ticket)
    }

    /// Scanner entry point: check in and audit in one unit of work
    #[instrument(skip(self))]
    pub async fn check_in(&self, ticket_id: Uuid) -> AppResult<CheckInOutcome> {
        let store = self.clone();

        self.runner
            .run(move |s| {
                Box::pin(async move {
                    let (ticket, newly_checked_in) = store.apply_check_in(s, ticket_id).await?;

                    if newly_checked_in {
                        AuditLogBuilder::new(AuditAction::TicketCheckedIn)
                            .resource("ticket", ticket_id)
                            .details(serde_json::json!({ "event_id": ticket.event_id }))
                            .write(s)
                            .await?;
                    }

                    Ok(CheckInOutcome {
                        ticket,
                        already_checked_in: !newly_checked_in,
                    })
                })
            })
            .await
    }

    /// Returns the ticket and whether this call performed the check-in
    async fn apply_check_in(&self, scope: &mut Scope, ticket_id: Uuid) -> AppResult<(Ticket, bool)> {
        let sql = format!(
            r#"
            UPDATE tickets
            SET status = 'checked_in', checked_in_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'purchased'
            RETURNING {}
            "#,
            TICKET_COLUMNS
        );

        let updated = sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket_id)
            .fetch_optional(scope.conn())
            .await?;

        if let Some(ticket) = updated {
            tracing::info!(ticket_id = %ticket_id, scope_id = %scope.id(), "Ticket checked in");
            return Ok((ticket, true));
        }

        // Already scanned, lost the race, or not admissible
        let ticket = self.get_ticket(scope, ticket_id).await?;
        match ticket.ticket_status()? {
            TicketStatus::CheckedIn => {
                tracing::debug!(ticket_id = %ticket_id, "Ticket already checked in");
                Ok((ticket, false))
            }
            other => Err(AppError::InvalidStatus(format!(
                "ticket {} cannot be checked in from status '{}'",
                ticket_id, other
            ))),
        }
    }

    // =========================================================================
    // Transitions used by the refund workflow
    // =========================================================================

    /// Load a ticket and hold its row lock until the scope ends
    pub async fn lock_ticket(&self, scope: &mut Scope, ticket_id: Uuid) -> AppResult<Ticket> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1 FOR UPDATE", TICKET_COLUMNS);

        sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| AppError::not_found("ticket", ticket_id))
    }

    /// Move a ticket to `status`, rejecting transitions the lifecycle forbids
    pub async fn set_status(
        &self,
        scope: &mut Scope,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> AppResult<Ticket> {
        let current = self.lock_ticket(scope, ticket_id).await?;
        current.ticket_status()?.ensure_transition(status)?;

        let sql = format!(
            r#"
            UPDATE tickets
            SET status = $2,
                checked_in_at = CASE WHEN $2 = 'checked_in' THEN COALESCE(checked_in_at, NOW()) ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TICKET_COLUMNS
        );

        let ticket = sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket_id)
            .bind(status.as_str())
            .fetch_one(scope.conn())
            .await?;

        tracing::debug!(
            ticket_id = %ticket_id,
            from = %current.status,
            to = %status,
            scope_id = %scope.id(),
            "Ticket status changed"
        );

        Ok(ticket)
    }

    async fn get_ticket(&self, scope: &mut Scope, ticket_id: Uuid) -> AppResult<Ticket> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);

        sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| AppError::not_found("ticket", ticket_id))
    }

    // =========================================================================
    // Read aggregates
    // =========================================================================

    pub async fn get_event_stats(
        &self,
        event_id: Uuid,
        scope: Option<&mut Scope>,
    ) -> AppResult<EventStats> {
        self.runner
            .join(scope, move |s| {
                Box::pin(async move {
                    let stats = sqlx::query_as::<_, EventStats>(
                        r#"
                        SELECT
                            COUNT(*) AS total_tickets,
                            COUNT(*) FILTER (WHERE status IN ('purchased', 'checked_in')) AS valid_tickets,
                            COUNT(*) FILTER (WHERE status = 'checked_in') AS checked_in_count
                        FROM tickets
                        WHERE event_id = $1
                        "#,
                    )
                    .bind(event_id)
                    .fetch_one(s.conn())
                    .await?;
                    Ok(stats)
                })
            })
            .await
    }

    /// Latest check-ins for an event, newest first. `limit` is sanitized like
    /// a page size.
    pub async fn get_recent_check_ins(
        &self,
        event_id: Uuid,
        limit: Option<i64>,
        scope: Option<&mut Scope>,
    ) -> AppResult<Vec<RecentCheckIn>> {
        let limit = PageRequest::new(1, limit.unwrap_or(0)).limit();

        self.runner
            .join(scope, move |s| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, RecentCheckIn>(
                        r#"
                        SELECT t.id AS ticket_id, p.order_number, u.username, t.checked_in_at
                        FROM tickets t
                        JOIN purchases p ON p.id = t.purchase_id
                        JOIN users u ON u.id = p.user_id
                        WHERE t.event_id = $1 AND t.checked_in_at IS NOT NULL
                        ORDER BY t.checked_in_at DESC, t.id DESC
                        LIMIT $2
                        "#,
                    )
                    .bind(event_id)
                    .bind(limit)
                    .fetch_all(s.conn())
                    .await?;
                    Ok(rows)
                })
            })
            .await
    }
}
