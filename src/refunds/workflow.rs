//! Refund Workflow
//!
//! Refund request and approval. Each operation is a single unit of work:
//! ticket, refund, purchase and ledger rows change together or not at all.
//!
//! Lock order inside a unit is ticket, then purchase. Concurrent decisions on
//! one ticket serialize on the ticket row; the loser sees a decided refund.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{
    PaymentMethod, PurchaseStatus, RefundDecision, RefundRoute, RefundStatus, RequestContext,
    TicketStatus,
};
use crate::error::{AppError, AppResult};
use crate::ledger::{CreditLedger, CreditTransactionType, NewCreditTransaction};
use crate::tickets::{Ticket, TicketStore};
use crate::transaction::{Scope, TransactionRunner};

use super::notification::{NotificationDispatcher, NotificationKind};

const REFUND_COLUMNS: &str = r#"id, ticket_id, purchase_id, user_id, status, amount, payment_method,
    previous_ticket_status, external_repayment_pending, reason,
    requested_at, decided_at, decided_by"#;

/// Refund as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub purchase_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub amount: Decimal,
    /// Payment method of the purchase when the refund was requested
    pub payment_method: String,
    /// Ticket status to restore on rejection
    pub previous_ticket_status: String,
    pub external_repayment_pending: bool,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
}

impl Refund {
    pub fn refund_status(&self) -> AppResult<RefundStatus> {
        Ok(self.status.parse()?)
    }

    pub fn route(&self) -> RefundRoute {
        PaymentMethod::from(self.payment_method.as_str()).refund_route()
    }
}

/// Result of an approval decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDecisionOutcome {
    pub ticket: Ticket,
    pub refund: Refund,
    pub message: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRef {
    id: Uuid,
    user_id: Uuid,
    order_number: String,
    payment_method: String,
}

/// Refund Workflow
#[derive(Clone)]
pub struct RefundWorkflow {
    runner: TransactionRunner,
    tickets: TicketStore,
    ledger: CreditLedger,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl std::fmt::Debug for RefundWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefundWorkflow")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl RefundWorkflow {
    pub fn new(
        runner: TransactionRunner,
        tickets: TicketStore,
        ledger: CreditLedger,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            runner,
            tickets,
            ledger,
            notifier,
        }
    }

    // =========================================================================
    // Request
    // =========================================================================

    /// Open a refund for a purchased ticket and put the ticket on hold
    /// (`cancelled`) until an administrator decides.
    #[instrument(skip(self, context, reason), fields(requester_id = %context.user_id))]
    pub async fn request_refund(
        &self,
        ticket_id: Uuid,
        context: &RequestContext,
        reason: Option<String>,
    ) -> AppResult<Refund> {
        let workflow = self.clone();
        let context = context.clone();

        self.runner
            .run(move |s| Box::pin(workflow.open_refund(s, ticket_id, context, reason)))
            .await
    }

    async fn open_refund(
        self,
        scope: &mut Scope,
        ticket_id: Uuid,
        context: RequestContext,
        reason: Option<String>,
    ) -> AppResult<Refund> {
        let ticket = self.tickets.lock_ticket(scope, ticket_id).await?;
        let purchase = lock_purchase(scope, ticket.purchase_id).await?;

        if !context.can_access(purchase.user_id) {
            return Err(AppError::Forbidden(format!(
                "ticket {} belongs to another user",
                ticket_id
            )));
        }

        let current = ticket.ticket_status()?;
        if current != TicketStatus::Purchased {
            return Err(AppError::InvalidStatus(format!(
                "refund can only be requested for a purchased ticket, ticket {} is '{}'",
                ticket_id, current
            )));
        }

        let sql = format!(
            r#"
            INSERT INTO refunds
                (id, ticket_id, purchase_id, user_id, status, amount, payment_method,
                 previous_ticket_status, reason)
            VALUES ($1, $2, $3, $4, 'requested', $5, $6, $7, $8)
            RETURNING {}
            "#,
            REFUND_COLUMNS
        );

        let refund = sqlx::query_as::<_, Refund>(&sql)
            .bind(Uuid::new_v4())
            .bind(ticket_id)
            .bind(purchase.id)
            .bind(purchase.user_id)
            .bind(ticket.price)
            .bind(&purchase.payment_method)
            .bind(current.as_str())
            .bind(&reason)
            .fetch_one(scope.conn())
            .await?;

        self.tickets
            .set_status(scope, ticket_id, TicketStatus::Cancelled)
            .await?;

        AuditLogBuilder::new(AuditAction::RefundRequested)
            .resource("refund", refund.id)
            .actor(context.user_id)
            .details(serde_json::json!({
                "ticket_id": ticket_id,
                "order_number": purchase.order_number,
                "amount": refund.amount,
            }))
            .write(scope)
            .await?;

        tracing::info!(
            refund_id = %refund.id,
            ticket_id = %ticket_id,
            amount = %refund.amount,
            "Refund requested"
        );

        Ok(refund)
    }

    // =========================================================================
    // Decision
    // =========================================================================

    /// Decide the open refund of a ticket.
    ///
    /// `decision` must be `completed` or `rejected`. The caller must be an
    /// administrator. Both checks happen before any store access.
    #[instrument(skip(self, context), fields(approver_id = %context.user_id))]
    pub async fn approve_refund(
        &self,
        ticket_id: Uuid,
        decision: &str,
        context: &RequestContext,
    ) -> AppResult<RefundDecisionOutcome> {
        context.require_admin("decide refunds")?;
        let decision: RefundDecision = decision.parse()?;

        let workflow = self.clone();
        let approver_id = context.user_id;

        let (outcome, order_number) = self
            .runner
            .run(move |s| Box::pin(workflow.decide(s, ticket_id, decision, approver_id)))
            .await?;

        self.dispatch_notification(decision, &outcome, order_number);

        Ok(outcome)
    }

    async fn decide(
        self,
        scope: &mut Scope,
        ticket_id: Uuid,
        decision: RefundDecision,
        approver_id: Uuid,
    ) -> AppResult<(RefundDecisionOutcome, String)> {
        self.tickets.lock_ticket(scope, ticket_id).await?;
        let refund = latest_refund(scope, ticket_id).await?;
        let purchase = lock_purchase(scope, refund.purchase_id).await?;

        let status = refund.refund_status()?;
        if status != RefundStatus::Requested {
            return Err(AppError::InvalidStatus(format!(
                "refund {} is already '{}'",
                refund.id, status
            )));
        }

        let route = refund.route();
        // Free tickets have nothing to repay on either route
        let external = decision == RefundDecision::Completed
            && route == RefundRoute::ExternalRepayment
            && !refund.amount.is_zero();

        let sql = format!(
            r#"
            UPDATE refunds
            SET status = $2, decided_at = NOW(), decided_by = $3,
                external_repayment_pending = $4
            WHERE id = $1
            RETURNING {}
            "#,
            REFUND_COLUMNS
        );

        let refund = sqlx::query_as::<_, Refund>(&sql)
            .bind(refund.id)
            .bind(decision.status().as_str())
            .bind(approver_id)
            .bind(external)
            .fetch_one(scope.conn())
            .await?;

        match decision {
            RefundDecision::Completed => {
                self.tickets
                    .set_status(scope, ticket_id, TicketStatus::Refunded)
                    .await?;
                self.repay(scope, &refund, &purchase, route, approver_id)
                    .await?;
                roll_up_purchase(scope, purchase.id).await?;
            }
            RefundDecision::Rejected => {
                let restored: TicketStatus = refund.previous_ticket_status.parse()?;
                self.tickets.set_status(scope, ticket_id, restored).await?;
            }
        }

        let action = match decision {
            RefundDecision::Completed => AuditAction::RefundCompleted,
            RefundDecision::Rejected => AuditAction::RefundRejected,
        };

        AuditLogBuilder::new(action)
            .resource("refund", refund.id)
            .actor(approver_id)
            .details(serde_json::json!({
                "ticket_id": ticket_id,
                "order_number": purchase.order_number,
                "amount": refund.amount,
                "payment_method": refund.payment_method,
            }))
            .write(scope)
            .await?;

        let ticket = self.tickets.lock_ticket(scope, ticket_id).await?;

        tracing::info!(
            refund_id = %refund.id,
            ticket_id = %ticket_id,
            decision = %decision,
            scope_id = %scope.id(),
            "Refund decided"
        );

        let outcome = RefundDecisionOutcome {
            ticket,
            refund,
            message: format!("Refund status updated to {}", decision),
        };

        Ok((outcome, purchase.order_number))
    }

    /// Move the money of a completed refund
    async fn repay(
        &self,
        scope: &mut Scope,
        refund: &Refund,
        purchase: &PurchaseRef,
        route: RefundRoute,
        approver_id: Uuid,
    ) -> AppResult<()> {
        if refund.amount.is_zero() {
            tracing::debug!(refund_id = %refund.id, "Zero-amount refund, nothing to repay");
            return Ok(());
        }

        match route {
            RefundRoute::StoreCredit => {
                let entry = NewCreditTransaction::new(
                    refund.user_id,
                    refund.amount,
                    CreditTransactionType::Refund,
                )
                .with_reference("refund", refund.id)
                .with_description(format!("Refund for order {}", purchase.order_number));

                self.ledger.record_transaction(scope, entry).await?;
            }
            RefundRoute::ExternalRepayment => {
                AuditLogBuilder::new(AuditAction::ExternalRepaymentScheduled)
                    .resource("refund", refund.id)
                    .actor(approver_id)
                    .details(serde_json::json!({
                        "user_id": refund.user_id,
                        "amount": refund.amount,
                        "payment_method": refund.payment_method,
                        "ledger_effect": Decimal::ZERO,
                    }))
                    .write(scope)
                    .await?;

                tracing::info!(
                    refund_id = %refund.id,
                    payment_method = %refund.payment_method,
                    "External repayment scheduled"
                );
            }
        }

        Ok(())
    }

    /// Fire-and-forget; runs after commit and never affects the outcome
    fn dispatch_notification(
        &self,
        decision: RefundDecision,
        outcome: &RefundDecisionOutcome,
        order_number: String,
    ) {
        let kind = match decision {
            RefundDecision::Completed => NotificationKind::RefundCompleted,
            RefundDecision::Rejected => NotificationKind::RefundRejected,
        };

        let data = serde_json::json!({
            "user_id": outcome.refund.user_id,
            "ticket_id": outcome.ticket.id,
            "refund_id": outcome.refund.id,
            "order_number": order_number,
            "amount": outcome.refund.amount,
            "external_repayment": outcome.refund.external_repayment_pending,
        });

        let notifier = Arc::clone(&self.notifier);
        let refund_id = outcome.refund.id;

        tokio::spawn(async move {
            if let Err(e) = notifier.send_notification(kind, data).await {
                tracing::warn!(refund_id = %refund_id, kind = %kind, error = %e, "Notification failed");
            }
        });
    }
}

async fn lock_purchase(scope: &mut Scope, purchase_id: Uuid) -> AppResult<PurchaseRef> {
    sqlx::query_as::<_, PurchaseRef>(
        "SELECT id, user_id, order_number, payment_method FROM purchases WHERE id = $1 FOR UPDATE",
    )
    .bind(purchase_id)
    .fetch_optional(scope.conn())
    .await?
    .ok_or_else(|| AppError::not_found("purchase", purchase_id))
}

async fn latest_refund(scope: &mut Scope, ticket_id: Uuid) -> AppResult<Refund> {
    let sql = format!(
        r#"
        SELECT {}
        FROM refunds
        WHERE ticket_id = $1
        ORDER BY requested_at DESC, id DESC
        LIMIT 1
        "#,
        REFUND_COLUMNS
    );

    sqlx::query_as::<_, Refund>(&sql)
        .bind(ticket_id)
        .fetch_optional(scope.conn())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("refund for ticket {}", ticket_id)))
}

/// Purchase becomes `refunded` once every ticket is, `partially_refunded` before
async fn roll_up_purchase(scope: &mut Scope, purchase_id: Uuid) -> AppResult<PurchaseStatus> {
    let (refunded, total): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE status = 'refunded'), COUNT(*)
        FROM tickets
        WHERE purchase_id = $1
        "#,
    )
    .bind(purchase_id)
    .fetch_one(scope.conn())
    .await?;

    let status = PurchaseStatus::after_refund(refunded, total);

    sqlx::query("UPDATE purchases SET status = $2 WHERE id = $1")
        .bind(purchase_id)
        .bind(status.as_str())
        .execute(scope.conn())
        .await?;

    tracing::debug!(purchase_id = %purchase_id, status = %status, "Purchase status rolled up");

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refund(payment_method: &str, status: &str) -> Refund {
        Refund {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: status.to_string(),
            amount: Decimal::new(5000, 2),
            payment_method: payment_method.to_string(),
            previous_ticket_status: "purchased".to_string(),
            external_repayment_pending: false,
            reason: None,
            requested_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        }
    }

    #[test]
    fn test_route_follows_payment_snapshot() {
        assert_eq!(refund("credit", "requested").route(), RefundRoute::StoreCredit);
        assert_eq!(refund("card", "requested").route(), RefundRoute::StoreCredit);
        assert_eq!(
            refund("paypal", "requested").route(),
            RefundRoute::ExternalRepayment
        );
        assert_eq!(
            refund("bank_transfer", "requested").route(),
            RefundRoute::ExternalRepayment
        );
    }

    #[test]
    fn test_refund_status_parse() {
        assert_eq!(
            refund("card", "completed").refund_status().unwrap(),
            RefundStatus::Completed
        );
        assert!(refund("card", "pending").refund_status().is_err());
    }
}
