//! Purchase Aggregate
//!
//! Read-only views of a purchase. The detail view is assembled from one
//! REPEATABLE READ snapshot so items, tickets and status always agree.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{PageRequest, Pagination, RequestContext};
use crate::error::{AppError, AppResult};
use crate::tickets::Ticket;
use crate::transaction::{IsolationLevel, Scope, TransactionRunner};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Option<Uuid>,
    pub order_number: String,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub ticket_type_id: Uuid,
    pub ticket_type_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub name: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
}

/// Purchase with everything it owns or references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseDetails {
    pub purchase: Purchase,
    pub items: Vec<PurchaseItem>,
    /// None when the event was deleted after purchase
    pub event: Option<EventSummary>,
    pub tickets: Vec<Ticket>,
}

/// One row of a user's purchase history
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSummary {
    pub id: Uuid,
    pub order_number: String,
    pub event_id: Option<Uuid>,
    pub event_name: Option<String>,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_method: String,
    pub ticket_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseHistory {
    pub purchases: Vec<PurchaseSummary>,
    pub pagination: Pagination,
}

/// Purchase Aggregate
#[derive(Debug, Clone)]
pub struct PurchaseAggregate {
    runner: TransactionRunner,
}

impl PurchaseAggregate {
    pub fn new(runner: TransactionRunner) -> Self {
        Self { runner }
    }

    /// Full purchase for its owner or an administrator.
    ///
    /// `NotFound` when absent, `Forbidden` when it belongs to someone else.
    /// Without a caller scope the reads share one REPEATABLE READ snapshot.
    #[instrument(skip(self, context, scope), fields(requester_id = %context.user_id))]
    pub async fn get_purchase_by_id(
        &self,
        purchase_id: Uuid,
        context: &RequestContext,
        scope: Option<&mut Scope>,
    ) -> AppResult<PurchaseDetails> {
        let context = context.clone();

        self.runner
            .join_with(scope, IsolationLevel::RepeatableRead, move |s| {
                Box::pin(load_details(s, purchase_id, context))
            })
            .await
    }

    /// Newest-first page of a user's purchases
    pub async fn get_purchase_history(
        &self,
        user_id: Uuid,
        page: PageRequest,
        scope: Option<&mut Scope>,
    ) -> AppResult<PurchaseHistory> {
        let (purchases, total) = self
            .runner
            .join_with(scope, IsolationLevel::RepeatableRead, move |s| {
                Box::pin(history_page(s, user_id, page))
            })
            .await?;

        Ok(PurchaseHistory {
            purchases,
            pagination: Pagination::new(page, total),
        })
    }
}

async fn load_details(
    scope: &mut Scope,
    purchase_id: Uuid,
    context: RequestContext,
) -> AppResult<PurchaseDetails> {
    let purchase = sqlx::query_as::<_, Purchase>(
        r#"
        SELECT id, user_id, event_id, order_number, total_amount, status,
               payment_method, created_at
        FROM purchases
        WHERE id = $1
        "#,
    )
    .bind(purchase_id)
    .fetch_optional(scope.conn())
    .await?
    .ok_or_else(|| AppError::not_found("purchase", purchase_id))?;

    if !context.can_access(purchase.user_id) {
        tracing::warn!(
            purchase_id = %purchase_id,
            requester_id = %context.user_id,
            "Purchase access denied"
        );
        return Err(AppError::Forbidden(format!(
            "purchase {} belongs to another user",
            purchase_id
        )));
    }

    let items = sqlx::query_as::<_, PurchaseItem>(
        r#"
        SELECT id, purchase_id, ticket_type_id, ticket_type_name, quantity, unit_price
        FROM purchase_items
        WHERE purchase_id = $1
        ORDER BY ticket_type_name, id
        "#,
    )
    .bind(purchase_id)
    .fetch_all(scope.conn())
    .await?;

    let event = match purchase.event_id {
        Some(event_id) => {
            sqlx::query_as::<_, EventSummary>(
                "SELECT id, name, venue, starts_at FROM events WHERE id = $1",
            )
            .bind(event_id)
            .fetch_optional(scope.conn())
            .await?
        }
        None => None,
    };

    let tickets = sqlx::query_as::<_, Ticket>(
        r#"
        SELECT id, purchase_id, event_id, status, checked_in_at, price, created_at, updated_at
        FROM tickets
        WHERE purchase_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(purchase_id)
    .fetch_all(scope.conn())
    .await?;

    Ok(PurchaseDetails {
        purchase,
        items,
        event,
        tickets,
    })
}

async fn history_page(
    scope: &mut Scope,
    user_id: Uuid,
    page: PageRequest,
) -> AppResult<(Vec<PurchaseSummary>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM purchases WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(scope.conn())
        .await?;

    let purchases = sqlx::query_as::<_, PurchaseSummary>(
        r#"
        SELECT p.id, p.order_number, p.event_id, e.name AS event_name,
               p.total_amount, p.status, p.payment_method,
               (SELECT COUNT(*) FROM tickets t WHERE t.purchase_id = p.id) AS ticket_count,
               p.created_at
        FROM purchases p
        LEFT JOIN events e ON e.id = p.event_id
        WHERE p.user_id = $1
        ORDER BY p.created_at DESC, p.id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(scope.conn())
    .await?;

    Ok((purchases, total))
}
