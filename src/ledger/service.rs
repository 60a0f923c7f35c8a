//! Credit Ledger Service
//!
//! Append-only record of credit movements. Every insert updates the
//! denormalized `credit_balances` row in the same scope, so the running
//! balance and the sum of transactions never diverge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{CreditAmount, PageRequest, Pagination, RequestContext};
use crate::error::{AppError, AppResult};
use crate::transaction::{IsolationLevel, Scope, TransactionRunner};

use super::CreditTransactionType;

/// Reference types that point at a purchase row
const PURCHASE_REFERENCES: [&str; 2] = ["purchase", "payment"];
const REFUND_REFERENCE: &str = "refund";

/// Stored credit movement
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to append a credit movement
#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: Uuid,
    /// Signed amount: negative debits, positive credits. Zero is rejected.
    pub amount: Decimal,
    pub transaction_type: CreditTransactionType,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
}

impl NewCreditTransaction {
    pub fn new(user_id: Uuid, amount: Decimal, transaction_type: CreditTransactionType) -> Self {
        Self {
            user_id,
            amount,
            transaction_type,
            reference_type: None,
            reference_id: None,
            description: None,
        }
    }

    pub fn with_reference(mut self, reference_type: &str, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type.to_string());
        self.reference_id = Some(reference_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A history row decorated for display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryEntry {
    pub id: Uuid,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub type_label: String,
    pub action_text: String,
    pub is_addition: bool,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreditHistoryEntry {
    /// Decorate a stored transaction. `is_addition` depends only on the sign.
    pub fn from_transaction(tx: CreditTransaction) -> Self {
        let labels = CreditTransactionType::from(tx.transaction_type.as_str()).labels();

        Self {
            id: tx.id,
            is_addition: tx.amount > Decimal::ZERO,
            amount: tx.amount,
            transaction_type: tx.transaction_type,
            type_label: labels.type_label.to_string(),
            action_text: labels.action_text.to_string(),
            reference_type: tx.reference_type,
            reference_id: tx.reference_id,
            order_number: None,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

/// One page of credit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditHistory {
    pub transactions: Vec<CreditHistoryEntry>,
    pub pagination: Pagination,
}

/// Credit Ledger
#[derive(Debug, Clone)]
pub struct CreditLedger {
    runner: TransactionRunner,
}

impl CreditLedger {
    pub fn new(runner: TransactionRunner) -> Self {
        Self { runner }
    }

    // =========================================================================
    // Balance
    // =========================================================================

    /// Current balance. Zero when the user has no transactions; `NotFound`
    /// only when the user does not exist.
    pub async fn get_balance(&self, user_id: Uuid, scope: Option<&mut Scope>) -> AppResult<Decimal> {
        self.runner
            .join(scope, move |s| Box::pin(balance_of(s, user_id)))
            .await
    }

    /// Balance recomputed from the transactions themselves
    pub async fn sum_transactions(
        &self,
        user_id: Uuid,
        scope: Option<&mut Scope>,
    ) -> AppResult<Decimal> {
        self.runner
            .join(scope, move |s| {
                Box::pin(async move {
                    let sum: Decimal = sqlx::query_scalar(
                        "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions WHERE user_id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(s.conn())
                    .await?;
                    Ok(sum)
                })
            })
            .await
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Append one immutable movement inside the caller's unit of work
    pub async fn record_transaction(
        &self,
        scope: &mut Scope,
        entry: NewCreditTransaction,
    ) -> AppResult<CreditTransaction> {
        // Validate before touching the store
        let amount = CreditAmount::new(entry.amount)?;

        ensure_user_exists(scope, entry.user_id).await?;

        let id = Uuid::new_v4();
        let transaction = sqlx::query_as::<_, CreditTransaction>(
            r#"
            INSERT INTO credit_transactions
                (id, user_id, amount, type, reference_type, reference_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, amount, type AS transaction_type,
                      reference_type, reference_id, description, created_at
            "#,
        )
        .bind(id)
        .bind(entry.user_id)
        .bind(amount.value())
        .bind(entry.transaction_type.as_str())
        .bind(&entry.reference_type)
        .bind(entry.reference_id)
        .bind(&entry.description)
        .fetch_one(scope.conn())
        .await?;

        let balance = apply_to_balance(scope, entry.user_id, amount, id).await?;

        tracing::info!(
            transaction_id = %id,
            user_id = %entry.user_id,
            amount = %amount,
            transaction_type = %entry.transaction_type,
            balance = %balance,
            "Credit transaction recorded"
        );

        Ok(transaction)
    }

    /// Manual balance correction by an administrator, with an audit row
    #[instrument(skip(self, context), fields(admin_id = %context.user_id))]
    pub async fn admin_adjustment(
        &self,
        context: &RequestContext,
        user_id: Uuid,
        amount: Decimal,
        reason: String,
    ) -> AppResult<CreditTransaction> {
        context.require_admin("adjust credit balances")?;
        CreditAmount::new(amount)?;

        let ledger = self.clone();
        let admin_id = context.user_id;

        self.runner
            .run(move |s| {
                Box::pin(async move {
                    let entry = NewCreditTransaction::new(
                        user_id,
                        amount,
                        CreditTransactionType::AdminAdjustment,
                    )
                    .with_description(reason.clone());

                    let transaction = ledger.record_transaction(s, entry).await?;

                    AuditLogBuilder::new(AuditAction::CreditAdjusted)
                        .resource("credit_transaction", transaction.id)
                        .actor(admin_id)
                        .details(serde_json::json!({
                            "user_id": user_id,
                            "amount": transaction.amount,
                            "reason": reason,
                        }))
                        .write(s)
                        .await?;

                    Ok(transaction)
                })
            })
            .await
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Newest-first page of decorated history.
    ///
    /// The count and the page come from one snapshot. Order numbers are
    /// resolved afterwards in a unit of their own, so a failed lookup never
    /// touches the caller's scope.
    pub async fn get_history(
        &self,
        user_id: Uuid,
        page: PageRequest,
        scope: Option<&mut Scope>,
    ) -> AppResult<CreditHistory> {
        let (rows, total) = self
            .runner
            .join_with(scope, IsolationLevel::RepeatableRead, move |s| {
                Box::pin(history_page(s, user_id, page))
            })
            .await?;

        let mut transactions: Vec<CreditHistoryEntry> = rows
            .into_iter()
            .map(CreditHistoryEntry::from_transaction)
            .collect();

        self.attach_order_numbers(&mut transactions).await;

        Ok(CreditHistory {
            transactions,
            pagination: Pagination::new(page, total),
        })
    }

    /// Best effort: on failure the order numbers are simply left out
    async fn attach_order_numbers(&self, entries: &mut [CreditHistoryEntry]) {
        let mut purchase_ids = Vec::new();
        let mut refund_ids = Vec::new();

        for entry in entries.iter() {
            match (entry.reference_type.as_deref(), entry.reference_id) {
                (Some(kind), Some(id)) if PURCHASE_REFERENCES.contains(&kind) => {
                    purchase_ids.push(id)
                }
                (Some(REFUND_REFERENCE), Some(id)) => refund_ids.push(id),
                _ => {}
            }
        }

        if purchase_ids.is_empty() && refund_ids.is_empty() {
            return;
        }

        let resolved = self
            .runner
            .run(move |s| Box::pin(resolve_order_numbers(s, purchase_ids, refund_ids)))
            .await;

        match resolved {
            Ok(order_numbers) => {
                for entry in entries.iter_mut() {
                    if let Some(id) = entry.reference_id {
                        entry.order_number = order_numbers.get(&id).cloned();
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve order numbers for credit history");
            }
        }
    }
}

async fn ensure_user_exists(scope: &mut Scope, user_id: Uuid) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(scope.conn())
        .await?;

    if exists {
        Ok(())
    } else {
        Err(AppError::not_found("user", user_id))
    }
}

async fn balance_of(scope: &mut Scope, user_id: Uuid) -> AppResult<Decimal> {
    let balance: Option<Decimal> =
        sqlx::query_scalar("SELECT balance FROM credit_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(scope.conn())
            .await?;

    match balance {
        Some(balance) => Ok(balance),
        None => {
            ensure_user_exists(scope, user_id).await?;
            Ok(Decimal::ZERO)
        }
    }
}

/// Add a movement to the running balance; the upsert takes the row lock
async fn apply_to_balance(
    scope: &mut Scope,
    user_id: Uuid,
    amount: CreditAmount,
    transaction_id: Uuid,
) -> AppResult<Decimal> {
    let balance: Decimal = sqlx::query_scalar(
        r#"
        INSERT INTO credit_balances (user_id, balance, last_transaction_id, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (user_id) DO UPDATE
        SET
            balance = credit_balances.balance + EXCLUDED.balance,
            last_transaction_id = EXCLUDED.last_transaction_id,
            updated_at = NOW()
        RETURNING balance
        "#,
    )
    .bind(user_id)
    .bind(amount.value())
    .bind(transaction_id)
    .fetch_one(scope.conn())
    .await?;

    Ok(balance)
}

async fn history_page(
    scope: &mut Scope,
    user_id: Uuid,
    page: PageRequest,
) -> AppResult<(Vec<CreditTransaction>, i64)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(scope.conn())
            .await?;

    let rows = sqlx::query_as::<_, CreditTransaction>(
        r#"
        SELECT id, user_id, amount, type AS transaction_type,
               reference_type, reference_id, description, created_at
        FROM credit_transactions
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(scope.conn())
    .await?;

    Ok((rows, total))
}

async fn resolve_order_numbers(
    scope: &mut Scope,
    purchase_ids: Vec<Uuid>,
    refund_ids: Vec<Uuid>,
) -> AppResult<HashMap<Uuid, String>> {
    let mut resolved = HashMap::new();

    if !purchase_ids.is_empty() {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, order_number FROM purchases WHERE id = ANY($1)")
                .bind(&purchase_ids)
                .fetch_all(scope.conn())
                .await?;
        resolved.extend(rows);
    }

    if !refund_ids.is_empty() {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT r.id, p.order_number
            FROM refunds r
            JOIN purchases p ON p.id = r.purchase_id
            WHERE r.id = ANY($1)
            "#,
        )
        .bind(&refund_ids)
        .fetch_all(scope.conn())
        .await?;
        resolved.extend(rows);
    }

    Ok(resolved)
}
