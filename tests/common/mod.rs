//! Common test utilities
//!
//! Integration tests need a Postgres database in `DATABASE_URL`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use ticket_ledger::ledger::{CreditTransaction, NewCreditTransaction};
use ticket_ledger::refunds::{NotificationDispatcher, NotificationError, NotificationKind};
use ticket_ledger::{
    AppResult, CreditLedger, PurchaseAggregate, RefundWorkflow, TicketStore, TransactionRunner,
};

const SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

/// Serializes schema setup across concurrently running test binaries
const SCHEMA_LOCK_KEY: i64 = 7_311_204;

/// Connect and make sure the schema exists. Fixtures use fresh ids, so tests
/// never truncate and can run in parallel.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to take schema lock");

    // Multi-statement script: goes through the simple query protocol
    let applied = (&mut *conn).execute(SCHEMA).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to release schema lock");

    applied.expect("Failed to apply schema");

    pool
}

const HISTORY_READER_SETUP: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'ledger_history_reader') THEN
        CREATE ROLE ledger_history_reader NOLOGIN;
    END IF;
END
$$;
GRANT ledger_history_reader TO CURRENT_USER;
GRANT SELECT ON credit_transactions TO ledger_history_reader;
REVOKE ALL ON purchases, refunds FROM ledger_history_reader;
"#;

/// Pool whose sessions run as a role that can read the ledger but not the
/// purchases and refunds it points at.
pub async fn history_reader_pool(pool: &PgPool) -> PgPool {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to take schema lock");

    let applied = (&mut *conn).execute(HISTORY_READER_SETUP).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to release schema lock");

    applied.expect("Failed to set up history reader role");

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    PgPoolOptions::new()
        .max_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET ROLE ledger_history_reader")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .expect("Failed to connect history reader pool")
}

/// All core services wired to one runner, with a recording notifier
pub struct Services {
    pub runner: TransactionRunner,
    pub ledger: CreditLedger,
    pub tickets: TicketStore,
    pub refunds: RefundWorkflow,
    pub purchases: PurchaseAggregate,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn services(pool: &PgPool) -> Services {
    services_with_notifier(pool, Arc::new(RecordingNotifier::default()))
}

pub fn services_with_notifier(pool: &PgPool, notifier: Arc<RecordingNotifier>) -> Services {
    let runner = TransactionRunner::new(pool.clone()).with_statement_timeout(Duration::from_secs(5));
    let ledger = CreditLedger::new(runner.clone());
    let tickets = TicketStore::new(runner.clone());
    let refunds = RefundWorkflow::new(
        runner.clone(),
        tickets.clone(),
        ledger.clone(),
        notifier.clone(),
    );
    let purchases = PurchaseAggregate::new(runner.clone());

    Services {
        runner,
        ledger,
        tickets,
        refunds,
        purchases,
        notifier,
    }
}

impl Services {
    /// Record one ledger movement in its own unit of work
    pub async fn record(&self, entry: NewCreditTransaction) -> AppResult<CreditTransaction> {
        let ledger = self.ledger.clone();
        self.runner
            .run(move |s| Box::pin(async move { ledger.record_transaction(s, entry).await }))
            .await
    }
}

// =========================================================================
// Notifications
// =========================================================================

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, serde_json::Value)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(NotificationKind, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    /// Dispatch is fire-and-forget; poll until `count` notifications arrived
    pub async fn wait_for(&self, count: usize) -> Vec<(NotificationKind, serde_json::Value)> {
        for _ in 0..50 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send_notification(
        &self,
        kind: NotificationKind,
        data: serde_json::Value,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push((kind, data));
        if self.fail {
            return Err(NotificationError::Transport("mail server down".to_string()));
        }
        Ok(())
    }
}

// =========================================================================
// Fixtures
// =========================================================================

pub async fn seed_user(pool: &PgPool, role: &str) -> Uuid {
    let id = Uuid::new_v4();
    let username = format!("user_{}", &id.simple().to_string()[..8]);

    sqlx::query("INSERT INTO users (id, username, email, role) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(&username)
        .bind(format!("{}@example.test", username))
        .bind(role)
        .execute(pool)
        .await
        .expect("Failed to seed user");

    id
}

pub async fn seed_event(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO events (id, name, venue, starts_at) VALUES ($1, $2, $3, NOW() + INTERVAL '7 days')",
    )
    .bind(id)
    .bind("Summer Festival")
    .bind("Main Arena")
    .execute(pool)
    .await
    .expect("Failed to seed event");

    id
}

#[derive(Debug, Clone)]
pub struct SeededPurchase {
    pub id: Uuid,
    pub order_number: String,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
}

/// Purchase with one item line and one ticket per price
pub async fn seed_purchase(
    pool: &PgPool,
    user_id: Uuid,
    event_id: Uuid,
    payment_method: &str,
    prices: &[Decimal],
) -> SeededPurchase {
    let id = Uuid::new_v4();
    let order_number = format!("ORD-{}", &id.simple().to_string()[..12].to_uppercase());
    let total: Decimal = prices.iter().copied().sum();

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    sqlx::query(
        r#"
        INSERT INTO purchases (id, user_id, event_id, order_number, total_amount, payment_method)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(event_id)
    .bind(&order_number)
    .bind(total)
    .bind(payment_method)
    .execute(&mut *tx)
    .await
    .expect("Failed to seed purchase");

    sqlx::query(
        r#"
        INSERT INTO purchase_items (id, purchase_id, ticket_type_id, ticket_type_name, quantity, unit_price)
        VALUES ($1, $2, $3, 'General Admission', $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(id)
    .bind(Uuid::new_v4())
    .bind(prices.len() as i32)
    .bind(prices.first().copied().unwrap_or_default())
    .execute(&mut *tx)
    .await
    .expect("Failed to seed purchase item");

    let mut ticket_ids = Vec::with_capacity(prices.len());
    for price in prices {
        let ticket_id = Uuid::new_v4();
        sqlx::query("INSERT INTO tickets (id, purchase_id, event_id, price) VALUES ($1, $2, $3, $4)")
            .bind(ticket_id)
            .bind(id)
            .bind(event_id)
            .bind(*price)
            .execute(&mut *tx)
            .await
            .expect("Failed to seed ticket");
        ticket_ids.push(ticket_id);
    }

    tx.commit().await.expect("Failed to commit fixtures");

    SeededPurchase {
        id,
        order_number,
        event_id,
        ticket_ids,
    }
}

pub async fn ledger_row_count(pool: &PgPool, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count ledger rows")
}

pub async fn ticket_status(pool: &PgPool, ticket_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read ticket status")
}
