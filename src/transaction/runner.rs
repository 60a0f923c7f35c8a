//! Transaction Runner
//!
//! Scoped, all-or-nothing execution of a unit of work. The runner is the
//! only component that checks connections out of the pool; everything else
//! reads and writes through the [`Scope`] it hands to the unit of work.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Transaction isolation level for a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Handle bound to one in-flight transaction.
///
/// Not `Clone`: it is lent to the unit of work as `&mut Scope` and cannot
/// outlive the call to [`TransactionRunner::run`].
pub struct Scope {
    id: Uuid,
    tx: Transaction<'static, Postgres>,
}

impl Scope {
    /// Identifier used to correlate log lines of one unit of work
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection bound to this transaction; use as the query executor.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    async fn configure(
        &mut self,
        isolation: IsolationLevel,
        statement_timeout: Option<Duration>,
    ) -> Result<(), sqlx::Error> {
        // Must run before any other statement of the transaction
        if isolation != IsolationLevel::ReadCommitted {
            sqlx::query(isolation.set_transaction_sql())
                .execute(self.conn())
                .await?;
        }

        if let Some(timeout) = statement_timeout {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(self.conn())
                .await?;
        }

        Ok(())
    }

    async fn rollback(self) {
        let id = self.id;
        if let Err(e) = self.tx.rollback().await {
            tracing::error!(scope_id = %id, error = %e, "Rollback failed");
        } else {
            tracing::debug!(scope_id = %id, "Unit of work rolled back");
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("id", &self.id).finish()
    }
}

/// Runs units of work against the shared pool
#[derive(Debug, Clone)]
pub struct TransactionRunner {
    pool: PgPool,
    statement_timeout: Option<Duration>,
    unit_timeout: Option<Duration>,
}

impl TransactionRunner {
    /// Create a runner with no timeouts beyond the pool's own
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
            unit_timeout: None,
        }
    }

    /// Create a runner with the timeouts from configuration
    pub fn from_config(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            statement_timeout: Some(config.statement_timeout),
            unit_timeout: config.unit_of_work_timeout,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    /// Run `unit_of_work` in a new READ COMMITTED transaction.
    ///
    /// Commits when the unit returns `Ok`, rolls back and returns the error
    /// otherwise. The connection goes back to the pool on every path.
    pub async fn run<T, F>(&self, unit_of_work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Scope) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        self.run_with(IsolationLevel::ReadCommitted, unit_of_work)
            .await
    }

    /// Run `unit_of_work` in a new transaction at the given isolation level
    pub async fn run_with<T, F>(&self, isolation: IsolationLevel, unit_of_work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Scope) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        let tx = self.pool.begin().await?;
        let mut scope = Scope {
            id: Uuid::new_v4(),
            tx,
        };

        tracing::debug!(scope_id = %scope.id, ?isolation, "Unit of work started");

        if let Err(e) = scope.configure(isolation, self.statement_timeout).await {
            scope.rollback().await;
            return Err(e.into());
        }

        let outcome = match self.unit_timeout {
            Some(limit) => {
                let bounded = tokio::time::timeout(limit, unit_of_work(&mut scope)).await;
                bounded.unwrap_or_else(|_| {
                    tracing::warn!(
                        scope_id = %scope.id,
                        timeout_ms = limit.as_millis() as u64,
                        "Unit of work timed out"
                    );
                    Err(AppError::Timeout(limit.as_millis()))
                })
            }
            None => unit_of_work(&mut scope).await,
        };

        match outcome {
            Ok(value) => {
                let id = scope.id;
                scope.tx.commit().await?;
                tracing::debug!(scope_id = %id, "Unit of work committed");
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(scope_id = %scope.id, error = %err, "Unit of work failed");
                scope.rollback().await;
                Err(err)
            }
        }
    }

    /// Join the caller's scope when one is supplied, otherwise run the unit
    /// in its own transaction. Never opens a nested transaction.
    pub async fn join<T, F>(&self, scope: Option<&mut Scope>, unit_of_work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Scope) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        self.join_with(scope, IsolationLevel::ReadCommitted, unit_of_work)
            .await
    }

    /// Like [`join`](Self::join), but a fresh unit runs at `isolation`. A
    /// joined scope keeps the isolation level its owner chose.
    pub async fn join_with<T, F>(
        &self,
        scope: Option<&mut Scope>,
        isolation: IsolationLevel,
        unit_of_work: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Scope) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        match scope {
            Some(scope) => unit_of_work(scope).await,
            None => self.run_with(isolation, unit_of_work).await,
        }
    }
}
