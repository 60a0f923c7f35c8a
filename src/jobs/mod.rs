//! Scheduled Jobs
//!
//! Periodic maintenance: balance reconciliation against the ledger and a
//! report of refunds still waiting for an external repayment.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::interval;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::transaction::{IsolationLevel, TransactionRunner};

// =========================================================================
// Balance reconciliation
// =========================================================================

/// A user whose running balance disagrees with the sum of their transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BalanceDrift {
    pub user_id: Uuid,
    pub stored_balance: Decimal,
    pub ledger_sum: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    pub users_checked: i64,
    pub drifts: Vec<BalanceDrift>,
}

/// Compare every running balance with its ledger sum in one snapshot.
///
/// Read-only: drift is reported, never repaired.
pub async fn reconcile_credit_balances(
    runner: &TransactionRunner,
) -> Result<ReconciliationResult, JobError> {
    let result = runner
        .run_with(IsolationLevel::RepeatableRead, |s| {
            Box::pin(async move {
                let users_checked: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM (
                        SELECT user_id FROM credit_balances
                        UNION
                        SELECT user_id FROM credit_transactions
                    ) AS u
                    "#,
                )
                .fetch_one(s.conn())
                .await?;

                let drifts = sqlx::query_as::<_, BalanceDrift>(
                    r#"
                    SELECT
                        COALESCE(b.user_id, t.user_id) AS user_id,
                        COALESCE(b.balance, 0) AS stored_balance,
                        COALESCE(t.total, 0) AS ledger_sum
                    FROM credit_balances b
                    FULL OUTER JOIN (
                        SELECT user_id, SUM(amount) AS total
                        FROM credit_transactions
                        GROUP BY user_id
                    ) t ON t.user_id = b.user_id
                    WHERE COALESCE(b.balance, 0) <> COALESCE(t.total, 0)
                    ORDER BY 1
                    "#,
                )
                .fetch_all(s.conn())
                .await?;

                Ok(ReconciliationResult {
                    users_checked,
                    drifts,
                })
            })
        })
        .await?;

    for drift in &result.drifts {
        tracing::error!(
            user_id = %drift.user_id,
            stored_balance = %drift.stored_balance,
            ledger_sum = %drift.ledger_sum,
            "Credit balance out of sync with ledger"
        );
    }

    tracing::info!(
        users_checked = result.users_checked,
        drifts = result.drifts.len(),
        "Credit balance reconciliation finished"
    );

    Ok(result)
}

// =========================================================================
// External repayments
// =========================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PendingRepayments {
    pub pending_count: i64,
    pub pending_amount: Decimal,
    pub oldest_decided_at: Option<DateTime<Utc>>,
}

/// Completed refunds whose money must still be returned out of band
pub async fn pending_external_repayments(
    runner: &TransactionRunner,
) -> Result<PendingRepayments, JobError> {
    let pending = runner
        .run(|s| {
            Box::pin(async move {
                let pending = sqlx::query_as::<_, PendingRepayments>(
                    r#"
                    SELECT
                        COUNT(*) AS pending_count,
                        COALESCE(SUM(amount), 0) AS pending_amount,
                        MIN(decided_at) AS oldest_decided_at
                    FROM refunds
                    WHERE status = 'completed' AND external_repayment_pending
                    "#,
                )
                .fetch_one(s.conn())
                .await?;
                Ok(pending)
            })
        })
        .await?;

    if pending.pending_count > 0 {
        tracing::warn!(
            pending_count = pending.pending_count,
            pending_amount = %pending.pending_amount,
            "Refunds awaiting external repayment"
        );
    }

    Ok(pending)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for balance reconciliation (default: 5 minutes)
    pub reconcile_interval: Duration,
    /// Interval for the external repayment report (default: 1 hour)
    pub repayment_report_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(300),
            repayment_report_interval: Duration::from_secs(3600),
        }
    }
}

impl JobSchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconcile_interval: config.reconcile_interval,
            ..Self::default()
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    runner: TransactionRunner,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(runner: TransactionRunner) -> Self {
        Self {
            runner,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(runner: TransactionRunner, config: JobSchedulerConfig) -> Self {
        Self { runner, config }
    }

    /// Start the job scheduler in the background.
    /// Abort the returned handle to stop it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            "Job scheduler started"
        );

        let mut reconcile_interval = interval(self.config.reconcile_interval);
        let mut repayment_interval = interval(self.config.repayment_report_interval);

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    if let Err(e) = reconcile_credit_balances(&self.runner).await {
                        tracing::error!(error = %e, "Balance reconciliation failed");
                    }
                }
                _ = repayment_interval.tick() => {
                    if let Err(e) = pending_external_repayments(&self.runner).await {
                        tracing::error!(error = %e, "External repayment report failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::new();

        match reconcile_credit_balances(&self.runner).await {
            Ok(result) => {
                report.users_checked = result.users_checked;
                report.balance_drifts = result.drifts;
            }
            Err(e) => report.errors.push(format!("Balance reconciliation: {}", e)),
        }

        match pending_external_repayments(&self.runner).await {
            Ok(pending) => report.pending_repayments = pending,
            Err(e) => report.errors.push(format!("External repayment report: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub users_checked: i64,
    pub balance_drifts: Vec<BalanceDrift>,
    pub pending_repayments: PendingRepayments,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl MaintenanceReport {
    fn new() -> Self {
        Self {
            users_checked: 0,
            balance_drifts: Vec::new(),
            pending_repayments: PendingRepayments::default(),
            errors: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Fail when a job errored or any balance drifted
    pub fn ensure_healthy(&self) -> Result<(), JobError> {
        if !self.errors.is_empty() {
            return Err(JobError::Failed(self.errors.join("; ")));
        }
        if !self.balance_drifts.is_empty() {
            return Err(JobError::BalanceDrift(self.balance_drifts.len()));
        }
        Ok(())
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("{0} credit balance(s) out of sync with the ledger")]
    BalanceDrift(usize),

    #[error("Maintenance jobs failed: {0}")]
    Failed(String),
}

// =========================================================================
// Tests
// =========================================================================
