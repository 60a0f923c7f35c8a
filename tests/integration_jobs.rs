//! Integration tests for maintenance jobs

use rust_decimal_macros::dec;

use ticket_ledger::jobs::{self, JobScheduler};
use ticket_ledger::ledger::{CreditTransactionType, NewCreditTransaction};

mod common;

#[tokio::test]
async fn test_reconciliation_reports_tampered_balance() {
    let pool = common::setup_test_db().await;
    let svc = common::services(&pool);
    let user = common::seed_user(&pool, "user").await;

    svc.record(NewCreditTransaction::new(
        user,
        dec!(40.00),
        CreditTransactionType::Bonus,
    ))
    .await
    .unwrap();

    let clean = jobs::reconcile_credit_balances(&svc.runner).await.unwrap();
    assert!(clean.drifts.iter().all(|d| d.user_id != user));

    // Bypass the ledger to simulate drift
    sqlx::query("UPDATE credit_balances SET balance = balance + 1 WHERE user_id = $1")
        .bind(user)
        .execute(&pool)
        .await
        .unwrap();

    let result = jobs::reconcile_credit_balances(&svc.runner).await.unwrap();
    let drift = result
        .drifts
        .iter()
        .find(|d| d.user_id == user)
        .expect("tampered balance should be reported");
    assert_eq!(drift.stored_balance, dec!(41.00));
    assert_eq!(drift.ledger_sum, dec!(40.00));
    assert!(result.users_checked >= 1);

    let report = JobScheduler::new(svc.runner.clone()).run_all_once().await;
    assert!(report.errors.is_empty());
    assert!(report.ensure_healthy().is_err());

    // Put the row back so other runs start clean
    sqlx::query("UPDATE credit_balances SET balance = balance - 1 WHERE user_id = $1")
        .bind(user)
        .execute(&pool)
        .await
        .unwrap();
}
