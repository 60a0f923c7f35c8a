//! Integration tests for the transaction runner

use std::time::Duration;

use rust_decimal_macros::dec;

use ticket_ledger::ledger::{CreditTransactionType, NewCreditTransaction};
use ticket_ledger::{AppError, IsolationLevel, TransactionRunner};

mod common;

#[tokio::test]
async fn test_error_rolls_back_every_write() {
    let pool = common::setup_test_db().await;
    let svc = common::services(&pool);
    let user = common::seed_user(&pool, "user").await;

    let ledger = svc.ledger.clone();
    let result: Result<(), AppError> = svc
        .runner
        .run(move |s| {
            Box::pin(async move {
                ledger
                    .record_transaction(
                        s,
                        NewCreditTransaction::new(user, dec!(100.00), CreditTransactionType::Bonus),
                    )
                    .await?;

                // Visible inside the unit
                let inside = ledger.get_balance(user, Some(s)).await?;
                assert_eq!(inside, dec!(100.00));

                Err(AppError::InvalidStatus("caller validation failed".to_string()))
            })
        })
        .await;

    assert!(matches!(result, Err(AppError::InvalidStatus(_))));
    assert_eq!(common::ledger_row_count(&pool, user).await, 0);
    assert_eq!(svc.ledger.get_balance(user, None).await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_joined_operations_share_one_unit() {
    let pool = common::setup_test_db().await;
    let svc = common::services(&pool);
    let user = common::seed_user(&pool, "user").await;

    let ledger = svc.ledger.clone();
    let (before, after) = svc
        .runner
        .run(move |s| {
            Box::pin(async move {
                let before = ledger.get_balance(user, Some(&mut *s)).await?;
                ledger
                    .record_transaction(
                        s,
                        NewCreditTransaction::new(user, dec!(7.25), CreditTransactionType::Bonus),
                    )
                    .await?;
                let after = ledger.sum_transactions(user, Some(s)).await?;
                Ok((before, after))
            })
        })
        .await
        .unwrap();

    assert_eq!(before, dec!(0));
    assert_eq!(after, dec!(7.25));
}

#[tokio::test]
async fn test_unit_timeout_rolls_back() {
    let pool = common::setup_test_db().await;
    let runner = TransactionRunner::new(pool.clone()).with_unit_timeout(Duration::from_millis(100));
    let user = common::seed_user(&pool, "user").await;

    let result: Result<(), AppError> = runner
        .run(move |s| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO credit_transactions (id, user_id, amount, type) VALUES ($1, $2, 1, 'bonus')",
                )
                .bind(uuid::Uuid::new_v4())
                .bind(user)
                .execute(s.conn())
                .await?;

                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(AppError::Timeout(100))));
    assert_eq!(common::ledger_row_count(&pool, user).await, 0);
}

#[tokio::test]
async fn test_statement_timeout_is_infrastructure_error() {
    let pool = common::setup_test_db().await;
    let runner =
        TransactionRunner::new(pool.clone()).with_statement_timeout(Duration::from_millis(50));

    let result: Result<(), AppError> = runner
        .run_with(IsolationLevel::ReadCommitted, |s| {
            Box::pin(async move {
                sqlx::query("SELECT pg_sleep(1)").execute(s.conn()).await?;
                Ok(())
            })
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ticket_ledger::ErrorKind::Infrastructure);

    // The connection went back to the pool in a usable state
    let one: i32 = runner
        .run(|s| {
            Box::pin(async move {
                let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(s.conn()).await?;
                Ok(one)
            })
        })
        .await
        .unwrap();
    assert_eq!(one, 1);
}

#[tokio::test]
async fn test_repeatable_read_snapshot() {
    let pool = common::setup_test_db().await;
    let svc = common::services(&pool);
    let user = common::seed_user(&pool, "user").await;
    let writer = common::services(&pool);

    let ledger = svc.ledger.clone();
    let (first, second) = svc
        .runner
        .run_with(IsolationLevel::RepeatableRead, move |s| {
            Box::pin(async move {
                let first = ledger.sum_transactions(user, Some(&mut *s)).await?;
                writer
                    .record(NewCreditTransaction::new(user, dec!(3.00), CreditTransactionType::Bonus))
                    .await?;
                let second = ledger.sum_transactions(user, Some(s)).await?;
                Ok((first, second))
            })
        })
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(svc.ledger.get_balance(user, None).await.unwrap(), dec!(3.00));
}
