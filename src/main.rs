//! ticket_ledger - maintenance worker
//!
//! Connects to the ledger database and runs the periodic maintenance jobs
//! (balance reconciliation, external repayment report) until shutdown.

use ticket_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use ticket_ledger::{db, telemetry, Config, TransactionRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(config.is_production());

    tracing::info!(environment = %config.environment, "Starting ticket_ledger worker");
    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let runner = TransactionRunner::from_config(pool.clone(), &config);
    let scheduler =
        JobScheduler::with_config(runner, JobSchedulerConfig::from_config(&config)).start();

    shutdown_signal().await?;

    // Cleanup
    tracing::info!("Worker shutting down...");
    scheduler.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            },
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    Ok(())
}
