//! One-shot maintenance run.
//!
//! Runs every maintenance job once, prints the report as JSON and exits
//! non-zero when a job failed or a balance drifted from its ledger.
//!
//! Usage: cargo run --bin reconcile

use ticket_ledger::jobs::JobScheduler;
use ticket_ledger::{db, telemetry, Config, TransactionRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(config.is_production());

    let pool = db::create_pool(&config).await?;
    let runner = TransactionRunner::from_config(pool.clone(), &config);

    let report = JobScheduler::new(runner).run_all_once().await;
    pool.close().await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    report.ensure_healthy()?;
    Ok(())
}
