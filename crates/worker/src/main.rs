//! Storefront Background Worker
//!
//! Handles scheduled jobs:
//! - Trial expiry sweep (hourly by default, `SWEEP_CRON` overrides)
//! - Worker heartbeat (every 5 minutes)

use anyhow::Context;
use storefront_billing::{BillingService, SweepReport};
use storefront_shared::{create_pool, run_migrations};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_SWEEP_CRON: &str = "0 0 * * * *";
const DEFAULT_TRIAL_DAYS: i64 = 7;

fn log_sweep_report(report: &SweepReport) {
    info!(
        scanned = report.scanned,
        expired = report.expired,
        conflicts = report.conflicts,
        errors = report.errors,
        "Expiry sweep complete"
    );

    if report.conflicts > 0 {
        warn!(
            conflicts = report.conflicts,
            "Some tenants changed during the sweep; the next run will re-evaluate them"
        );
    }
}

fn trial_days() -> anyhow::Result<i64> {
    match std::env::var("TRIAL_DAYS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("TRIAL_DAYS must be an integer, got {:?}", raw)),
        Err(_) => Ok(DEFAULT_TRIAL_DAYS),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Storefront Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    info!("Database pool created");

    let billing = BillingService::from_pool(pool, trial_days()?);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial expiry sweep
    let sweep_cron =
        std::env::var("SWEEP_CRON").unwrap_or_else(|_| DEFAULT_SWEEP_CRON.to_string());
    let sweeper = billing.sweeper.clone();
    scheduler
        .add(Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                info!("Running scheduled trial expiry sweep");
                match sweeper.run(OffsetDateTime::now_utc()).await {
                    Ok(report) => log_sweep_report(&report),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %sweep_cron, "Scheduled: Trial expiry sweep");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Storefront Worker started successfully with 2 scheduled jobs");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker");

    Ok(())
}
