use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::service::Pipeline;

/// Schedule the daily maintenance run at each `HH:MM` (UTC) in `times`.
///
/// Returns `None` when no times are configured.
pub async fn start_scheduler(pipeline: Arc<Pipeline>, times: &[String]) -> Result<Option<JobScheduler>> {
    if times.is_empty() {
        info!("No refresh times configured, scheduler disabled");
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await.context("Failed to create scheduler")?;

    for time in times {
        let cron_expr = time_to_cron(time)?;
        info!("Scheduling maintenance for {} UTC (cron: {})", time, cron_expr);

        let pipeline_clone = Arc::clone(&pipeline);
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline_clone);
            Box::pin(async move {
                info!("⏰ Scheduled job triggered");
                run_maintenance(&pipeline).await;
            })
        })
        .with_context(|| format!("Failed to create job for {}", time))?;

        scheduler.add(job).await.context("Failed to add scheduled job")?;
    }

    scheduler.start().await.context("Failed to start scheduler")?;
    info!("✓ Scheduler started");

    Ok(Some(scheduler))
}

/// Re-import URLs from every active API endpoint, then drop ledger rows
/// that the catalogs have since resolved.
pub async fn run_maintenance(pipeline: &Pipeline) {
    let refreshed = pipeline.refresh_api_endpoints().await;
    if refreshed.is_error() {
        warn!("Endpoint refresh: {}", refreshed.text);
    } else {
        info!("{}", refreshed.text);
    }

    let purged = pipeline.purge_resolved().await;
    if purged.is_error() {
        warn!("Ledger cleanup: {}", purged.text);
    } else {
        info!("{}", purged.text);
    }
}

/// Convert a UTC time string (HH:MM) to a daily cron expression
fn time_to_cron(time: &str) -> Result<String> {
    let Some((hour, minute)) = time.trim().split_once(':') else {
        bail!("Invalid time format: {}. Expected HH:MM", time);
    };

    let hour: u8 = hour
        .parse()
        .with_context(|| format!("Invalid hour in {}", time))?;
    let minute: u8 = minute
        .parse()
        .with_context(|| format!("Invalid minute in {}", time))?;

    if hour > 23 || minute > 59 {
        bail!("Time out of range: {}", time);
    }

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 {} {} * * *", minute, hour))
}
