//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Scheduled tasks run independently of the job queue system. They enqueue
//! jobs rather than doing work directly, so the work itself gets the queue's
//! retry, lease, and dead-letter handling.
//!
//! - Expired-hold sweep: every `sweep_interval` (default one minute)
//! - Retention cleanup: daily at 03:00 UTC

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::jobs::handlers::{CleanupPayload, SweepPayload};
use super::jobs::JobQueue;

/// Start all scheduled tasks.
pub async fn start_scheduler(
    queue: Arc<dyn JobQueue>,
    sweep_interval: Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Expired-hold sweep. The minute-bucketed idempotency key keeps
    // overlapping scheduler instances from stacking sweep jobs.
    let sweep_queue = queue.clone();
    let sweep_job = Job::new_repeated_async(sweep_interval, move |_uuid, _lock| {
        let queue = sweep_queue.clone();
        Box::pin(async move {
            let key = format!("sweep:global:{}", Utc::now().format("%Y-%m-%dT%H:%M"));
            let spec = SweepPayload { tenant_id: None }.into_spec(Some(key));
            if let Err(e) = queue.enqueue(spec).await {
                tracing::error!(error = %e, "failed to enqueue sweep job");
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    // Retention cleanup, daily at 03:00 UTC.
    let cleanup_queue = queue.clone();
    let cleanup_job = Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
        let queue = cleanup_queue.clone();
        Box::pin(async move {
            let key = format!("cleanup:{}", Utc::now().format("%Y-%m-%d"));
            let spec = CleanupPayload {}.into_spec(Some(key));
            if let Err(e) = queue.enqueue(spec).await {
                tracing::error!(error = %e, "failed to enqueue cleanup job");
            }
        })
    })?;
    scheduler.add(cleanup_job).await?;

    scheduler.start().await?;

    tracing::info!(
        sweep_interval_secs = sweep_interval.as_secs(),
        "scheduled tasks started (periodic sweep, cleanup daily at 03:00 UTC)"
    );
    Ok(scheduler)
}
