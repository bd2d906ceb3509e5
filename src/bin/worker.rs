//! Waitlist Worker
//!
//! This binary runs the background worker: it drains the job queue (cascades,
//! notification retries, sweeps, cleanup) and hosts the cron scheduler that
//! feeds the queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waitlist_core::common::NotificationId;
use waitlist_core::config::CoreConfig;
use waitlist_core::domains::notifications::{
    NotificationRecord, NotificationStatus, PostgresNotificationStore,
};
use waitlist_core::domains::slots::models::slot::Slot;
use waitlist_core::domains::slots::PostgresSlotStore;
use waitlist_core::domains::waitlist::models::entry::WaitlistEntry;
use waitlist_core::domains::waitlist::PostgresWaitlistStore;
use waitlist_core::kernel::jobs::{HandlerRegistry, JobWorker, JobWorkerConfig, PostgresJobQueue};
use waitlist_core::kernel::traits::{
    BaseNotificationDispatcher, BaseNotificationStore, DispatchOutcome,
};
use waitlist_core::kernel::{scheduled_tasks, ServiceKernel, SystemClock};

/// Log-only dispatcher. Records every attempt as a notification record and
/// reports success; swap in a real SMS/email adapter behind the same trait.
struct LogDispatcher {
    store: Arc<dyn BaseNotificationStore>,
}

#[async_trait]
impl BaseNotificationDispatcher for LogDispatcher {
    async fn send(&self, candidate: &WaitlistEntry, slot: &Slot) -> Result<DispatchOutcome> {
        let record = NotificationRecord::builder()
            .tenant_id(slot.tenant_id)
            .entry_id(candidate.id)
            .slot_id(slot.id)
            .channel(candidate.channels.first().cloned().unwrap_or_else(|| "sms".to_string()))
            .status(NotificationStatus::Sent)
            .attempts(1)
            .build();
        let id = NotificationId::from_uuid(record.id);
        self.store.record(&record).await?;

        tracing::info!(
            entry_id = %candidate.id,
            slot_id = %slot.id,
            phone = %candidate.phone,
            start_time = %slot.start_time,
            "offer dispatched (log only)"
        );
        Ok(DispatchOutcome::success(id))
    }

    async fn retry(&self, notification_id: NotificationId, attempt: i32) -> Result<DispatchOutcome> {
        tracing::info!(%notification_id, attempt, "offer re-dispatched (log only)");
        Ok(DispatchOutcome::success(notification_id))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,waitlist_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Waitlist Worker");

    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let config = CoreConfig::from_env().context("Invalid configuration")?;

    let notifications: Arc<dyn BaseNotificationStore> =
        Arc::new(PostgresNotificationStore::new(pool.clone()));
    let job_queue = Arc::new(PostgresJobQueue::new(pool.clone()));

    let kernel = Arc::new(ServiceKernel::new(
        Arc::new(PostgresSlotStore::new(pool.clone())),
        Arc::new(PostgresWaitlistStore::new(pool.clone())),
        notifications.clone(),
        Arc::new(LogDispatcher {
            store: notifications,
        }),
        job_queue.clone(),
        Arc::new(SystemClock),
        config.clone(),
    ));

    let scheduler = scheduled_tasks::start_scheduler(job_queue, config.sweep_interval).await?;

    let worker_config = JobWorkerConfig {
        batch_size: config.worker_batch_size,
        poll_interval: config.worker_poll_interval,
        ..JobWorkerConfig::default()
    };
    let worker = JobWorker::with_config(
        kernel,
        Arc::new(HandlerRegistry::core()),
        worker_config,
    );

    let shutdown = CancellationToken::new();
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    worker_handle.await??;

    tracing::info!("Waitlist worker stopped");
    Ok(())
}
