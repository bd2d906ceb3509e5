//! Job worker: the long-running loop that drains the queue.
//!
//! The worker polls the queue for ready jobs, looks up the handler for each
//! job type, executes it against the kernel, and records the outcome. Jobs
//! in one batch run concurrently; a graceful shutdown cancels the poll loop
//! and lets in-flight jobs finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::CoreError;
use crate::kernel::ServiceKernel;

use super::handlers::HandlerRegistry;
use super::job::ErrorKind;
use super::queue::ClaimedJob;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs to claim at once.
    pub batch_size: i64,
    /// How long to wait when no jobs are available.
    pub poll_interval: Duration,
    /// How often to extend leases for running jobs.
    pub heartbeat_interval: Duration,
    /// Worker ID for this instance.
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A worker that claims and executes queued jobs.
pub struct JobWorker {
    kernel: Arc<ServiceKernel>,
    registry: Arc<HandlerRegistry>,
    config: JobWorkerConfig,
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl JobWorker {
    pub fn new(kernel: Arc<ServiceKernel>, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(kernel, registry, JobWorkerConfig::default())
    }

    pub fn with_config(
        kernel: Arc<ServiceKernel>,
        registry: Arc<HandlerRegistry>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            kernel,
            registry,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Poll loop. Returns when `shutdown` is cancelled and in-flight jobs
    /// have drained.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match self
                .kernel
                .job_queue
                .claim(&self.config.worker_id, self.config.batch_size)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            debug!(count = jobs.len(), "claimed jobs");

            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                let worker = &self;
                let shutdown_ref = &shutdown;
                handles.push(async move {
                    worker.process_job(job, shutdown_ref).await;
                });
            }
            futures::future::join_all(handles).await;
        }

        self.drain().await;

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    async fn process_job(&self, job: ClaimedJob, shutdown: &CancellationToken) {
        let job_id = job.id;
        let job_type = job.job_type().to_string();

        let Some(handler) = self.registry.get(&job_type) else {
            error!(job_id = %job_id, job_type = %job_type, "no handler for job type");
            if let Err(e) = self
                .kernel
                .job_queue
                .mark_failed(job_id, "unknown job type", ErrorKind::NonRetryable)
                .await
            {
                error!(job_id = %job_id, error = %e, "failed to mark job as failed");
            }
            return;
        };

        let job_cancel = shutdown.child_token();
        self.running_jobs
            .write()
            .await
            .insert(job_id, job_cancel.clone());

        let result = self
            .execute_with_heartbeat(job_id, &job, handler.as_ref(), job_cancel)
            .await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, job_type = %job_type, "job succeeded");
                if let Err(e) = self.kernel.job_queue.mark_succeeded(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
                }
            }
            Err(e) => {
                let kind = failure_kind(&e, shutdown);
                warn!(job_id = %job_id, job_type = %job_type, error = %e, kind = ?kind, "job failed");
                if let Err(e) = self
                    .kernel
                    .job_queue
                    .mark_failed(job_id, &format!("{e:#}"), kind)
                    .await
                {
                    error!(job_id = %job_id, error = %e, "failed to mark job as failed");
                }
            }
        }

        self.running_jobs.write().await.remove(&job_id);
    }

    /// Executes the handler while a side task keeps the lease alive.
    async fn execute_with_heartbeat(
        &self,
        job_id: Uuid,
        job: &ClaimedJob,
        handler: &dyn super::handlers::JobHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        let queue = self.kernel.job_queue.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        let heartbeat_cancel = cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(job_id).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        let result = handler.execute(job, &self.kernel).await;

        cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }

    /// Waits (bounded) for still-running jobs after the loop exits.
    async fn drain(&self) {
        let running_count = self.running_jobs.read().await.len();
        if running_count == 0 {
            return;
        }

        info!(count = running_count, "waiting for running jobs to complete");
        {
            let running = self.running_jobs.read().await;
            for token in running.values() {
                token.cancel();
            }
        }

        let timeout = Duration::from_secs(30);
        let start = std::time::Instant::now();
        while !self.running_jobs.read().await.is_empty() && start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Maps a handler failure to the queue's retry policy.
///
/// Missing entities and rule violations will fail the same way on every
/// attempt, so retrying them only delays the dead-letter; conflicts mean the
/// state already advanced and the logical operation must never be re-run.
/// Everything else is assumed transient.
fn failure_kind(error: &anyhow::Error, shutdown: &CancellationToken) -> ErrorKind {
    if shutdown.is_cancelled() {
        return ErrorKind::Shutdown;
    }
    match error.downcast_ref::<CoreError>() {
        Some(CoreError::NotFound { .. })
        | Some(CoreError::Validation(_))
        | Some(CoreError::Conflict(_)) => ErrorKind::NonRetryable,
        _ => ErrorKind::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::common::{EntryId, SlotId, TenantId};
    use crate::domains::cascade::orchestrator::CascadeReason;
    use crate::kernel::jobs::handlers::CascadePayload;
    use crate::kernel::jobs::job::JobStatus;
    use crate::kernel::jobs::queue::JobQueue;
    use crate::kernel::TestDependencies;

    #[test]
    fn config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn config_with_worker_id() {
        let config = JobWorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[test]
    fn missing_entities_and_rule_violations_are_not_retried() {
        let token = CancellationToken::new();

        let not_found = anyhow::Error::from(CoreError::not_found("slot", Uuid::nil()));
        assert_eq!(failure_kind(&not_found, &token), ErrorKind::NonRetryable);

        let invalid = anyhow::Error::from(CoreError::Validation("bad window".into()));
        assert_eq!(failure_kind(&invalid, &token), ErrorKind::NonRetryable);

        let conflict = anyhow::Error::from(CoreError::Conflict("slot is not open"));
        assert_eq!(failure_kind(&conflict, &token), ErrorKind::NonRetryable);

        // Anything else is assumed transient.
        let transient = anyhow::anyhow!("connection reset");
        assert_eq!(failure_kind(&transient, &token), ErrorKind::Retryable);
    }

    #[test]
    fn shutdown_overrides_the_error_kind() {
        let token = CancellationToken::new();
        token.cancel();
        let transient = anyhow::anyhow!("connection reset");
        assert_eq!(failure_kind(&transient, &token), ErrorKind::Shutdown);
    }

    #[tokio::test]
    async fn cascade_for_a_missing_slot_dead_letters_without_retry() {
        let deps = TestDependencies::new();
        let kernel = Arc::new(deps.kernel());
        let worker = JobWorker::with_config(
            kernel,
            Arc::new(HandlerRegistry::core()),
            JobWorkerConfig::with_worker_id("test-worker"),
        );

        // Nothing in the stores: the referenced slot does not exist.
        let payload = CascadePayload {
            tenant_id: TenantId::new(),
            slot_id: SlotId::new(),
            previous_entry_id: EntryId::new(),
            reason: CascadeReason::Expired,
        };
        deps.job_queue.enqueue(payload.into_spec()).await.unwrap();
        let mut claimed = deps.job_queue.claim("test-worker", 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let job_id = claimed[0].id;

        let shutdown = CancellationToken::new();
        worker.process_job(claimed.remove(0), &shutdown).await;

        let job = deps.job_queue.find_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert_eq!(job.error_kind, Some(ErrorKind::NonRetryable));
        // No retry copy was created.
        assert_eq!(deps.job_queue.job_count(), 1);
    }
}
