//! Job payloads and handlers.
//!
//! Four work types run through the queue:
//!
//! - `waitlist:cascade`: one decline/expiry event for one slot
//! - `notification:retry`: re-attempt a failed dispatch, bounded
//! - `slots:sweep`: expired-hold sweep, per tenant or global
//! - `maintenance:cleanup`: retention cleanup, best effort
//!
//! Every handler tolerates duplicate delivery; the interesting idempotency
//! lives in the domain layer's conditional updates.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::common::{EntryId, NotificationId, SlotId, TenantId};
use crate::domains::cascade::orchestrator::{CascadeOrchestrator, CascadeReason};
use crate::domains::cascade::sweep;
use crate::domains::notifications::models::NotificationStatus;
use crate::kernel::ServiceKernel;

use super::job::JobPriority;
use super::queue::{ClaimedJob, JobSpec};

pub const CASCADE_JOB: &str = "waitlist:cascade";
pub const NOTIFICATION_RETRY_JOB: &str = "notification:retry";
pub const SWEEP_JOB: &str = "slots:sweep";
pub const CLEANUP_JOB: &str = "maintenance:cleanup";

/// Delivery attempts before an offer is abandoned.
pub const MAX_DISPATCH_ATTEMPTS: i32 = 3;

/// Delay before the first dispatch retry; doubles per attempt (1s, 2s, 4s).
pub const FIRST_RETRY_DELAY: Duration = Duration::seconds(1);

/// A handler for one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn execute(&self, job: &ClaimedJob, kernel: &ServiceKernel) -> Result<()>;
}

/// Job-type → handler lookup used by the worker.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four core handlers.
    pub fn core() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CascadeHandler));
        registry.register(Arc::new(NotificationRetryHandler));
        registry.register(Arc::new(SweepHandler));
        registry.register(Arc::new(CleanupHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

// =============================================================================
// Cascade
// =============================================================================

/// The unit of work for "slot X became available again because entry Y was
/// declined/expired".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadePayload {
    pub tenant_id: TenantId,
    pub slot_id: SlotId,
    pub previous_entry_id: EntryId,
    pub reason: CascadeReason,
}

impl CascadePayload {
    pub fn into_spec(self) -> JobSpec {
        let key = format!(
            "cascade:{}:{}:{}",
            self.slot_id, self.previous_entry_id, self.reason
        );
        JobSpec::builder()
            .job_type(CASCADE_JOB.to_string())
            .args(serde_json::to_value(&self).expect("cascade payload serializes"))
            .tenant_id(self.tenant_id)
            .priority(JobPriority::High)
            .idempotency_key(key)
            .build()
    }
}

pub struct CascadeHandler;

#[async_trait]
impl JobHandler for CascadeHandler {
    fn job_type(&self) -> &'static str {
        CASCADE_JOB
    }

    async fn execute(&self, job: &ClaimedJob, kernel: &ServiceKernel) -> Result<()> {
        let payload: CascadePayload = job.payload()?;
        let orchestrator = CascadeOrchestrator::new(kernel);

        let outcome = orchestrator
            .handle_cascade(
                payload.tenant_id,
                payload.slot_id,
                payload.previous_entry_id,
                payload.reason,
            )
            .await?;

        info!(
            job_id = %job.id,
            tenant_id = %payload.tenant_id,
            slot_id = %payload.slot_id,
            found = outcome.next_candidate_found,
            notified = outcome.notified,
            "cascade job finished"
        );
        Ok(())
    }
}

// =============================================================================
// Notification retry
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryNotificationPayload {
    pub tenant_id: TenantId,
    pub notification_id: NotificationId,
    pub entry_id: EntryId,
    pub slot_id: SlotId,
    /// 1-based attempt number this job will perform.
    pub attempt: i32,
}

impl RetryNotificationPayload {
    pub fn into_spec(self, delay: Duration) -> JobSpec {
        let key = format!("notify-retry:{}:{}", self.notification_id, self.attempt);
        JobSpec::builder()
            .job_type(NOTIFICATION_RETRY_JOB.to_string())
            .args(serde_json::to_value(&self).expect("retry payload serializes"))
            .tenant_id(self.tenant_id)
            .priority(JobPriority::High)
            .delay(delay)
            .idempotency_key(key)
            .build()
    }

    /// Delay before the attempt this payload describes: 1s, 2s, 4s.
    pub fn backoff(attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 30) as u32;
        FIRST_RETRY_DELAY * 2i32.pow(exponent)
    }
}

pub struct NotificationRetryHandler;

#[async_trait]
impl JobHandler for NotificationRetryHandler {
    fn job_type(&self) -> &'static str {
        NOTIFICATION_RETRY_JOB
    }

    async fn execute(&self, job: &ClaimedJob, kernel: &ServiceKernel) -> Result<()> {
        let payload: RetryNotificationPayload = job.payload()?;

        // Duplicate delivery guard: a record already resolved needs nothing.
        if let Some(record) = kernel.notifications.get(payload.notification_id).await? {
            if !record.status.is_retryable() {
                info!(
                    notification_id = %payload.notification_id,
                    status = ?record.status,
                    "notification already resolved, retry is a no-op"
                );
                return Ok(());
            }
        }

        let outcome = kernel
            .dispatcher
            .retry(payload.notification_id, payload.attempt)
            .await?;

        if outcome.success {
            kernel
                .notifications
                .mark(payload.notification_id, NotificationStatus::Sent, payload.attempt, None)
                .await?;
            info!(
                notification_id = %payload.notification_id,
                attempt = payload.attempt,
                "dispatch retry succeeded"
            );
            return Ok(());
        }

        let error = outcome.error.unwrap_or_else(|| "unknown dispatch error".to_string());

        if payload.attempt < MAX_DISPATCH_ATTEMPTS {
            let next = RetryNotificationPayload {
                attempt: payload.attempt + 1,
                ..payload.clone()
            };
            let delay = RetryNotificationPayload::backoff(next.attempt);

            kernel
                .notifications
                .mark(
                    payload.notification_id,
                    NotificationStatus::Failed,
                    payload.attempt,
                    Some(&error),
                )
                .await?;
            kernel.job_queue.enqueue(next.into_spec(delay)).await?;

            warn!(
                notification_id = %payload.notification_id,
                attempt = payload.attempt,
                error = %error,
                "dispatch retry failed, next attempt scheduled"
            );
        } else {
            // Out of attempts. The candidate was never reached, so they do
            // not lose their place: the hold is left to expire naturally,
            // never cascaded past on dispatch failure alone.
            kernel
                .notifications
                .mark(
                    payload.notification_id,
                    NotificationStatus::Abandoned,
                    payload.attempt,
                    Some(&error),
                )
                .await?;

            warn!(
                tenant_id = %payload.tenant_id,
                notification_id = %payload.notification_id,
                entry_id = %payload.entry_id,
                slot_id = %payload.slot_id,
                attempts = payload.attempt,
                "dispatch abandoned after max attempts, needs administrative attention"
            );
        }

        Ok(())
    }
}

// =============================================================================
// Expired-hold sweep
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPayload {
    /// Sweep one tenant, or every tenant with held slots when `None`.
    pub tenant_id: Option<TenantId>,
}

impl SweepPayload {
    pub fn into_spec(self, idempotency_key: Option<String>) -> JobSpec {
        let mut spec = JobSpec::builder()
            .job_type(SWEEP_JOB.to_string())
            .args(serde_json::to_value(&self).expect("sweep payload serializes"))
            .priority(JobPriority::Normal)
            .build();
        spec.tenant_id = self.tenant_id;
        spec.idempotency_key = idempotency_key;
        spec
    }
}

pub struct SweepHandler;

#[async_trait]
impl JobHandler for SweepHandler {
    fn job_type(&self) -> &'static str {
        SWEEP_JOB
    }

    async fn execute(&self, job: &ClaimedJob, kernel: &ServiceKernel) -> Result<()> {
        let payload: SweepPayload = job.payload()?;
        let report = sweep::run_sweep(kernel, payload.tenant_id).await?;

        // Per-tenant failures are contained in the report; the job itself
        // only fails on infrastructure errors that prevented the sweep.
        if !report.errors.is_empty() {
            warn!(
                job_id = %job.id,
                errors = ?report.errors,
                "sweep finished with per-tenant errors"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Retention cleanup
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPayload {}

impl CleanupPayload {
    pub fn into_spec(self, idempotency_key: Option<String>) -> JobSpec {
        let mut spec = JobSpec::builder()
            .job_type(CLEANUP_JOB.to_string())
            .args(serde_json::to_value(&self).expect("cleanup payload serializes"))
            .priority(JobPriority::Low)
            .build();
        spec.idempotency_key = idempotency_key;
        spec
    }
}

pub struct CleanupHandler;

#[async_trait]
impl JobHandler for CleanupHandler {
    fn job_type(&self) -> &'static str {
        CLEANUP_JOB
    }

    async fn execute(&self, job: &ClaimedJob, kernel: &ServiceKernel) -> Result<()> {
        let cutoff = kernel.clock.now() - Duration::days(kernel.config.retention_days);

        // Best effort on both stores: a missing or unreachable dependent
        // store downgrades to a warning.
        match kernel.notifications.delete_older_than(cutoff).await {
            Ok(deleted) => info!(job_id = %job.id, deleted, "old notification records removed"),
            Err(e) => warn!(job_id = %job.id, error = %e, "notification cleanup skipped"),
        }

        match kernel.job_queue.purge_finished_before(cutoff).await {
            Ok(purged) => info!(job_id = %job.id, purged, "finished jobs purged"),
            Err(e) => warn!(job_id = %job.id, error = %e, "job purge skipped"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(RetryNotificationPayload::backoff(1), Duration::seconds(1));
        assert_eq!(RetryNotificationPayload::backoff(2), Duration::seconds(2));
        assert_eq!(RetryNotificationPayload::backoff(3), Duration::seconds(4));
    }

    #[test]
    fn cascade_spec_carries_idempotency_key() {
        let payload = CascadePayload {
            tenant_id: TenantId::new(),
            slot_id: SlotId::new(),
            previous_entry_id: EntryId::new(),
            reason: CascadeReason::Declined,
        };
        let slot_id = payload.slot_id;
        let spec = payload.into_spec();
        assert_eq!(spec.job_type, CASCADE_JOB);
        let key = spec.idempotency_key.unwrap();
        assert!(key.contains(&slot_id.to_string()));
        assert!(key.ends_with("declined"));
    }

    #[test]
    fn retry_spec_is_delayed() {
        let payload = RetryNotificationPayload {
            tenant_id: TenantId::new(),
            notification_id: NotificationId::new(),
            entry_id: EntryId::new(),
            slot_id: SlotId::new(),
            attempt: 1,
        };
        let spec = payload.into_spec(RetryNotificationPayload::backoff(1));
        assert_eq!(spec.job_type, NOTIFICATION_RETRY_JOB);
        assert_eq!(spec.delay, Some(Duration::seconds(1)));
    }

    #[test]
    fn core_registry_knows_all_job_types() {
        let registry = HandlerRegistry::core();
        for job_type in [CASCADE_JOB, NOTIFICATION_RETRY_JOB, SWEEP_JOB, CLEANUP_JOB] {
            assert!(registry.get(job_type).is_some(), "missing handler for {job_type}");
        }
        assert!(registry.get("unknown:type").is_none());
    }
}
