//! Job queue: trait, Postgres implementation, and the operational surface.
//!
//! Delivery contract is at-least-once: a worker crash after execution but
//! before `mark_succeeded` re-delivers the job, so every handler must be a
//! safe no-op when re-run for an already-resolved event.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::debug;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::job::{ErrorKind, Job, JobPriority, JobStatus};
use crate::common::TenantId;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID.
    Created(Uuid),
    /// A pending/running job with the same idempotency key already exists.
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Everything needed to enqueue one job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobSpec {
    pub job_type: String,
    pub args: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub tenant_id: Option<TenantId>,
    /// Run after this delay instead of immediately.
    #[builder(default, setter(strip_option))]
    pub delay: Option<Duration>,
    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
}

/// A claimed job ready for execution.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: Job,
}

impl ClaimedJob {
    /// Deserialize the payload into the handler's input type.
    pub fn payload<C: DeserializeOwned>(&self) -> Result<C> {
        let args = self
            .job
            .args
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("job {} has no args", self.id))?;
        Ok(serde_json::from_value(args.clone())?)
    }

    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }
}

/// Per-type queue depth, for operational visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Pending and due now (or with no schedule).
    pub waiting: i64,
    /// Currently running.
    pub active: i64,
    pub completed: i64,
    /// Failed or dead-lettered.
    pub failed: i64,
    /// Pending with a future run time.
    pub delayed: i64,
}

/// Storage and retrieval of background jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Honors the spec's idempotency key against jobs that
    /// are still pending or running.
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult>;

    /// Claim up to `limit` ready jobs for this worker.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Mark failed; re-queues with backoff while retries remain, then
    /// dead-letters.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()>;

    /// Cancel a pending job. Running jobs are cancelled cooperatively.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;

    /// Extend the lease for a running job.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Depth counts for one job type.
    async fn depth(&self, job_type: &str) -> Result<QueueDepth>;

    /// Stop claiming jobs of this type (in-process scope).
    fn pause(&self, job_type: &str);

    /// Resume claiming jobs of this type.
    fn resume(&self, job_type: &str);

    fn is_paused(&self, job_type: &str) -> bool;

    /// Delete finished jobs older than `cutoff`; returns rows deleted.
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL-backed job queue.
pub struct PostgresJobQueue {
    pool: PgPool,
    default_lease_ms: i64,
    paused: RwLock<HashSet<String>>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000,
            paused: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            default_lease_ms: lease_ms,
            paused: RwLock::new(HashSet::new()),
        }
    }

    fn paused_types(&self) -> Vec<String> {
        self.paused.read().unwrap().iter().cloned().collect()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM jobs
            WHERE idempotency_key = $1 AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, args, tenant_id, priority, status,
                max_retries, retry_count, attempt, next_run_at, last_run_at,
                lease_duration_ms, lease_expires_at, worker_id, idempotency_key,
                error_message, error_kind, dead_lettered_at, dead_letter_reason,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21
            )
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.args)
        .bind(job.tenant_id)
        .bind(job.priority)
        .bind(job.status)
        .bind(job.max_retries)
        .bind(job.retry_count)
        .bind(job.attempt)
        .bind(job.next_run_at)
        .bind(job.last_run_at)
        .bind(job.lease_duration_ms)
        .bind(job.lease_expires_at)
        .bind(&job.worker_id)
        .bind(&job.idempotency_key)
        .bind(&job.error_message)
        .bind(job.error_kind)
        .bind(job.dead_lettered_at)
        .bind(&job.dead_letter_reason)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(job)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        if let Some(key) = &spec.idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                debug!(job_type = %spec.job_type, idempotency_key = %key, "duplicate enqueue suppressed");
                return Ok(EnqueueResult::Duplicate(existing));
            }
        }

        let mut job = Job::builder()
            .job_type(spec.job_type)
            .args(spec.args)
            .priority(spec.priority)
            .max_retries(spec.max_retries)
            .lease_duration_ms(self.default_lease_ms)
            .build();
        job.tenant_id = spec.tenant_id.map(|t| t.into_uuid());
        job.idempotency_key = spec.idempotency_key;
        job.next_run_at = spec.delay.map(|d| Utc::now() + d);

        self.insert(&job).await?;
        Ok(EnqueueResult::Created(job.id))
    }

    /// Claim jobs atomically using FOR UPDATE SKIP LOCKED, recovering stale
    /// running jobs whose lease has expired.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let paused = self.paused_types();

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE
                    (
                        (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()) AND retry_count <= max_retries)
                        OR (status = 'running' AND lease_expires_at < NOW())
                    )
                    AND NOT (job_type = ANY($3))
                ORDER BY priority, COALESCE(next_run_at, created_at)
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                last_run_at = NOW(),
                lease_expires_at = NOW() + (lease_duration_ms || ' milliseconds')::INTERVAL,
                worker_id = $2,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(&paused)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs
            .into_iter()
            .map(|job| ClaimedJob { id: job.id, job })
            .collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let job = self.find_by_id(job_id).await?;

        if kind.should_retry() && job.retry_count < job.max_retries {
            // Exponential backoff, capped at one hour.
            let delay_secs = 2i64.pow(job.retry_count as u32).min(3600);
            let retry_at = Utc::now() + Duration::seconds(delay_secs);
            self.insert(&job.create_retry(retry_at)).await?;

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', error_message = $1, error_kind = $2, updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    error_message = $1,
                    error_kind = $2,
                    dead_lettered_at = NOW(),
                    dead_letter_reason = 'max retries exceeded',
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', error_kind = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + (lease_duration_ms || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn depth(&self, job_type: &str) -> Result<QueueDepth> {
        let rows = sqlx::query_as::<_, (JobStatus, Option<DateTime<Utc>>, i64)>(
            r#"
            SELECT status, next_run_at, COUNT(*)
            FROM jobs
            WHERE job_type = $1
            GROUP BY status, next_run_at
            "#,
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut depth = QueueDepth::default();
        for (status, next_run_at, count) in rows {
            match status {
                JobStatus::Pending => match next_run_at {
                    Some(at) if at > now => depth.delayed += count,
                    _ => depth.waiting += count,
                },
                JobStatus::Running => depth.active += count,
                JobStatus::Succeeded => depth.completed += count,
                JobStatus::Failed | JobStatus::DeadLetter => depth.failed += count,
                JobStatus::Cancelled => {}
            }
        }

        Ok(depth)
    }

    fn pause(&self, job_type: &str) {
        self.paused.write().unwrap().insert(job_type.to_string());
    }

    fn resume(&self, job_type: &str) {
        self.paused.write().unwrap().remove(job_type);
    }

    fn is_paused(&self, job_type: &str) -> bool {
        self.paused.read().unwrap().contains(job_type)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('succeeded', 'cancelled', 'dead_letter')
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_helpers() {
        let created = EnqueueResult::Created(Uuid::new_v4());
        assert!(created.is_created());

        let duplicate = EnqueueResult::Duplicate(Uuid::new_v4());
        assert!(!duplicate.is_created());
        assert_ne!(created.job_id(), duplicate.job_id());
    }

    #[test]
    fn spec_builder_defaults() {
        let spec = JobSpec::builder()
            .job_type("slots:sweep".to_string())
            .args(serde_json::json!({}))
            .build();
        assert_eq!(spec.priority, JobPriority::Normal);
        assert_eq!(spec.max_retries, 3);
        assert!(spec.delay.is_none());
        assert!(spec.idempotency_key.is_none());
    }
}
