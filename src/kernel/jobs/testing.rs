//! In-memory job queue for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::job::{ErrorKind, Job, JobStatus};
use super::queue::{ClaimedJob, EnqueueResult, JobQueue, JobSpec, QueueDepth};

/// A queue backed by a `Mutex<Vec<Job>>`.
///
/// Keeps every enqueued [`JobSpec`] verbatim so tests can assert on job
/// types, delays, and idempotency keys without poking at job internals.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<Job>>,
    specs: Mutex<Vec<JobSpec>>,
    paused: Mutex<HashSet<String>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spec enqueued so far, in order.
    pub fn enqueued_specs(&self) -> Vec<JobSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Specs of one job type, in enqueue order.
    pub fn enqueued_of_type(&self, job_type: &str) -> Vec<JobSpec> {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.job_type == job_type)
            .cloned()
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn find_job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        let mut jobs = self.jobs.lock().unwrap();

        if let Some(key) = &spec.idempotency_key {
            let existing = jobs.iter().find(|j| {
                j.idempotency_key.as_deref() == Some(key)
                    && matches!(j.status, JobStatus::Pending | JobStatus::Running)
            });
            if let Some(existing) = existing {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let mut job = Job::builder()
            .job_type(spec.job_type.clone())
            .args(spec.args.clone())
            .priority(spec.priority)
            .max_retries(spec.max_retries)
            .build();
        job.tenant_id = spec.tenant_id.map(|t| t.into_uuid());
        job.idempotency_key = spec.idempotency_key.clone();
        job.next_run_at = spec.delay.map(|d| Utc::now() + d);

        let id = job.id;
        jobs.push(job);
        self.specs.lock().unwrap().push(spec);
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let paused = self.paused.lock().unwrap().clone();
        let mut jobs = self.jobs.lock().unwrap();

        let mut claimed = Vec::new();
        for job in jobs.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if paused.contains(&job.job_type) || !job.is_ready(now) {
                continue;
            }
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.last_run_at = Some(now);
            job.lease_expires_at = Some(now + Duration::milliseconds(job.lease_duration_ms));
            claimed.push(ClaimedJob {
                id: job.id,
                job: job.clone(),
            });
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Succeeded;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(index) = jobs.iter().position(|j| j.id == job_id) else {
            return Ok(());
        };

        let retry = {
            let job = &mut jobs[index];
            job.error_message = Some(error.to_string());
            job.error_kind = Some(kind);
            if kind.should_retry() && job.retry_count < job.max_retries {
                job.status = JobStatus::Failed;
                let delay_secs = 2i64.pow(job.retry_count as u32).min(3600);
                Some(job.create_retry(Utc::now() + Duration::seconds(delay_secs)))
            } else {
                job.status = JobStatus::DeadLetter;
                job.dead_lettered_at = Some(Utc::now());
                job.dead_letter_reason = Some("max retries exceeded".to_string());
                None
            }
        };
        if let Some(retry) = retry {
            jobs.push(retry);
        }
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Pending)
        {
            job.status = JobStatus::Cancelled;
            job.error_kind = Some(ErrorKind::Cancelled);
            return Ok(true);
        }
        Ok(false)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Running)
        {
            job.lease_expires_at = Some(Utc::now() + Duration::milliseconds(job.lease_duration_ms));
        }
        Ok(())
    }

    async fn depth(&self, job_type: &str) -> Result<QueueDepth> {
        let now = Utc::now();
        let jobs = self.jobs.lock().unwrap();
        let mut depth = QueueDepth::default();
        for job in jobs.iter().filter(|j| j.job_type == job_type) {
            match job.status {
                JobStatus::Pending => match job.next_run_at {
                    Some(at) if at > now => depth.delayed += 1,
                    _ => depth.waiting += 1,
                },
                JobStatus::Running => depth.active += 1,
                JobStatus::Succeeded => depth.completed += 1,
                JobStatus::Failed | JobStatus::DeadLetter => depth.failed += 1,
                JobStatus::Cancelled => {}
            }
        }
        Ok(depth)
    }

    fn pause(&self, job_type: &str) {
        self.paused.lock().unwrap().insert(job_type.to_string());
    }

    fn resume(&self, job_type: &str) {
        self.paused.lock().unwrap().remove(job_type);
    }

    fn is_paused(&self, job_type: &str) -> bool {
        self.paused.lock().unwrap().contains(job_type)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| {
            !(matches!(
                j.status,
                JobStatus::Succeeded | JobStatus::Cancelled | JobStatus::DeadLetter
            ) && j.updated_at < cutoff)
        });
        Ok((before - jobs.len()) as u64)
    }
}
