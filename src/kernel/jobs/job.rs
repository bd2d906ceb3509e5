//! Job model for background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
    Cancelled,
}

/// Claim order follows the Postgres enum's declaration order, so the
/// variants here must stay in sync with the `job_priority` type in the
/// schema: critical first, low last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was cancelled by user/system
    Cancelled,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

/// One unit of background work, delivered at least once.
///
/// Handlers must tolerate duplicate delivery; the idempotency key only
/// suppresses duplicates among jobs that are still pending or running.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub job_type: String,
    #[builder(default, setter(strip_option))]
    pub args: Option<serde_json::Value>,

    /// Tenant scope; `None` for global maintenance jobs.
    #[builder(default, setter(strip_option))]
    pub tenant_id: Option<Uuid>,

    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default)]
    pub status: JobStatus,

    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 1)]
    pub attempt: i32,

    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_run_at: Option<DateTime<Utc>>,

    #[builder(default = 60_000)]
    pub lease_duration_ms: i64,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ErrorKind>,

    #[builder(default, setter(strip_option))]
    pub dead_lettered_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub dead_letter_reason: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job could be claimed right now.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        if self.retry_count > self.max_retries {
            return false;
        }
        match self.next_run_at {
            None => true,
            Some(next_run) => next_run <= now,
        }
    }

    /// A follow-up job carrying the same payload, scheduled for
    /// `scheduled_for`, with the retry counters advanced.
    pub fn create_retry(&self, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: self.job_type.clone(),
            args: self.args.clone(),
            tenant_id: self.tenant_id,
            priority: self.priority,
            status: JobStatus::Pending,
            max_retries: self.max_retries,
            retry_count: self.retry_count + 1,
            attempt: self.attempt + 1,
            next_run_at: Some(scheduled_for),
            last_run_at: None,
            lease_duration_ms: self.lease_duration_ms,
            lease_expires_at: None,
            worker_id: None,
            idempotency_key: self.idempotency_key.clone(),
            error_message: None,
            error_kind: None,
            dead_lettered_at: None,
            dead_letter_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
