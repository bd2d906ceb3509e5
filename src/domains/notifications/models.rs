//! Notification records.
//!
//! Delivery mechanics belong to the external dispatcher; the core only reads
//! status and attempt counts to decide retry eligibility, marks terminal
//! outcomes, and deletes old records during retention cleanup.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "notification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    /// Retries exhausted; surfaced for administrative attention. The slot
    /// hold is left to expire naturally, never cascaded past.
    Abandoned,
}

impl NotificationStatus {
    /// Whether another delivery attempt makes sense.
    pub fn is_retryable(self) -> bool {
        matches!(self, NotificationStatus::Pending | NotificationStatus::Failed)
    }
}

/// One contact attempt chain for (entry, slot).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NotificationRecord {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub entry_id: Uuid,
    pub slot_id: Uuid,
    #[builder(default = "sms".to_string())]
    pub channel: String,
    #[builder(default)]
    pub status: NotificationStatus,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let record = sqlx::query_as::<_, Self>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(record)
    }

    /// Insert, ignoring duplicates (the dispatcher may have recorded it
    /// already).
    pub async fn record(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, tenant_id, entry_id, slot_id, channel, status, attempts,
                last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(self.entry_id)
        .bind(self.slot_id)
        .bind(&self.channel)
        .bind(self.status)
        .bind(self.attempts)
        .bind(&self.last_error)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Updates outcome fields. Zero rows affected is fine: the record may
    /// have been purged by the external owner.
    pub async fn mark(
        id: Uuid,
        status: NotificationStatus,
        attempts: i32,
        last_error: Option<&str>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2, attempts = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(attempts)
        .bind(last_error)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Retention cleanup; returns the number of rows deleted.
    pub async fn delete_older_than(cutoff: DateTime<Utc>, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_failed_are_retryable() {
        assert!(NotificationStatus::Pending.is_retryable());
        assert!(NotificationStatus::Failed.is_retryable());
    }

    #[test]
    fn terminal_statuses_are_not_retryable() {
        assert!(!NotificationStatus::Sent.is_retryable());
        assert!(!NotificationStatus::Abandoned.is_retryable());
    }

    #[test]
    fn new_record_starts_pending_with_no_attempts() {
        let record = NotificationRecord::builder()
            .tenant_id(Uuid::now_v7())
            .entry_id(Uuid::now_v7())
            .slot_id(Uuid::now_v7())
            .build();
        assert_eq!(record.status, NotificationStatus::Pending);
        assert_eq!(record.attempts, 0);
    }
}
