//! Postgres-backed notification store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::NotificationId;
use crate::kernel::traits::BaseNotificationStore;

use super::models::{NotificationRecord, NotificationStatus};

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseNotificationStore for PostgresNotificationStore {
    async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>> {
        NotificationRecord::find_by_id(id.into_uuid(), &self.pool).await
    }

    async fn record(&self, record: &NotificationRecord) -> Result<()> {
        record.record(&self.pool).await
    }

    async fn mark(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<()> {
        NotificationRecord::mark(id.into_uuid(), status, attempts, last_error, &self.pool).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        NotificationRecord::delete_older_than(cutoff, &self.pool).await
    }
}
