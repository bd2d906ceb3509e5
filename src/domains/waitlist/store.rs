//! Postgres-backed waitlist store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{EntryId, ServiceId, StaffId, TenantId};
use crate::kernel::traits::BaseWaitlistStore;

use super::models::entry::{WaitlistEntry, WaitlistStatus};

pub struct PostgresWaitlistStore {
    pool: PgPool,
}

impl PostgresWaitlistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseWaitlistStore for PostgresWaitlistStore {
    async fn get(&self, id: EntryId) -> Result<Option<WaitlistEntry>> {
        WaitlistEntry::find_by_id(id.into_uuid(), &self.pool).await
    }

    async fn insert(&self, entry: &WaitlistEntry) -> Result<()> {
        entry.insert(&self.pool).await
    }

    async fn find_eligible(
        &self,
        tenant: TenantId,
        service: ServiceId,
        staff: StaffId,
        slot_start: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>> {
        WaitlistEntry::find_eligible(
            tenant.into_uuid(),
            service.into_uuid(),
            staff.into_uuid(),
            slot_start,
            &self.pool,
        )
        .await
    }

    async fn update_status_if(
        &self,
        id: EntryId,
        expected: WaitlistStatus,
        new: WaitlistStatus,
    ) -> Result<bool> {
        WaitlistEntry::update_status_if(id.into_uuid(), expected, new, &self.pool).await
    }

    async fn count_active_for_phone(&self, tenant: TenantId, phone: &str) -> Result<i64> {
        WaitlistEntry::count_active_for_phone(tenant.into_uuid(), phone, &self.pool).await
    }
}
