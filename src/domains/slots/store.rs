//! Postgres-backed slot store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{EntryId, SlotId, TenantId};
use crate::kernel::traits::BaseSlotStore;

use super::models::slot::Slot;

pub struct PostgresSlotStore {
    pool: PgPool,
}

impl PostgresSlotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSlotStore for PostgresSlotStore {
    async fn get(&self, id: SlotId) -> Result<Option<Slot>> {
        Slot::find_by_id(id.into_uuid(), &self.pool).await
    }

    async fn insert(&self, slot: &Slot) -> Result<()> {
        slot.insert(&self.pool).await
    }

    async fn hold_if_open(
        &self,
        id: SlotId,
        entry_id: EntryId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        Slot::hold_if_open(id.into_uuid(), entry_id.into_uuid(), expires_at, &self.pool).await
    }

    async fn release_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool> {
        Slot::release_if_held_for(id.into_uuid(), entry_id.into_uuid(), &self.pool).await
    }

    async fn book_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool> {
        Slot::book_if_held_for(id.into_uuid(), entry_id.into_uuid(), &self.pool).await
    }

    async fn cancel_if_nonterminal(&self, id: SlotId) -> Result<bool> {
        Slot::cancel_if_nonterminal(id.into_uuid(), &self.pool).await
    }

    async fn find_expired_holds(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<Vec<Slot>> {
        Slot::find_expired_holds(tenant, now, &self.pool).await
    }

    async fn tenants_with_held_slots(&self) -> Result<Vec<TenantId>> {
        Slot::tenants_with_held_slots(&self.pool).await
    }
}
