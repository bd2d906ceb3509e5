//! Slot model and its Postgres queries.
//!
//! A slot is a bookable (staff, service, time-range) unit owned by one
//! tenant. All mutation goes through conditional updates keyed on the current
//! status (and, while held, the holding entry), so that exactly one caller
//! wins any contested transition. The losing caller observes zero rows
//! affected, never an error.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::TenantId;

/// Slot lifecycle status.
///
/// `Booked` and `Canceled` are terminal; a slot may cycle
/// `open → held → open` any number of times before reaching one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "slot_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Open,
    Held,
    Booked,
    Canceled,
}

impl SlotStatus {
    /// Whether no further transitions are defined from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, SlotStatus::Booked | SlotStatus::Canceled)
    }

    /// Whether the state machine defines a `self → next` transition.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        match (self, next) {
            (SlotStatus::Open, SlotStatus::Held) => true,
            (SlotStatus::Open, SlotStatus::Canceled) => true,
            (SlotStatus::Held, SlotStatus::Open) => true,
            (SlotStatus::Held, SlotStatus::Booked) => true,
            (SlotStatus::Held, SlotStatus::Canceled) => true,
            (SlotStatus::Open, SlotStatus::Open)
            | (SlotStatus::Open, SlotStatus::Booked)
            | (SlotStatus::Held, SlotStatus::Held)
            | (SlotStatus::Booked, _)
            | (SlotStatus::Canceled, _) => false,
        }
    }
}

/// A bookable time range for one staff member and one service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Slot {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub staff_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[builder(default)]
    pub status: SlotStatus,
    /// Set if and only if `status == Held`.
    #[builder(default, setter(strip_option))]
    pub hold_expires_at: Option<DateTime<Utc>>,
    /// The entry the hold belongs to; set if and only if `status == Held`.
    #[builder(default, setter(strip_option))]
    pub hold_entry_id: Option<Uuid>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// Checks the structural invariants of a slot row.
    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            anyhow::bail!("slot end time must be after start time");
        }
        let held = self.status == SlotStatus::Held;
        if held != self.hold_expires_at.is_some() || held != self.hold_entry_id.is_some() {
            anyhow::bail!("hold fields must be set exactly while the slot is held");
        }
        Ok(())
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let slot = sqlx::query_as::<_, Self>("SELECT * FROM slots WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(slot)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO slots (
                id, tenant_id, staff_id, service_id, start_time, end_time,
                status, hold_expires_at, hold_entry_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(self.staff_id)
        .bind(self.service_id)
        .bind(self.start_time)
        .bind(self.end_time)
        .bind(self.status)
        .bind(self.hold_expires_at)
        .bind(self.hold_entry_id)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// `open → held` guarded on the slot still being open.
    ///
    /// Returns `true` when this caller won the transition.
    pub async fn hold_if_open(
        id: Uuid,
        entry_id: Uuid,
        expires_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'held',
                hold_entry_id = $2,
                hold_expires_at = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(entry_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `held → open` guarded on the hold still belonging to `entry_id`.
    ///
    /// The entry guard is what makes cascade handling idempotent: a second
    /// delivery of the same event finds the hold gone and affects zero rows.
    pub async fn release_if_held_for(id: Uuid, entry_id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'open',
                hold_entry_id = NULL,
                hold_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'held' AND hold_entry_id = $2
            "#,
        )
        .bind(id)
        .bind(entry_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `held → booked` guarded on the hold still belonging to `entry_id`.
    pub async fn book_if_held_for(id: Uuid, entry_id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'booked',
                hold_entry_id = NULL,
                hold_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'held' AND hold_entry_id = $2
            "#,
        )
        .bind(id)
        .bind(entry_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administrative cancellation, allowed from any non-terminal status.
    pub async fn cancel_if_nonterminal(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'canceled',
                hold_entry_id = NULL,
                hold_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('open', 'held')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Held slots of one tenant whose hold has expired as of `now`.
    ///
    /// Expiry is computed from the stored timestamp, not an in-memory timer,
    /// so holds expire correctly across worker restarts.
    pub async fn find_expired_holds(
        tenant_id: TenantId,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let slots = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM slots
            WHERE tenant_id = $1 AND status = 'held' AND hold_expires_at <= $2
            ORDER BY hold_expires_at ASC
            "#,
        )
        .bind(tenant_id.into_uuid())
        .bind(now)
        .fetch_all(pool)
        .await?;

        Ok(slots)
    }

    /// Tenants that currently have at least one held slot.
    pub async fn tenants_with_held_slots(pool: &PgPool) -> Result<Vec<TenantId>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT tenant_id FROM slots WHERE status = 'held'",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(TenantId::from_uuid).collect())
    }
}
