//! Waitlist entry model and its Postgres queries.
//!
//! Entry status moves only forward: `active → notified → confirmed|removed`,
//! or `active → removed` on withdrawal. There is deliberately no
//! `notified → active` edge: an offer is one-shot, a declined or expired
//! notified entry is removed, not put back in the pool.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{CoreError, CoreResult, TenantId};
use crate::kernel::traits::BaseWaitlistStore;

/// At most this many simultaneously active entries per phone number per
/// tenant.
pub const MAX_ACTIVE_PER_PHONE: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "waitlist_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    #[default]
    Active,
    Notified,
    Confirmed,
    Removed,
}

impl WaitlistStatus {
    /// Whether the status machine defines a `self → next` transition.
    pub fn can_transition_to(self, next: WaitlistStatus) -> bool {
        match (self, next) {
            (WaitlistStatus::Active, WaitlistStatus::Notified) => true,
            (WaitlistStatus::Active, WaitlistStatus::Removed) => true,
            (WaitlistStatus::Notified, WaitlistStatus::Confirmed) => true,
            (WaitlistStatus::Notified, WaitlistStatus::Removed) => true,
            _ => false,
        }
    }
}

/// A customer's request to be notified when a matching slot frees up.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WaitlistEntry {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_name: String,
    pub phone: String,
    #[builder(default, setter(strip_option))]
    pub email: Option<String>,
    pub service_id: Uuid,
    /// Optional staff preference; `None` means any staff member is fine.
    #[builder(default, setter(strip_option))]
    pub staff_id: Option<Uuid>,
    pub earliest_time: DateTime<Utc>,
    pub latest_time: DateTime<Utc>,
    /// Stored advisory score; the matcher recomputes at ranking time.
    #[builder(default = 0)]
    pub priority_score: i32,
    #[builder(default = false)]
    pub vip: bool,
    #[builder(default)]
    pub status: WaitlistStatus,
    /// Preferred contact channels, e.g. `["sms", "email"]`.
    #[builder(default = vec!["sms".to_string()])]
    pub channels: Vec<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Validates the entry's own fields.
    pub fn validate(&self) -> CoreResult<()> {
        if self.earliest_time >= self.latest_time {
            return Err(CoreError::Validation(
                "earliest acceptable time must be before latest".to_string(),
            ));
        }
        if self.phone.trim().is_empty() {
            return Err(CoreError::Validation("phone number is required".to_string()));
        }
        Ok(())
    }

    /// Validates and persists a new entry, enforcing the per-phone cap.
    ///
    /// Rejecting the fourth simultaneously active entry for one phone number
    /// happens here, at creation time; nothing in the matching or cascade
    /// paths ever creates an active entry as a side effect.
    pub async fn create(self, store: &dyn BaseWaitlistStore) -> CoreResult<WaitlistEntry> {
        self.validate()?;

        let tenant = TenantId::from_uuid(self.tenant_id);
        let active = store.count_active_for_phone(tenant, &self.phone).await?;
        if active >= MAX_ACTIVE_PER_PHONE {
            return Err(CoreError::Validation(format!(
                "phone {} already has {MAX_ACTIVE_PER_PHONE} active waitlist entries",
                self.phone
            )));
        }

        store.insert(&self).await?;
        Ok(self)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let entry = sqlx::query_as::<_, Self>("SELECT * FROM waitlist_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(entry)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waitlist_entries (
                id, tenant_id, customer_name, phone, email, service_id, staff_id,
                earliest_time, latest_time, priority_score, vip, status, channels,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(&self.customer_name)
        .bind(&self.phone)
        .bind(&self.email)
        .bind(self.service_id)
        .bind(self.staff_id)
        .bind(self.earliest_time)
        .bind(self.latest_time)
        .bind(self.priority_score)
        .bind(self.vip)
        .bind(self.status)
        .bind(&self.channels)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Active entries eligible for a slot: same tenant and service, staff
    /// preference null or matching, slot start inside the entry's window.
    pub async fn find_eligible(
        tenant_id: Uuid,
        service_id: Uuid,
        staff_id: Uuid,
        slot_start: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let entries = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM waitlist_entries
            WHERE tenant_id = $1
              AND service_id = $2
              AND status = 'active'
              AND (staff_id IS NULL OR staff_id = $3)
              AND earliest_time <= $4
              AND latest_time >= $4
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(service_id)
        .bind(staff_id)
        .bind(slot_start)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    /// Conditional status update; `true` when this caller won the transition.
    pub async fn update_status_if(
        id: Uuid,
        expected: WaitlistStatus,
        new: WaitlistStatus,
        pool: &PgPool,
    ) -> Result<bool> {
        // The status machine is closed: a transition it does not define can
        // never win, whatever the row currently holds.
        if !expected.can_transition_to(new) {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE waitlist_entries
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active_for_phone(
        tenant_id: Uuid,
        phone: &str,
        pool: &PgPool,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM waitlist_entries
            WHERE tenant_id = $1 AND phone = $2 AND status = 'active'
            "#,
        )
        .bind(tenant_id)
        .bind(phone)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    use crate::domains::slots::models::slot::Slot;

    /// Test helper: an active, non-vip entry eligible for `slot` with no
    /// staff preference. `created_at` equals the slot start so the recency
    /// bonus is zero unless a test overrides it.
    pub(crate) fn entry_for(slot: &Slot) -> WaitlistEntry {
        WaitlistEntry::builder()
            .tenant_id(slot.tenant_id)
            .customer_name("Alex Customer".to_string())
            .phone("+15555550100".to_string())
            .service_id(slot.service_id)
            .earliest_time(slot.start_time - Duration::days(1))
            .latest_time(slot.start_time + Duration::days(1))
            .created_at(slot.start_time)
            .build()
    }

    #[test]
    fn new_entry_defaults_to_active() {
        let slot = crate::domains::slots::models::slot::tests::slot_at(Utc::now());
        let entry = entry_for(&slot);
        assert_eq!(entry.status, WaitlistStatus::Active);
        assert!(!entry.vip);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn inverted_window_fails_validation() {
        let slot = crate::domains::slots::models::slot::tests::slot_at(Utc::now());
        let mut entry = entry_for(&slot);
        entry.latest_time = entry.earliest_time - Duration::hours(1);
        assert!(matches!(
            entry.validate(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn status_machine_has_no_backward_edges() {
        use WaitlistStatus::*;
        assert!(Active.can_transition_to(Notified));
        assert!(Active.can_transition_to(Removed));
        assert!(Notified.can_transition_to(Confirmed));
        assert!(Notified.can_transition_to(Removed));

        // One-shot offer: a notified entry never becomes active again.
        assert!(!Notified.can_transition_to(Active));
        for next in [Active, Notified, Confirmed, Removed] {
            assert!(!Confirmed.can_transition_to(next));
            assert!(!Removed.can_transition_to(next));
        }
    }
}
