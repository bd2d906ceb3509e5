// Trait definitions for dependency injection.
//
// These are INFRASTRUCTURE traits only - no business logic. Business logic
// (matching, cascading, the state machine) lives in the domain layer and is
// written against these seams.
//
// Naming convention: Base* for trait names (e.g. BaseSlotStore, BaseClock).
//
// The conditional-update methods are the concurrency primitive of the whole
// system: they return `Ok(false)` when the guard failed because another
// process already advanced the state. Losing a race is not an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{EntryId, NotificationId, ServiceId, SlotId, StaffId, TenantId};
use crate::domains::notifications::models::{NotificationRecord, NotificationStatus};
use crate::domains::slots::models::slot::Slot;
use crate::domains::waitlist::models::entry::{WaitlistEntry, WaitlistStatus};

// =============================================================================
// Clock (Infrastructure - injected time source)
// =============================================================================

/// Injected time source.
///
/// All expiry comparisons go through this so tests can simulate time passage
/// deterministically, and so a hold's timeout stays data-driven: expiry is
/// computed from stored state, never from a live timer.
pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// =============================================================================
// Slot Store (Persistence seam)
// =============================================================================

#[async_trait]
pub trait BaseSlotStore: Send + Sync {
    async fn get(&self, id: SlotId) -> Result<Option<Slot>>;

    async fn insert(&self, slot: &Slot) -> Result<()>;

    /// `open → held` for `entry_id`, guarded on the slot still being open.
    async fn hold_if_open(
        &self,
        id: SlotId,
        entry_id: EntryId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// `held → open`, guarded on the hold belonging to `entry_id`.
    async fn release_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool>;

    /// `held → booked`, guarded on the hold belonging to `entry_id`.
    async fn book_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool>;

    /// `open|held → canceled`.
    async fn cancel_if_nonterminal(&self, id: SlotId) -> Result<bool>;

    /// Held slots of one tenant whose hold expired at or before `now`.
    async fn find_expired_holds(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<Vec<Slot>>;

    /// Tenants with at least one held slot, for the global sweep.
    async fn tenants_with_held_slots(&self) -> Result<Vec<TenantId>>;
}

// =============================================================================
// Waitlist Store (Persistence seam)
// =============================================================================

#[async_trait]
pub trait BaseWaitlistStore: Send + Sync {
    async fn get(&self, id: EntryId) -> Result<Option<WaitlistEntry>>;

    async fn insert(&self, entry: &WaitlistEntry) -> Result<()>;

    /// Active entries eligible for a (service, staff, start-time) slot.
    async fn find_eligible(
        &self,
        tenant: TenantId,
        service: ServiceId,
        staff: StaffId,
        slot_start: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>>;

    /// Conditional status update; `Ok(false)` when the guard failed.
    async fn update_status_if(
        &self,
        id: EntryId,
        expected: WaitlistStatus,
        new: WaitlistStatus,
    ) -> Result<bool>;

    async fn count_active_for_phone(&self, tenant: TenantId, phone: &str) -> Result<i64>;
}

// =============================================================================
// Notification Store (consumed, not owned)
// =============================================================================

#[async_trait]
pub trait BaseNotificationStore: Send + Sync {
    async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>>;

    async fn record(&self, record: &NotificationRecord) -> Result<()>;

    async fn mark(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<()>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Notification Dispatcher (external collaborator)
// =============================================================================

/// Result contract of the external dispatcher.
///
/// A failed send is not a decline: the caller schedules bounded retries and
/// otherwise leaves the hold to expire naturally.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    /// Record of the attempt, when the dispatcher created one.
    pub notification_id: Option<NotificationId>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn success(notification_id: NotificationId) -> Self {
        Self {
            success: true,
            notification_id: Some(notification_id),
            error: None,
        }
    }

    pub fn failure(notification_id: Option<NotificationId>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            notification_id,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait BaseNotificationDispatcher: Send + Sync {
    /// Offer `slot` to `candidate` over the candidate's preferred channels.
    async fn send(&self, candidate: &WaitlistEntry, slot: &Slot) -> Result<DispatchOutcome>;

    /// Re-attempt a previously failed dispatch.
    async fn retry(&self, notification_id: NotificationId, attempt: i32) -> Result<DispatchOutcome>;
}
