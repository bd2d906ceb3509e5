// TestDependencies - in-memory implementations for testing.
//
// Provides stores and a scripted dispatcher that can be injected into
// ServiceKernel for tests. The conditional updates lock the whole map, so
// they have the same winner-takes-all semantics as the SQL versions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::{EntryId, NotificationId, ServiceId, SlotId, StaffId, TenantId};
use crate::config::CoreConfig;
use crate::domains::notifications::models::{NotificationRecord, NotificationStatus};
use crate::domains::slots::models::slot::{Slot, SlotStatus};
use crate::domains::waitlist::models::entry::{WaitlistEntry, WaitlistStatus};

use super::clock::ManualClock;
use super::jobs::testing::MemoryJobQueue;
use super::traits::{
    BaseNotificationDispatcher, BaseNotificationStore, BaseSlotStore, BaseWaitlistStore,
    DispatchOutcome,
};
use super::ServiceKernel;

// =============================================================================
// Memory Slot Store
// =============================================================================

#[derive(Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(self, slot: Slot) -> Self {
        self.slots.lock().unwrap().insert(slot.id, slot);
        self
    }

    pub fn put(&self, slot: Slot) {
        self.slots.lock().unwrap().insert(slot.id, slot);
    }
}

#[async_trait]
impl BaseSlotStore for MemorySlotStore {
    async fn get(&self, id: SlotId) -> Result<Option<Slot>> {
        Ok(self.slots.lock().unwrap().get(id.as_uuid()).cloned())
    }

    async fn insert(&self, slot: &Slot) -> Result<()> {
        self.slots.lock().unwrap().insert(slot.id, slot.clone());
        Ok(())
    }

    async fn hold_if_open(
        &self,
        id: SlotId,
        entry_id: EntryId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id.as_uuid()) {
            Some(slot) if slot.status == SlotStatus::Open => {
                slot.status = SlotStatus::Held;
                slot.hold_entry_id = Some(entry_id.into_uuid());
                slot.hold_expires_at = Some(expires_at);
                slot.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id.as_uuid()) {
            Some(slot)
                if slot.status == SlotStatus::Held
                    && slot.hold_entry_id == Some(entry_id.into_uuid()) =>
            {
                slot.status = SlotStatus::Open;
                slot.hold_entry_id = None;
                slot.hold_expires_at = None;
                slot.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn book_if_held_for(&self, id: SlotId, entry_id: EntryId) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id.as_uuid()) {
            Some(slot)
                if slot.status == SlotStatus::Held
                    && slot.hold_entry_id == Some(entry_id.into_uuid()) =>
            {
                slot.status = SlotStatus::Booked;
                slot.hold_entry_id = None;
                slot.hold_expires_at = None;
                slot.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_if_nonterminal(&self, id: SlotId) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id.as_uuid()) {
            Some(slot) if !slot.status.is_terminal() => {
                slot.status = SlotStatus::Canceled;
                slot.hold_entry_id = None;
                slot.hold_expires_at = None;
                slot.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_expired_holds(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<Vec<Slot>> {
        let slots = self.slots.lock().unwrap();
        Ok(slots
            .values()
            .filter(|s| {
                s.tenant_id == tenant.into_uuid()
                    && s.status == SlotStatus::Held
                    && s.hold_expires_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn tenants_with_held_slots(&self) -> Result<Vec<TenantId>> {
        let slots = self.slots.lock().unwrap();
        let mut tenants: Vec<Uuid> = slots
            .values()
            .filter(|s| s.status == SlotStatus::Held)
            .map(|s| s.tenant_id)
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants.into_iter().map(TenantId::from_uuid).collect())
    }
}

// =============================================================================
// Memory Waitlist Store
// =============================================================================

#[derive(Default)]
pub struct MemoryWaitlistStore {
    entries: Mutex<HashMap<Uuid, WaitlistEntry>>,
}

impl MemoryWaitlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, entry: WaitlistEntry) -> Self {
        self.entries.lock().unwrap().insert(entry.id, entry);
        self
    }

    pub fn put(&self, entry: WaitlistEntry) {
        self.entries.lock().unwrap().insert(entry.id, entry);
    }

    pub fn status_of(&self, id: EntryId) -> Option<WaitlistStatus> {
        self.entries
            .lock()
            .unwrap()
            .get(id.as_uuid())
            .map(|e| e.status)
    }
}

#[async_trait]
impl BaseWaitlistStore for MemoryWaitlistStore {
    async fn get(&self, id: EntryId) -> Result<Option<WaitlistEntry>> {
        Ok(self.entries.lock().unwrap().get(id.as_uuid()).cloned())
    }

    async fn insert(&self, entry: &WaitlistEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_eligible(
        &self,
        tenant: TenantId,
        service: ServiceId,
        staff: StaffId,
        slot_start: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .values()
            .filter(|e| {
                e.status == WaitlistStatus::Active
                    && e.tenant_id == tenant.into_uuid()
                    && e.service_id == service.into_uuid()
                    && (e.staff_id.is_none() || e.staff_id == Some(staff.into_uuid()))
                    && e.earliest_time <= slot_start
                    && slot_start <= e.latest_time
            })
            .cloned()
            .collect())
    }

    async fn update_status_if(
        &self,
        id: EntryId,
        expected: WaitlistStatus,
        new: WaitlistStatus,
    ) -> Result<bool> {
        if !expected.can_transition_to(new) {
            return Ok(false);
        }
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(id.as_uuid()) {
            Some(entry) if entry.status == expected => {
                entry.status = new;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_active_for_phone(&self, tenant: TenantId, phone: &str) -> Result<i64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .values()
            .filter(|e| {
                e.tenant_id == tenant.into_uuid()
                    && e.phone == phone
                    && e.status == WaitlistStatus::Active
            })
            .count() as i64)
    }
}

// =============================================================================
// Memory Notification Store
// =============================================================================

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<HashMap<Uuid, NotificationRecord>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: NotificationRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn status_of(&self, id: NotificationId) -> Option<NotificationStatus> {
        self.records
            .lock()
            .unwrap()
            .get(id.as_uuid())
            .map(|r| r.status)
    }
}

#[async_trait]
impl BaseNotificationStore for MemoryNotificationStore {
    async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>> {
        Ok(self.records.lock().unwrap().get(id.as_uuid()).cloned())
    }

    async fn record(&self, record: &NotificationRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .entry(record.id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn mark(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(id.as_uuid()) {
            record.status = status;
            record.attempts = attempts;
            record.last_error = last_error.map(|s| s.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

// =============================================================================
// Mock Dispatcher
// =============================================================================

/// A dispatch call as seen by the mock.
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub entry_id: Uuid,
    pub slot_id: Uuid,
}

/// Scripted dispatcher. Outcomes are consumed in order; once the script runs
/// out every call succeeds with a fresh notification id.
pub struct MockDispatcher {
    scripted: Mutex<Vec<DispatchOutcome>>,
    send_calls: Mutex<Vec<DispatchCall>>,
    retry_calls: Mutex<Vec<(NotificationId, i32)>>,
    store: Option<Arc<MemoryNotificationStore>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(Vec::new()),
            send_calls: Mutex::new(Vec::new()),
            retry_calls: Mutex::new(Vec::new()),
            store: None,
        }
    }

    /// Record every send as a notification record in `store`, the way the
    /// real dispatcher persists its attempts.
    pub fn recording_to(mut self, store: Arc<MemoryNotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_outcome(self, outcome: DispatchOutcome) -> Self {
        self.scripted.lock().unwrap().push(outcome);
        self
    }

    /// Script `n` consecutive failures that still produce a record.
    pub fn failing_times(self, n: usize, error: &str) -> Self {
        let mut this = self;
        for _ in 0..n {
            let id = NotificationId::new();
            this = this.with_outcome(DispatchOutcome::failure(Some(id), error));
        }
        this
    }

    pub fn send_calls(&self) -> Vec<DispatchCall> {
        self.send_calls.lock().unwrap().clone()
    }

    pub fn retry_calls(&self) -> Vec<(NotificationId, i32)> {
        self.retry_calls.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> DispatchOutcome {
        let mut scripted = self.scripted.lock().unwrap();
        if scripted.is_empty() {
            DispatchOutcome::success(NotificationId::new())
        } else {
            scripted.remove(0)
        }
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseNotificationDispatcher for MockDispatcher {
    async fn send(&self, candidate: &WaitlistEntry, slot: &Slot) -> Result<DispatchOutcome> {
        self.send_calls.lock().unwrap().push(DispatchCall {
            entry_id: candidate.id,
            slot_id: slot.id,
        });

        let outcome = self.next_outcome();
        if let (Some(store), Some(id)) = (&self.store, outcome.notification_id) {
            let record = NotificationRecord::builder()
                .id(id.into_uuid())
                .tenant_id(slot.tenant_id)
                .entry_id(candidate.id)
                .slot_id(slot.id)
                .status(if outcome.success {
                    NotificationStatus::Sent
                } else {
                    NotificationStatus::Failed
                })
                .attempts(1)
                .build();
            store.record(&record).await?;
        }
        Ok(outcome)
    }

    async fn retry(&self, notification_id: NotificationId, attempt: i32) -> Result<DispatchOutcome> {
        self.retry_calls
            .lock()
            .unwrap()
            .push((notification_id, attempt));

        let mut outcome = self.next_outcome();
        // Retries are against an existing record.
        outcome.notification_id = Some(notification_id);
        Ok(outcome)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// All in-memory dependencies wired into one kernel.
pub struct TestDependencies {
    pub slots: Arc<MemorySlotStore>,
    pub waitlist: Arc<MemoryWaitlistStore>,
    pub notifications: Arc<MemoryNotificationStore>,
    pub dispatcher: Arc<MockDispatcher>,
    pub job_queue: Arc<MemoryJobQueue>,
    pub clock: Arc<ManualClock>,
}

impl TestDependencies {
    pub fn new() -> Self {
        let notifications = Arc::new(MemoryNotificationStore::new());
        Self {
            slots: Arc::new(MemorySlotStore::new()),
            waitlist: Arc::new(MemoryWaitlistStore::new()),
            dispatcher: Arc::new(MockDispatcher::new().recording_to(notifications.clone())),
            notifications,
            job_queue: Arc::new(MemoryJobQueue::new()),
            clock: Arc::new(ManualClock::new(Utc::now())),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: MockDispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn kernel(&self) -> ServiceKernel {
        self.kernel_with_config(CoreConfig::default())
    }

    pub fn kernel_with_config(&self, config: CoreConfig) -> ServiceKernel {
        ServiceKernel::new(
            self.slots.clone(),
            self.waitlist.clone(),
            self.notifications.clone(),
            self.dispatcher.clone(),
            self.job_queue.clone(),
            self.clock.clone(),
            config,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
