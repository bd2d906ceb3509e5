//! Shared fixtures for integration tests.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use waitlist_core::domains::slots::models::slot::{Slot, SlotStatus};
use waitlist_core::domains::waitlist::models::entry::{WaitlistEntry, WaitlistStatus};
use waitlist_core::kernel::jobs::{ClaimedJob, Job, JobSpec};
use waitlist_core::kernel::TestDependencies;

/// The fixed instant every test clock starts at.
pub fn test_now() -> DateTime<Utc> {
    "2024-06-03T09:00:00Z".parse().unwrap()
}

/// Dependencies with the manual clock pinned to [`test_now`].
pub fn deps() -> TestDependencies {
    let deps = TestDependencies::new();
    deps.clock.set(test_now());
    deps
}

/// An open slot for `tenant`, starting three hours from [`test_now`].
pub fn open_slot(tenant_id: Uuid) -> Slot {
    let start = test_now() + Duration::hours(3);
    Slot::builder()
        .tenant_id(tenant_id)
        .staff_id(Uuid::now_v7())
        .service_id(Uuid::now_v7())
        .start_time(start)
        .end_time(start + Duration::hours(1))
        .build()
}

/// The same slot, held for `entry_id` with `minutes` left on the hold.
pub fn held_for(mut slot: Slot, entry_id: Uuid, minutes: i64) -> Slot {
    slot.status = SlotStatus::Held;
    slot.hold_entry_id = Some(entry_id);
    slot.hold_expires_at = Some(test_now() + Duration::minutes(minutes));
    slot
}

/// An active entry eligible for `slot`. `created_at` equals [`test_now`] so
/// the recency bonus starts at zero.
pub fn active_entry(slot: &Slot, name: &str, phone: &str) -> WaitlistEntry {
    WaitlistEntry::builder()
        .tenant_id(slot.tenant_id)
        .customer_name(name.to_string())
        .phone(phone.to_string())
        .service_id(slot.service_id)
        .earliest_time(slot.start_time - Duration::days(2))
        .latest_time(slot.start_time + Duration::days(2))
        .created_at(test_now())
        .build()
}

pub fn notified_entry(slot: &Slot, name: &str, phone: &str) -> WaitlistEntry {
    let mut entry = active_entry(slot, name, phone);
    entry.status = WaitlistStatus::Notified;
    entry
}

/// Wraps an enqueued spec as a claimed job so a handler can run it directly,
/// without waiting out the spec's delay.
pub fn claim_spec(spec: &JobSpec) -> ClaimedJob {
    let job = Job::builder()
        .job_type(spec.job_type.clone())
        .args(spec.args.clone())
        .build();
    ClaimedJob { id: job.id, job }
}
