//! Hold, confirm, and expiry behavior of the slot state machine, plus the
//! expired-hold sweep.

mod common;

use chrono::Duration;
use uuid::Uuid;

use common::*;
use waitlist_core::common::{CoreError, EntryId, SlotId, TenantId};
use waitlist_core::domains::cascade::{run_sweep, CascadeOrchestrator, CascadeReason};
use waitlist_core::domains::slots::models::slot::SlotStatus;
use waitlist_core::domains::slots::SlotMachine;
use waitlist_core::domains::waitlist::models::entry::WaitlistStatus;
use waitlist_core::kernel::traits::{BaseSlotStore, BaseWaitlistStore};

#[tokio::test]
async fn hold_and_confirm_within_window_books_the_slot() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let entry = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(slot.clone());
    deps.waitlist.put(entry.clone());

    let machine = SlotMachine::new(&kernel);
    let slot_id = SlotId::from_uuid(slot.id);
    let entry_id = EntryId::from_uuid(entry.id);

    let held = machine.hold(slot_id, entry_id, 10).await.unwrap();
    assert_eq!(held.status, SlotStatus::Held);
    assert_eq!(held.hold_expires_at, Some(test_now() + Duration::minutes(10)));

    // Offer accepted; the entry must be notified for the confirm to resolve it.
    deps.waitlist
        .update_status_if(entry_id, WaitlistStatus::Active, WaitlistStatus::Notified)
        .await
        .unwrap();

    deps.clock.advance(Duration::minutes(9));
    let booked = machine.confirm(slot_id, entry_id).await.unwrap();
    assert_eq!(booked.status, SlotStatus::Booked);
    assert_eq!(
        deps.waitlist.status_of(entry_id),
        Some(WaitlistStatus::Confirmed)
    );
}

#[tokio::test]
async fn confirmation_at_the_expiry_boundary_is_rejected() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let entry = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(slot.clone());
    deps.waitlist.put(entry.clone());

    let machine = SlotMachine::new(&kernel);
    let slot_id = SlotId::from_uuid(slot.id);
    let entry_id = EntryId::from_uuid(entry.id);
    machine.hold(slot_id, entry_id, 10).await.unwrap();

    // Exactly at expiry: a miss, not a booking.
    deps.clock.advance(Duration::minutes(10));
    let err = machine.confirm(slot_id, entry_id).await.unwrap_err();
    assert!(err.is_conflict());

    let still_held = deps.slots.get(slot_id).await.unwrap().unwrap();
    assert_eq!(still_held.status, SlotStatus::Held);
}

#[tokio::test]
async fn hold_duration_outside_bounds_is_rejected() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let entry = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(slot.clone());
    deps.waitlist.put(entry.clone());

    let machine = SlotMachine::new(&kernel);
    let slot_id = SlotId::from_uuid(slot.id);
    let entry_id = EntryId::from_uuid(entry.id);

    for minutes in [0, 61] {
        let err = machine.hold(slot_id, entry_id, minutes).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    // Slot untouched by the rejected attempts.
    let slot = deps.slots.get(slot_id).await.unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Open);
}

#[tokio::test]
async fn cancel_is_allowed_from_open_and_held_but_not_booked() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();
    let machine = SlotMachine::new(&kernel);

    let open = open_slot(tenant);
    deps.slots.put(open.clone());
    machine.cancel(SlotId::from_uuid(open.id)).await.unwrap();

    let entry = active_entry(&open, "Alice", "+15555550101");
    let held = held_for(open_slot(tenant), entry.id, 10);
    deps.slots.put(held.clone());
    machine.cancel(SlotId::from_uuid(held.id)).await.unwrap();

    let mut booked = open_slot(tenant);
    booked.status = SlotStatus::Booked;
    deps.slots.put(booked.clone());
    let err = machine.cancel(SlotId::from_uuid(booked.id)).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn sweep_releases_expired_holds_and_cascades() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    // Carol's hold expired a minute ago; Alice is waiting.
    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    let alice = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), carol.id, -1));
    deps.waitlist.put(carol.clone());
    deps.waitlist.put(alice.clone());

    let report = run_sweep(&kernel, None).await.unwrap();
    assert_eq!(report.tenants_processed, 1);
    assert_eq!(report.holds_released, 1);
    assert_eq!(report.cascaded, 1);
    assert!(report.errors.is_empty());

    assert_eq!(
        deps.waitlist.status_of(EntryId::from_uuid(carol.id)),
        Some(WaitlistStatus::Removed)
    );
    let held = deps
        .slots
        .get(SlotId::from_uuid(slot.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.hold_entry_id, Some(alice.id));
}

#[tokio::test]
async fn sweep_leaves_unexpired_holds_alone() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    deps.slots.put(held_for(slot.clone(), carol.id, 5));
    deps.waitlist.put(carol.clone());

    let report = run_sweep(&kernel, Some(TenantId::from_uuid(tenant)))
        .await
        .unwrap();
    assert_eq!(report.holds_released, 0);

    let held = deps
        .slots
        .get(SlotId::from_uuid(slot.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.hold_entry_id, Some(carol.id));
    assert_eq!(
        deps.waitlist.status_of(EntryId::from_uuid(carol.id)),
        Some(WaitlistStatus::Notified)
    );
}

#[tokio::test]
async fn expiry_and_decline_converge_on_one_cascade() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    let alice = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), carol.id, -1));
    deps.waitlist.put(carol.clone());
    deps.waitlist.put(alice.clone());

    // The sweep fires first, then a late decline event for the same hold
    // arrives. The decline must not disturb Alice's new hold.
    run_sweep(&kernel, Some(TenantId::from_uuid(tenant)))
        .await
        .unwrap();
    let late = CascadeOrchestrator::new(&kernel)
        .handle_cascade(
            TenantId::from_uuid(tenant),
            SlotId::from_uuid(slot.id),
            EntryId::from_uuid(carol.id),
            CascadeReason::Declined,
        )
        .await
        .unwrap();
    assert!(!late.next_candidate_found);

    let held = deps
        .slots
        .get(SlotId::from_uuid(slot.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.hold_entry_id, Some(alice.id));
    assert_eq!(deps.dispatcher.send_calls().len(), 1);
}
