//! Dispatch failure handling: bounded retries with doubling delays, then
//! abandonment. A failed dispatch is never treated as a decline.

mod common;

use chrono::Duration;
use uuid::Uuid;

use common::*;
use waitlist_core::common::{EntryId, NotificationId, SlotId, TenantId};
use waitlist_core::domains::cascade::{CascadeOrchestrator, CascadeReason};
use waitlist_core::domains::notifications::NotificationStatus;
use waitlist_core::domains::slots::models::slot::SlotStatus;
use waitlist_core::domains::waitlist::models::entry::WaitlistStatus;
use waitlist_core::kernel::jobs::handlers::{
    JobHandler, NotificationRetryHandler, RetryNotificationPayload, NOTIFICATION_RETRY_JOB,
};
use waitlist_core::kernel::test_dependencies::MockDispatcher;
use waitlist_core::kernel::traits::BaseSlotStore;

fn failing_deps(failures: usize) -> waitlist_core::kernel::TestDependencies {
    let base = deps();
    let dispatcher = MockDispatcher::new()
        .failing_times(failures, "sms gateway unavailable")
        .recording_to(base.notifications.clone());
    base.with_dispatcher(dispatcher)
}

#[tokio::test]
async fn failed_dispatch_schedules_first_retry_and_keeps_the_hold() {
    let deps = failing_deps(1);
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    let alice = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), carol.id, 5));
    deps.waitlist.put(carol.clone());
    deps.waitlist.put(alice.clone());

    let outcome = CascadeOrchestrator::new(&kernel)
        .handle_cascade(
            TenantId::from_uuid(tenant),
            SlotId::from_uuid(slot.id),
            EntryId::from_uuid(carol.id),
            CascadeReason::Declined,
        )
        .await
        .unwrap();

    // The candidate was found and claimed even though the send failed.
    assert!(outcome.next_candidate_found);
    assert!(!outcome.notified);

    let held = deps
        .slots
        .get(SlotId::from_uuid(slot.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.status, SlotStatus::Held);
    assert_eq!(held.hold_entry_id, Some(alice.id));
    assert_eq!(
        deps.waitlist.status_of(EntryId::from_uuid(alice.id)),
        Some(WaitlistStatus::Notified)
    );

    let retries = deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].delay, Some(Duration::seconds(1)));
    let payload: RetryNotificationPayload =
        serde_json::from_value(retries[0].args.clone()).unwrap();
    assert_eq!(payload.attempt, 1);
}

#[tokio::test]
async fn retries_double_their_delay_then_abandon() {
    // One failing send plus three failing retries.
    let deps = failing_deps(4);
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    let alice = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), carol.id, 5));
    deps.waitlist.put(carol.clone());
    deps.waitlist.put(alice.clone());

    CascadeOrchestrator::new(&kernel)
        .handle_cascade(
            TenantId::from_uuid(tenant),
            SlotId::from_uuid(slot.id),
            EntryId::from_uuid(carol.id),
            CascadeReason::Declined,
        )
        .await
        .unwrap();

    // Drain the retry chain by running each scheduled retry job in turn.
    let handler = NotificationRetryHandler;
    loop {
        let specs = deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB);
        let executed = deps.dispatcher.retry_calls().len();
        if executed >= specs.len() {
            break;
        }
        let claimed = claim_spec(&specs[executed]);
        handler.execute(&claimed, &kernel).await.unwrap();
    }

    let specs = deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB);
    let delays: Vec<_> = specs.iter().map(|s| s.delay).collect();
    assert_eq!(
        delays,
        vec![
            Some(Duration::seconds(1)),
            Some(Duration::seconds(2)),
            Some(Duration::seconds(4)),
        ]
    );
    assert_eq!(
        deps.dispatcher.retry_calls().iter().map(|(_, a)| *a).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // The record is abandoned, but the offer itself stands: the hold and the
    // notified entry are left for the expiry sweep, not cascaded past.
    let first: RetryNotificationPayload = serde_json::from_value(specs[0].args.clone()).unwrap();
    assert_eq!(
        deps.notifications.status_of(first.notification_id),
        Some(NotificationStatus::Abandoned)
    );
    let held = deps
        .slots
        .get(SlotId::from_uuid(slot.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.status, SlotStatus::Held);
    assert_eq!(held.hold_entry_id, Some(alice.id));
    assert_eq!(
        deps.waitlist.status_of(EntryId::from_uuid(alice.id)),
        Some(WaitlistStatus::Notified)
    );
}

#[tokio::test]
async fn retry_succeeding_marks_the_record_sent() {
    // Failing send, failing first retry, then success.
    let deps = failing_deps(2);
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let carol = notified_entry(&slot, "Carol", "+15555550103");
    let alice = active_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), carol.id, 5));
    deps.waitlist.put(carol.clone());
    deps.waitlist.put(alice.clone());

    CascadeOrchestrator::new(&kernel)
        .handle_cascade(
            TenantId::from_uuid(tenant),
            SlotId::from_uuid(slot.id),
            EntryId::from_uuid(carol.id),
            CascadeReason::Declined,
        )
        .await
        .unwrap();

    let handler = NotificationRetryHandler;
    let specs = deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB);
    handler.execute(&claim_spec(&specs[0]), &kernel).await.unwrap();

    let specs = deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB);
    assert_eq!(specs.len(), 2);
    handler.execute(&claim_spec(&specs[1]), &kernel).await.unwrap();

    let payload: RetryNotificationPayload = serde_json::from_value(specs[0].args.clone()).unwrap();
    assert_eq!(
        deps.notifications.status_of(payload.notification_id),
        Some(NotificationStatus::Sent)
    );
    // No further retries were scheduled.
    assert_eq!(
        deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB).len(),
        2
    );
}

#[tokio::test]
async fn resolved_notification_makes_a_duplicate_retry_job_a_no_op() {
    let deps = deps();
    let kernel = deps.kernel();
    let tenant = Uuid::now_v7();

    let slot = open_slot(tenant);
    let alice = notified_entry(&slot, "Alice", "+15555550101");
    deps.slots.put(held_for(slot.clone(), alice.id, 5));
    deps.waitlist.put(alice.clone());

    // A record that was already marked sent.
    let record = waitlist_core::domains::notifications::NotificationRecord::builder()
        .tenant_id(tenant)
        .entry_id(alice.id)
        .slot_id(slot.id)
        .status(NotificationStatus::Sent)
        .attempts(1)
        .build();
    let notification_id = NotificationId::from_uuid(record.id);
    deps.notifications.put(record);

    let payload = RetryNotificationPayload {
        tenant_id: TenantId::from_uuid(tenant),
        notification_id,
        entry_id: EntryId::from_uuid(alice.id),
        slot_id: SlotId::from_uuid(slot.id),
        attempt: 1,
    };
    let spec = payload.into_spec(Duration::seconds(1));
    NotificationRetryHandler
        .execute(&claim_spec(&spec), &kernel)
        .await
        .unwrap();

    // No dispatch happened and nothing new was scheduled.
    assert!(deps.dispatcher.retry_calls().is_empty());
    assert!(deps.job_queue.enqueued_of_type(NOTIFICATION_RETRY_JOB).is_empty());
}
