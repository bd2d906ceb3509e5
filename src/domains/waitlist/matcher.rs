//! Candidate matching for an opened slot.

use std::cmp::Reverse;

use crate::common::{CoreResult, ServiceId, StaffId, TenantId};
use crate::domains::slots::models::slot::Slot;
use crate::kernel::ServiceKernel;

use super::models::entry::{WaitlistEntry, WaitlistStatus};
use super::scoring;

/// An eligible entry with its freshly computed score.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub entry: WaitlistEntry,
    pub score: i32,
}

/// Eligible candidates for `slot`, best first.
///
/// Scores are recomputed here, at matching time; the stored score on the
/// entry is never trusted for ranking. The ordering is total: score
/// descending, then created-at ascending (first come first served among
/// equals), then entry id, so no two entries ever compare equal.
pub async fn find_candidates(
    kernel: &ServiceKernel,
    slot: &Slot,
) -> CoreResult<Vec<RankedCandidate>> {
    let entries = kernel
        .waitlist
        .find_eligible(
            TenantId::from_uuid(slot.tenant_id),
            ServiceId::from_uuid(slot.service_id),
            StaffId::from_uuid(slot.staff_id),
            slot.start_time,
        )
        .await?;

    let now = kernel.clock.now();
    let mut candidates: Vec<RankedCandidate> = entries
        .into_iter()
        .filter(|entry| is_eligible(entry, slot))
        .map(|entry| {
            let score = scoring::score(&entry, slot, now, &kernel.config.weights);
            RankedCandidate { entry, score }
        })
        .collect();

    candidates.sort_by_key(|c| (Reverse(c.score), c.entry.created_at, c.entry.id));
    Ok(candidates)
}

/// The eligibility filter, re-applied on top of whatever the store returned.
fn is_eligible(entry: &WaitlistEntry, slot: &Slot) -> bool {
    entry.status == WaitlistStatus::Active
        && entry.tenant_id == slot.tenant_id
        && entry.service_id == slot.service_id
        && (entry.staff_id.is_none() || entry.staff_id == Some(slot.staff_id))
        && entry.earliest_time <= slot.start_time
        && slot.start_time <= entry.latest_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::domains::slots::models::slot::tests::slot_at;
    use crate::domains::waitlist::models::entry::tests::entry_for;

    #[test]
    fn removed_entries_are_filtered() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.status = WaitlistStatus::Removed;
        assert!(!is_eligible(&entry, &slot));
    }

    #[test]
    fn confirmed_entries_are_filtered() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.status = WaitlistStatus::Confirmed;
        assert!(!is_eligible(&entry, &slot));
    }

    #[test]
    fn slot_start_outside_window_is_filtered() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.latest_time = slot.start_time - Duration::minutes(1);
        assert!(!is_eligible(&entry, &slot));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.earliest_time = slot.start_time;
        entry.latest_time = slot.start_time;
        assert!(is_eligible(&entry, &slot));
    }

    #[test]
    fn staff_preference_mismatch_is_filtered() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.staff_id = Some(uuid::Uuid::now_v7());
        assert!(!is_eligible(&entry, &slot));

        entry.staff_id = Some(slot.staff_id);
        assert!(is_eligible(&entry, &slot));

        entry.staff_id = None;
        assert!(is_eligible(&entry, &slot));
    }

    #[test]
    fn wrong_service_is_filtered() {
        let slot = slot_at(Utc::now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.service_id = uuid::Uuid::now_v7();
        assert!(!is_eligible(&entry, &slot));
    }
}
