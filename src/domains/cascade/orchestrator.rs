//! Cascade orchestration.
//!
//! Reacts to a decline or hold expiry: consume the previous offer, re-open
//! the slot, offer it to the next ranked candidate. Safe under at-least-once
//! job delivery: re-running for an already-processed event finds the
//! entry-guarded release affecting zero rows and no-ops.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{CoreError, CoreResult, EntryId, SlotId, TenantId};
use crate::domains::slots::machine::SlotMachine;
use crate::domains::slots::models::slot::{Slot, SlotStatus};
use crate::domains::waitlist::matcher;
use crate::domains::waitlist::models::entry::WaitlistStatus;
use crate::kernel::jobs::handlers::{RetryNotificationPayload, FIRST_RETRY_DELAY};
use crate::kernel::ServiceKernel;

/// Why a slot became available again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeReason {
    Declined,
    Expired,
}

impl std::fmt::Display for CascadeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CascadeReason::Declined => write!(f, "declined"),
            CascadeReason::Expired => write!(f, "expired"),
        }
    }
}

/// What a cascade invocation accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Whether this invocation released the previous hold. `false` on a
    /// duplicate delivery that found the hold already gone.
    pub hold_released: bool,
    pub next_candidate_found: bool,
    pub notified: bool,
    pub candidate_name: Option<String>,
}

impl CascadeOutcome {
    /// Nothing to do: the slot had already been advanced by someone else,
    /// or no candidate exists.
    fn none() -> Self {
        Self::default()
    }
}

pub struct CascadeOrchestrator<'a> {
    kernel: &'a ServiceKernel,
}

impl<'a> CascadeOrchestrator<'a> {
    pub fn new(kernel: &'a ServiceKernel) -> Self {
        Self { kernel }
    }

    /// Handles one decline/expiry event for a slot.
    pub async fn handle_cascade(
        &self,
        tenant_id: TenantId,
        slot_id: SlotId,
        previous_entry_id: EntryId,
        reason: CascadeReason,
    ) -> CoreResult<CascadeOutcome> {
        // One-shot offer: declined and expired both consume the entry.
        let resolved = self
            .kernel
            .waitlist
            .update_status_if(previous_entry_id, WaitlistStatus::Notified, WaitlistStatus::Removed)
            .await?;
        if !resolved {
            debug!(entry_id = %previous_entry_id, "previous entry already resolved");
        }

        // Re-open only if the hold still belongs to the previous entry. If
        // the slot moved on (booked, canceled, re-held), this event was
        // already processed or superseded; stop quietly.
        let released = self
            .kernel
            .slots
            .release_if_held_for(slot_id, previous_entry_id)
            .await?;
        if !released {
            // A slot that does not exist is not a processed event; it is a
            // data-consistency problem and must fail the job.
            let slot = self
                .kernel
                .slots
                .get(slot_id)
                .await?
                .ok_or_else(|| CoreError::not_found("slot", slot_id))?;
            debug!(
                tenant_id = %tenant_id,
                slot_id = %slot_id,
                entry_id = %previous_entry_id,
                status = ?slot.status,
                %reason,
                "slot no longer held for entry, cascade is a no-op"
            );
            return Ok(CascadeOutcome::none());
        }

        info!(
            tenant_id = %tenant_id,
            slot_id = %slot_id,
            entry_id = %previous_entry_id,
            %reason,
            "hold released, cascading to next candidate"
        );

        let mut outcome = self.offer_open_slot(tenant_id, slot_id).await?;
        outcome.hold_released = true;
        Ok(outcome)
    }

    /// Offers an open slot to the best eligible candidate.
    ///
    /// Ranks candidates, holds the slot for the winner, marks them notified,
    /// and asks the dispatcher to contact them. A dispatch failure leaves the
    /// hold in place and schedules a bounded retry; it is not a decline.
    pub async fn offer_open_slot(
        &self,
        tenant_id: TenantId,
        slot_id: SlotId,
    ) -> CoreResult<CascadeOutcome> {
        let slot = self
            .kernel
            .slots
            .get(slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("slot", slot_id))?;

        if slot.status != SlotStatus::Open {
            debug!(slot_id = %slot_id, status = ?slot.status, "slot not open, nothing to offer");
            return Ok(CascadeOutcome::none());
        }

        let candidates = matcher::find_candidates(self.kernel, &slot).await?;
        if candidates.is_empty() {
            debug!(tenant_id = %tenant_id, slot_id = %slot_id, "no eligible candidates, slot stays open");
            return Ok(CascadeOutcome::none());
        }

        let machine = SlotMachine::new(self.kernel);
        for candidate in candidates {
            let entry_id = EntryId::from_uuid(candidate.entry.id);

            let held = match machine
                .hold(slot_id, entry_id, self.kernel.config.hold_minutes)
                .await
            {
                Ok(held) => held,
                // Lost the slot to a concurrent caller: stop, they own it now.
                Err(e) if e.is_conflict() => {
                    debug!(slot_id = %slot_id, "slot advanced concurrently during offer");
                    return Ok(CascadeOutcome::none());
                }
                Err(e) => return Err(e),
            };

            let claimed = self
                .kernel
                .waitlist
                .update_status_if(entry_id, WaitlistStatus::Active, WaitlistStatus::Notified)
                .await?;
            if !claimed {
                // The entry withdrew (or was resolved) between ranking and
                // now. Give the hold back and try the next candidate.
                let _ = self
                    .kernel
                    .slots
                    .release_if_held_for(slot_id, entry_id)
                    .await?;
                continue;
            }

            return self.dispatch_offer(tenant_id, &held, candidate.entry.customer_name, entry_id, candidate.score).await;
        }

        // Every ranked candidate withdrew before we could claim one.
        Ok(CascadeOutcome::none())
    }

    async fn dispatch_offer(
        &self,
        tenant_id: TenantId,
        slot: &Slot,
        candidate_name: String,
        entry_id: EntryId,
        score: i32,
    ) -> CoreResult<CascadeOutcome> {
        let entry = self
            .kernel
            .waitlist
            .get(entry_id)
            .await?
            .ok_or_else(|| CoreError::not_found("waitlist entry", entry_id))?;

        let outcome = self.kernel.dispatcher.send(&entry, slot).await?;

        if outcome.success {
            info!(
                tenant_id = %tenant_id,
                slot_id = %slot.id,
                entry_id = %entry_id,
                score,
                "candidate notified of offer"
            );
        } else {
            let error = outcome.error.as_deref().unwrap_or("unknown dispatch error");
            warn!(
                tenant_id = %tenant_id,
                slot_id = %slot.id,
                entry_id = %entry_id,
                error,
                "offer dispatch failed, scheduling retry"
            );

            match outcome.notification_id {
                Some(notification_id) => {
                    let payload = RetryNotificationPayload {
                        tenant_id,
                        notification_id,
                        entry_id,
                        slot_id: SlotId::from_uuid(slot.id),
                        attempt: 1,
                    };
                    self.kernel
                        .job_queue
                        .enqueue(payload.into_spec(FIRST_RETRY_DELAY))
                        .await?;
                }
                None => {
                    // No record of the attempt exists, so there is nothing
                    // to retry against; the hold expires naturally.
                    warn!(
                        tenant_id = %tenant_id,
                        slot_id = %slot.id,
                        "dispatcher returned no notification id, offer left to expire"
                    );
                }
            }
        }

        Ok(CascadeOutcome {
            hold_released: false,
            next_candidate_found: true,
            notified: outcome.success,
            candidate_name: Some(candidate_name),
        })
    }
}
