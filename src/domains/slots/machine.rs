//! Slot state machine.
//!
//! Transitions ride on the store's conditional updates: whichever caller's
//! update lands first wins, the loser gets [`CoreError::Conflict`] and must
//! stop; "someone else already advanced the slot" is never retried blindly.

use tracing::debug;

use crate::common::{CoreError, CoreResult, EntryId, SlotId};
use crate::config::{MAX_HOLD_MINUTES, MIN_HOLD_MINUTES};
use crate::domains::waitlist::models::entry::WaitlistStatus;
use crate::kernel::ServiceKernel;

use super::models::slot::{Slot, SlotStatus};

pub struct SlotMachine<'a> {
    kernel: &'a ServiceKernel,
}

impl<'a> SlotMachine<'a> {
    pub fn new(kernel: &'a ServiceKernel) -> Self {
        Self { kernel }
    }

    async fn load(&self, slot_id: SlotId) -> CoreResult<Slot> {
        self.kernel
            .slots
            .get(slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("slot", slot_id))
    }

    /// `open → held(entry, duration_minutes)`.
    ///
    /// Exactly one concurrent caller wins; the rest observe a conflict.
    /// Returns the slot as held, including the expiry it was given.
    pub async fn hold(
        &self,
        slot_id: SlotId,
        entry_id: EntryId,
        duration_minutes: i64,
    ) -> CoreResult<Slot> {
        if !(MIN_HOLD_MINUTES..=MAX_HOLD_MINUTES).contains(&duration_minutes) {
            return Err(CoreError::Validation(format!(
                "hold duration must be {MIN_HOLD_MINUTES}-{MAX_HOLD_MINUTES} minutes, got {duration_minutes}"
            )));
        }

        let expires_at = self.kernel.clock.now() + chrono::Duration::minutes(duration_minutes);
        let won = self
            .kernel
            .slots
            .hold_if_open(slot_id, entry_id, expires_at)
            .await?;
        if !won {
            // Distinguish a lost race from a dangling reference.
            let slot = self.load(slot_id).await?;
            debug!(slot_id = %slot_id, status = ?slot.status, "hold attempt lost");
            return Err(CoreError::Conflict("slot is not open"));
        }

        let mut slot = self.load(slot_id).await?;
        // The read can lag the write we just won; report what we know.
        slot.status = SlotStatus::Held;
        slot.hold_entry_id = Some(entry_id.into_uuid());
        slot.hold_expires_at = Some(expires_at);
        Ok(slot)
    }

    /// `held → open`, e.g. on explicit decline. Guarded on `entry_id` so a
    /// stale release (for a hold that has since moved on) is a conflict.
    pub async fn release(&self, slot_id: SlotId, entry_id: EntryId) -> CoreResult<()> {
        let won = self
            .kernel
            .slots
            .release_if_held_for(slot_id, entry_id)
            .await?;
        if !won {
            self.load(slot_id).await?;
            return Err(CoreError::Conflict("slot is not held for this entry"));
        }
        Ok(())
    }

    /// `held → booked` on customer confirmation.
    ///
    /// A confirmation arriving at or after the hold expiry is rejected and
    /// treated as a miss; the caller falls through to the cascade.
    pub async fn confirm(&self, slot_id: SlotId, entry_id: EntryId) -> CoreResult<Slot> {
        let slot = self.load(slot_id).await?;

        if !slot.status.can_transition_to(SlotStatus::Booked)
            || slot.hold_entry_id != Some(entry_id.into_uuid())
        {
            return Err(CoreError::Conflict("slot is not held for this entry"));
        }

        let now = self.kernel.clock.now();
        match slot.hold_expires_at {
            // Strict: confirming exactly at the boundary misses.
            Some(expiry) if now < expiry => {}
            _ => return Err(CoreError::Conflict("hold has expired")),
        }

        let won = self
            .kernel
            .slots
            .book_if_held_for(slot_id, entry_id)
            .await?;
        if !won {
            return Err(CoreError::Conflict("slot is not held for this entry"));
        }

        // Best effort: if the entry already left `notified` someone else
        // resolved it, which does not undo the booking.
        let moved = self
            .kernel
            .waitlist
            .update_status_if(entry_id, WaitlistStatus::Notified, WaitlistStatus::Confirmed)
            .await?;
        if !moved {
            debug!(entry_id = %entry_id, "entry was not in notified status at confirmation");
        }

        let mut booked = slot;
        booked.status = SlotStatus::Booked;
        booked.hold_entry_id = None;
        booked.hold_expires_at = None;
        Ok(booked)
    }

    /// Administrative cancellation, allowed from any non-terminal status.
    pub async fn cancel(&self, slot_id: SlotId) -> CoreResult<()> {
        let won = self.kernel.slots.cancel_if_nonterminal(slot_id).await?;
        if !won {
            self.load(slot_id).await?;
            return Err(CoreError::Conflict("slot is already terminal"));
        }
        Ok(())
    }
}
