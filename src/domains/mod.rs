//! Domain logic: the slot state machine, waitlist matching, and cascade
//! orchestration.

pub mod cascade;
pub mod notifications;
pub mod slots;
pub mod waitlist;
