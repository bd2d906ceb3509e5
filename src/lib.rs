// Appointment Waitlist Core
//
// Multi-tenant waitlist management for appointment-based businesses: slot
// lifecycle, priority-based candidate matching, and decline/expiry cascades.
// All background work runs through a Postgres-backed job queue; concurrency
// control is conditional updates, not locks.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
