//! Cascade domain: reacting to declines and hold expiries by offering the
//! slot to the next ranked candidate.

pub mod orchestrator;
pub mod sweep;

pub use orchestrator::{CascadeOrchestrator, CascadeOutcome, CascadeReason};
pub use sweep::{run_sweep, SweepReport};
