//! Slot domain: the bookable unit and its lifecycle state machine.

pub mod machine;
pub mod models;
pub mod store;

pub use machine::SlotMachine;
pub use store::PostgresSlotStore;
