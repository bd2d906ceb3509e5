pub mod entry;

pub use entry::{WaitlistEntry, WaitlistStatus, MAX_ACTIVE_PER_PHONE};
