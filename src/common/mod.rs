// Shared building blocks used by both the kernel and the domain layers.

pub mod entity_ids;
pub mod error;
pub mod id;

pub use entity_ids::{EntryId, NotificationId, ServiceId, SlotId, StaffId, TenantId};
pub use error::{CoreError, CoreResult};
