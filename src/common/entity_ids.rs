//! Typed ID aliases for the domain entities.
//!
//! One alias per entity keeps signatures honest: a function that needs a
//! `SlotId` cannot be handed an `EntryId` by accident.

pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for tenants (businesses).
pub struct Tenant;

/// Marker type for bookable slots.
pub struct Slot;

/// Marker type for waitlist entries.
pub struct WaitlistEntry;

/// Marker type for staff members.
pub struct Staff;

/// Marker type for services.
pub struct Service;

/// Marker type for notification records.
pub struct Notification;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for a tenant.
pub type TenantId = Id<Tenant>;

/// Typed ID for a slot.
pub type SlotId = Id<Slot>;

/// Typed ID for a waitlist entry.
pub type EntryId = Id<WaitlistEntry>;

/// Typed ID for a staff member.
pub type StaffId = Id<Staff>;

/// Typed ID for a service.
pub type ServiceId = Id<Service>;

/// Typed ID for a notification record.
pub type NotificationId = Id<Notification>;
