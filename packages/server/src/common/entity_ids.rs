//! Typed ID definitions for the dispatch entities.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Booking entities.
pub struct Booking;

/// Marker type for per-provider BookingRequest fan-out rows.
pub struct BookingRequest;

/// Marker type for customers (the party requesting a service).
pub struct Customer;

/// Marker type for service providers.
pub struct Provider;

/// Marker type for admin operators.
pub struct Admin;

/// Marker type for lifecycle log rows.
pub struct LifecycleEvent;

// ============================================================================
// Type aliases
// ============================================================================

pub type BookingId = Id<Booking>;

pub type BookingRequestId = Id<BookingRequest>;

pub type CustomerId = Id<Customer>;

pub type ProviderId = Id<Provider>;

pub type AdminId = Id<Admin>;

pub type LifecycleEventId = Id<LifecycleEvent>;
