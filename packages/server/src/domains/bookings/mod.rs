//! Bookings domain - lifecycle, state machine and the public dispatch actions

pub mod actions;
pub mod errors;
pub mod machines;
pub mod models;

// Re-export commonly used types
pub use errors::DispatchError;
pub use machines::BookingStateMachine;
pub use models::{
    Booking, BookingGuard, BookingPatch, BookingRequest, BookingStatus, BookingSummary,
    DeliveryMode, LifecycleEvent, LifecyclePhase, NewBooking, RequestStatus, UpdateOutcome,
};
