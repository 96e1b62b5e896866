pub mod booking;
pub mod booking_request;
pub mod lifecycle_event;

pub use booking::*;
pub use booking_request::*;
pub use lifecycle_event::*;
