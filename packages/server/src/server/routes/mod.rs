// HTTP routes
pub mod bookings;
pub mod health;
pub mod stream;

pub use bookings::*;
pub use health::*;
pub use stream::*;
