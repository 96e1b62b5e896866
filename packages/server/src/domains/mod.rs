// Business domains
pub mod bookings;
pub mod dispatch;
pub mod matching;
pub mod providers;
pub mod tracking;
