mod status;

pub use status::BookingStateMachine;
