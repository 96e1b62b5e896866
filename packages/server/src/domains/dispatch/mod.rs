//! Dispatch domain - fan-out, race-safe accept, rejection and expiry

pub mod coordinator;
pub mod outcomes;

pub use coordinator::DispatchCoordinator;
pub use outcomes::{AcceptDecline, AcceptOutcome, RejectOutcome};
