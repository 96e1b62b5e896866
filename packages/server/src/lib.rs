// Dispatch Core - live booking dispatch and tracking
//
// Matches bookings to nearby providers, fans requests out, settles the accept
// race with a single guarded write, and streams status and location to
// subscribers until the job ends.
//
// Domain logic lives in domains/*; infrastructure (stores, NATS, SSE,
// scheduling) lives in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
