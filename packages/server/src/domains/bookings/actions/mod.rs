//! Booking domain actions - the operations callers invoke
//!
//! Actions are async functions taking `&ServerDeps`, called from the HTTP
//! routes and from tests. They return typed `DispatchError`s.

mod authorization;
mod mutations;
mod queries;

pub use authorization::authorize_status_update;
pub use mutations::*;
pub use queries::*;
