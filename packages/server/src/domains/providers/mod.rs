//! Providers domain - the directory candidates are drawn from

pub mod models;

pub use models::{CreateProvider, Provider};
