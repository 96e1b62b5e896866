//! Matching domain - turns a booking into ranked candidate providers

pub mod engine;

pub use engine::MatchEngine;
