// Common types shared across the dispatch domains

pub mod actor;
pub mod entity_ids;
pub mod geo;
pub mod id;

pub use actor::Actor;
pub use entity_ids::*;
pub use geo::GeoPoint;
pub use id::Id;
