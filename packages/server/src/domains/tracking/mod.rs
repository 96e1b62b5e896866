//! Tracking domain - live status and location channels per booking

pub mod events;
pub mod hub;

pub use events::{LocationUpdate, ProviderFeedEvent, TrackingEvent};
pub use hub::{PublishOutcome, Subscription, SubscriptionHandle, TrackingHub};
