//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod nats;
pub mod postgres_store;
pub mod scheduled_tasks;
pub mod sse;
pub mod test_dependencies;
pub mod traits;

pub use deps::ServerDeps;
pub use nats::{
    LogNotificationSink, NatsClientPublisher, NatsNotificationSink, NatsPublisher,
    PublishedMessage, TestNats,
};
pub use postgres_store::{PgBookingStore, PgProviderDirectory};
pub use test_dependencies::{
    InMemoryBookingStore, MockProviderDirectory, NotifyCall, SpyNotificationSink,
    TestDependencies,
};
pub use traits::*;
