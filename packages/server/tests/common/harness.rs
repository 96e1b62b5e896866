//! Test harness for dispatch integration tests.
//!
//! Each test gets fresh in-memory dependencies (store, scripted directory,
//! spy notification sink) wired into a real `ServerDeps`.
//!
//! # Example using test-context
//!
//! ```ignore
//! use test_context::test_context;
//!
//! #[test_context(TestHarness)]
//! #[tokio::test]
//! async fn my_test(ctx: &mut TestHarness) {
//!     let (booking, providers) = ctx.dispatched(3).await;
//!     // ... test code
//! }
//! ```

use std::time::Duration;

use axum::Router;
use dispatch_core::common::{CustomerId, ProviderId};
use dispatch_core::domains::bookings::{actions, Booking, BookingStatus};
use dispatch_core::kernel::{ServerDeps, TestDependencies};
use dispatch_core::server::build_app;
use dispatch_core::TrackingConfig;
use test_context::AsyncTestContext;

use super::fixtures::{nearby_entries, plumbing_booking, provider_ids};

pub struct TestHarness {
    /// Handles to the fakes, for scripting and assertions
    pub deps: TestDependencies,
    pub server_deps: ServerDeps,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {}
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();
        Self::with_deps(TestDependencies::new().tracking_config(TrackingConfig {
            location_throttle: Duration::ZERO,
            channel_capacity: 64,
        }))
    }

    pub fn with_deps(deps: TestDependencies) -> Self {
        let server_deps = deps.server_deps();
        Self { deps, server_deps }
    }

    pub fn app(&self) -> Router {
        build_app(self.server_deps.clone(), None)
    }

    /// A PENDING plumbing booking fanned out to `count` nearby providers
    pub async fn dispatched(&self, count: usize) -> (Booking, Vec<ProviderId>) {
        let providers = provider_ids(count);
        self.deps.directory.set_entries(nearby_entries(&providers));

        let booking = actions::request_booking(plumbing_booking(CustomerId::new()), &self.server_deps)
            .await
            .expect("dispatch should succeed");
        assert_eq!(booking.status, BookingStatus::Pending);
        (booking, providers)
    }

    /// A CONFIRMED booking bound to the first of `count` candidates
    pub async fn confirmed(&self, count: usize) -> (Booking, ProviderId) {
        let (booking, providers) = self.dispatched(count).await;
        let winner = providers[0];
        let outcome = actions::accept_booking(booking.id, winner, &self.server_deps)
            .await
            .expect("accept should succeed");
        assert!(outcome.accepted);
        (self.booking(&booking), winner)
    }

    /// Current stored copy of a booking
    pub fn booking(&self, booking: &Booking) -> Booking {
        self.deps
            .store
            .booking(booking.id)
            .expect("booking should exist")
    }

    pub fn status_of(&self, booking: &Booking) -> BookingStatus {
        self.booking(booking).status
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Respect RUST_LOG when set. Run with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
