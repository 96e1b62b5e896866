//! Server dependencies for dispatch (using traits for testability)
//!
//! This module provides the central dependency container used by the booking
//! actions, the HTTP routes and the scheduler. Store, directory and
//! notification sink are trait objects so tests can swap in memory fakes.

use std::sync::Arc;

use crate::config::{DispatchConfig, MatchConfig, TrackingConfig};
use crate::domains::dispatch::DispatchCoordinator;
use crate::domains::matching::MatchEngine;
use crate::domains::tracking::TrackingHub;
use crate::kernel::{BaseBookingStore, BaseNotificationSink, BaseProviderDirectory};

/// Server dependencies accessible to actions
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn BaseBookingStore>,
    pub directory: Arc<dyn BaseProviderDirectory>,
    pub notifier: Arc<dyn BaseNotificationSink>,
    /// In-process live channels for SSE endpoints and subscribers
    pub tracking: TrackingHub,
    pub match_engine: MatchEngine,
    pub coordinator: DispatchCoordinator,
}

impl ServerDeps {
    /// Wire the engine and coordinator over the given infrastructure
    pub fn new(
        store: Arc<dyn BaseBookingStore>,
        directory: Arc<dyn BaseProviderDirectory>,
        notifier: Arc<dyn BaseNotificationSink>,
        matching: MatchConfig,
        tracking: TrackingConfig,
        dispatch: DispatchConfig,
    ) -> Self {
        let tracking = TrackingHub::new(tracking);
        let match_engine = MatchEngine::new(directory.clone(), matching);
        let coordinator =
            DispatchCoordinator::new(store.clone(), notifier.clone(), tracking.clone(), dispatch);

        Self {
            store,
            directory,
            notifier,
            tracking,
            match_engine,
            coordinator,
        }
    }
}
