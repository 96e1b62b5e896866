// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Dispatch rules (who may accept, which transitions are legal) live in the
// domains and only talk to the outside world through these seams.
//
// Naming convention: Base* for trait names (e.g., BaseBookingStore)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{BookingId, GeoPoint, ProviderId};
use crate::domains::bookings::models::{
    Booking, BookingGuard, BookingPatch, BookingRequest, BookingSummary, DeliveryMode,
    LifecycleEvent, RequestStatus, UpdateOutcome,
};

// =============================================================================
// Provider Directory Trait (Infrastructure)
// =============================================================================

/// Filter handed to the provider directory.
///
/// `location` + `radius_km` select a geographic search; `city` alone selects
/// a city search; neither selects everyone offering the category.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryQuery {
    pub category: String,
    pub delivery_mode: DeliveryMode,
    pub location: Option<GeoPoint>,
    pub radius_km: Option<f64>,
    pub city: Option<String>,
    pub limit: Option<usize>,
}

/// One provider returned by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub provider_id: ProviderId,
    /// Distance to the query point, when the query had one.
    pub distance_km: Option<f64>,
    pub is_active: bool,
}

impl DirectoryEntry {
    pub fn active(provider_id: ProviderId, distance_km: Option<f64>) -> Self {
        Self {
            provider_id,
            distance_km,
            is_active: true,
        }
    }
}

#[async_trait]
pub trait BaseProviderDirectory: Send + Sync {
    /// Providers offering `query.category` that satisfy the location filter.
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryEntry>>;
}

// =============================================================================
// Booking Store Trait (Infrastructure)
// =============================================================================

/// Persistence for bookings, their fan-out requests and the lifecycle log.
///
/// `conditional_update` is the only way to change a booking after insert and
/// must evaluate the guard and apply the patch as one atomic step.
#[async_trait]
pub trait BaseBookingStore: Send + Sync {
    async fn get(&self, id: BookingId) -> Result<Option<Booking>>;

    async fn insert_booking(&self, booking: &Booking) -> Result<Booking>;

    async fn conditional_update(
        &self,
        id: BookingId,
        guard: &BookingGuard,
        patch: &BookingPatch,
    ) -> Result<UpdateOutcome>;

    /// All-or-nothing batch insert.
    async fn insert_requests(&self, requests: &[BookingRequest]) -> Result<()>;

    async fn find_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<Option<BookingRequest>>;

    /// Returns the number of rows moved (0 or 1).
    async fn transition_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<u64>;

    async fn list_requests(&self, booking_id: BookingId) -> Result<Vec<BookingRequest>>;

    async fn expire_outstanding_requests(
        &self,
        booking_id: BookingId,
        except: Option<ProviderId>,
    ) -> Result<u64>;

    /// Delete every request of a booking that is still `REQUESTED`. A no-op
    /// once the booking has moved on.
    async fn discard_unpublished_requests(&self, booking_id: BookingId) -> Result<u64>;

    async fn count_pending_requests(&self, booking_id: BookingId) -> Result<i64>;

    /// Unbound `PENDING` bookings created before `cutoff`, oldest first.
    async fn find_pending_before(&self, cutoff: DateTime<Utc>, limit: i64)
        -> Result<Vec<Booking>>;

    async fn record_lifecycle_event(&self, event: &LifecycleEvent) -> Result<()>;

    async fn lifecycle_events(&self, booking_id: BookingId) -> Result<Vec<LifecycleEvent>>;
}

// =============================================================================
// Notification Sink Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseNotificationSink: Send + Sync {
    /// Tell candidate providers about a new booking request.
    async fn notify(&self, providers: &[ProviderId], summary: &BookingSummary) -> Result<()>;
}
