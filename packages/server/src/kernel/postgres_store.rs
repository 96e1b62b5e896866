//! Postgres-backed implementations of the booking store and provider directory.
//!
//! Thin adapters: every query lives on the model it reads or writes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{BookingId, ProviderId};
use crate::domains::bookings::models::{
    Booking, BookingGuard, BookingPatch, BookingRequest, LifecycleEvent, RequestStatus,
    UpdateOutcome,
};
use crate::domains::providers::Provider;
use crate::kernel::{BaseBookingStore, BaseProviderDirectory, DirectoryEntry, DirectoryQuery};

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseBookingStore for PgBookingStore {
    async fn get(&self, id: BookingId) -> Result<Option<Booking>> {
        Booking::find_by_id_optional(id, &self.pool).await
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<Booking> {
        booking.insert(&self.pool).await
    }

    async fn conditional_update(
        &self,
        id: BookingId,
        guard: &BookingGuard,
        patch: &BookingPatch,
    ) -> Result<UpdateOutcome> {
        Booking::conditional_update(id, guard, patch, &self.pool).await
    }

    async fn insert_requests(&self, requests: &[BookingRequest]) -> Result<()> {
        BookingRequest::insert_batch(requests, &self.pool).await
    }

    async fn find_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<Option<BookingRequest>> {
        BookingRequest::find_for_provider(booking_id, provider_id, &self.pool).await
    }

    async fn transition_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<u64> {
        BookingRequest::transition(booking_id, provider_id, from, to, &self.pool).await
    }

    async fn list_requests(&self, booking_id: BookingId) -> Result<Vec<BookingRequest>> {
        BookingRequest::find_by_booking(booking_id, &self.pool).await
    }

    async fn expire_outstanding_requests(
        &self,
        booking_id: BookingId,
        except: Option<ProviderId>,
    ) -> Result<u64> {
        BookingRequest::expire_outstanding(booking_id, except, &self.pool).await
    }

    async fn discard_unpublished_requests(&self, booking_id: BookingId) -> Result<u64> {
        BookingRequest::discard_unpublished(booking_id, &self.pool).await
    }

    async fn count_pending_requests(&self, booking_id: BookingId) -> Result<i64> {
        BookingRequest::count_pending(booking_id, &self.pool).await
    }

    async fn find_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        Booking::find_pending_before(cutoff, limit, &self.pool).await
    }

    async fn record_lifecycle_event(&self, event: &LifecycleEvent) -> Result<()> {
        event.record(&self.pool).await
    }

    async fn lifecycle_events(&self, booking_id: BookingId) -> Result<Vec<LifecycleEvent>> {
        LifecycleEvent::find_by_booking(booking_id, &self.pool).await
    }
}

#[derive(Clone)]
pub struct PgProviderDirectory {
    pool: PgPool,
}

impl PgProviderDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseProviderDirectory for PgProviderDirectory {
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryEntry>> {
        Provider::search(query, &self.pool).await
    }
}
