// TestDependencies - in-memory implementations for testing
//
// Provides fakes for the booking store, provider directory and notification
// sink that can be wired into ServerDeps without Postgres or NATS.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    BaseBookingStore, BaseNotificationSink, BaseProviderDirectory, DirectoryEntry, DirectoryQuery,
    ServerDeps,
};
use crate::common::{BookingId, GeoPoint, ProviderId};
use crate::config::{DispatchConfig, MatchConfig, TrackingConfig};
use crate::domains::bookings::models::{
    Booking, BookingGuard, BookingPatch, BookingRequest, BookingStatus, BookingSummary,
    LifecycleEvent, LifecyclePhase, RequestStatus, UpdateOutcome,
};

// =============================================================================
// In-memory Booking Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    bookings: HashMap<BookingId, Booking>,
    requests: Vec<BookingRequest>,
    events: Vec<LifecycleEvent>,
}

/// Booking store backed by a mutex-guarded map.
///
/// Guard evaluation and patch application happen under one lock, which gives
/// `conditional_update` the same all-or-nothing behavior as the SQL version.
#[derive(Default)]
pub struct InMemoryBookingStore {
    state: Mutex<StoreState>,
    fail_all: AtomicBool,
    fail_request_inserts: AtomicBool,
    fail_lifecycle: AtomicBool,
    conditional_updates: AtomicUsize,
    failing_updates: AtomicUsize,
    stale_reads: Mutex<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable: connection refused");
        }
        Ok(())
    }

    /// Make every call fail with a transient error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_request_inserts(&self, fail: bool) {
        self.fail_request_inserts.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` conditional updates, then behave normally
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// Answer the next `get` for this booking with `snapshot` instead of the stored row
    pub fn serve_stale_read(&self, snapshot: Booking) {
        self.stale_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.id, snapshot);
    }

    pub fn fail_lifecycle_writes(&self, fail: bool) {
        self.fail_lifecycle.store(fail, Ordering::SeqCst);
    }

    /// Put a booking in place as-is, bypassing every rule
    pub fn seed(&self, booking: Booking) {
        self.state().bookings.insert(booking.id, booking);
    }

    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.state().bookings.get(&id).cloned()
    }

    pub fn requests_for(&self, id: BookingId) -> Vec<BookingRequest> {
        let mut requests: Vec<BookingRequest> = self
            .state()
            .requests
            .iter()
            .filter(|r| r.booking_id == id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.candidate_rank);
        requests
    }

    pub fn request_status(&self, id: BookingId, provider_id: ProviderId) -> Option<RequestStatus> {
        self.state()
            .requests
            .iter()
            .find(|r| r.booking_id == id && r.provider_id == provider_id)
            .map(|r| r.status)
    }

    pub fn events_for(&self, id: BookingId) -> Vec<LifecycleEvent> {
        self.state()
            .events
            .iter()
            .filter(|e| e.booking_id == id)
            .cloned()
            .collect()
    }

    pub fn has_event(&self, id: BookingId, phase: LifecyclePhase, event_type: &str) -> bool {
        self.events_for(id)
            .iter()
            .any(|e| e.phase == phase && e.event_type == event_type)
    }

    pub fn conditional_update_count(&self) -> usize {
        self.conditional_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseBookingStore for InMemoryBookingStore {
    async fn get(&self, id: BookingId) -> Result<Option<Booking>> {
        self.check_available()?;
        let stale = self
            .stale_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(snapshot) = stale {
            return Ok(Some(snapshot));
        }
        Ok(self.booking(id))
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<Booking> {
        self.check_available()?;
        let mut state = self.state();
        if state.bookings.contains_key(&booking.id) {
            anyhow::bail!("duplicate key value violates unique constraint \"bookings_pkey\"");
        }
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking.clone())
    }

    async fn conditional_update(
        &self,
        id: BookingId,
        guard: &BookingGuard,
        patch: &BookingPatch,
    ) -> Result<UpdateOutcome> {
        self.check_available()?;
        if self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("conditional update failed: connection reset");
        }
        // Let racing callers interleave before the atomic section
        tokio::task::yield_now().await;
        self.conditional_updates.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let Some(booking) = state.bookings.get_mut(&id) else {
            return Ok(UpdateOutcome::missed());
        };
        if !guard.matches(booking) {
            return Ok(UpdateOutcome::missed());
        }
        if patch.provider_id.is_some() && booking.provider_id.is_some() {
            return Ok(UpdateOutcome::missed());
        }

        patch.apply(booking);
        Ok(UpdateOutcome {
            rows_affected: 1,
            booking: Some(booking.clone()),
        })
    }

    async fn insert_requests(&self, requests: &[BookingRequest]) -> Result<()> {
        self.check_available()?;
        if self.fail_request_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("batch insert failed: connection reset");
        }

        let mut state = self.state();
        let mut keys: HashSet<(BookingId, ProviderId)> = state
            .requests
            .iter()
            .map(|r| (r.booking_id, r.provider_id))
            .collect();
        for request in requests {
            if !keys.insert((request.booking_id, request.provider_id)) {
                anyhow::bail!(
                    "duplicate key value violates unique constraint \"booking_requests_booking_id_provider_id_key\""
                );
            }
        }

        state.requests.extend(requests.iter().cloned());
        Ok(())
    }

    async fn find_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<Option<BookingRequest>> {
        self.check_available()?;
        Ok(self
            .state()
            .requests
            .iter()
            .find(|r| r.booking_id == booking_id && r.provider_id == provider_id)
            .cloned())
    }

    async fn transition_request(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<u64> {
        self.check_available()?;
        let mut state = self.state();
        match state.requests.iter_mut().find(|r| {
            r.booking_id == booking_id && r.provider_id == provider_id && r.status == from
        }) {
            Some(request) => {
                request.status = to;
                request.responded_at = Some(Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_requests(&self, booking_id: BookingId) -> Result<Vec<BookingRequest>> {
        self.check_available()?;
        Ok(self.requests_for(booking_id))
    }

    async fn expire_outstanding_requests(
        &self,
        booking_id: BookingId,
        except: Option<ProviderId>,
    ) -> Result<u64> {
        self.check_available()?;
        let now = Utc::now();
        let mut moved = 0;
        for request in self.state().requests.iter_mut() {
            if request.booking_id == booking_id
                && request.status == RequestStatus::Pending
                && Some(request.provider_id) != except
            {
                request.status = RequestStatus::Expired;
                request.responded_at = Some(now);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn discard_unpublished_requests(&self, booking_id: BookingId) -> Result<u64> {
        self.check_available()?;
        let mut state = self.state();
        let requested = state
            .bookings
            .get(&booking_id)
            .is_some_and(|b| b.status == BookingStatus::Requested);
        if !requested {
            return Ok(0);
        }
        let before = state.requests.len();
        state.requests.retain(|r| r.booking_id != booking_id);
        Ok((before - state.requests.len()) as u64)
    }

    async fn count_pending_requests(&self, booking_id: BookingId) -> Result<i64> {
        self.check_available()?;
        Ok(self
            .state()
            .requests
            .iter()
            .filter(|r| r.booking_id == booking_id && r.status == RequestStatus::Pending)
            .count() as i64)
    }

    async fn find_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        self.check_available()?;
        let mut stale: Vec<Booking> = self
            .state()
            .bookings
            .values()
            .filter(|b| {
                b.status == BookingStatus::Pending && b.provider_id.is_none() && b.created_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn record_lifecycle_event(&self, event: &LifecycleEvent) -> Result<()> {
        self.check_available()?;
        if self.fail_lifecycle.load(Ordering::SeqCst) {
            anyhow::bail!("lifecycle log unavailable");
        }
        self.state().events.push(event.clone());
        Ok(())
    }

    async fn lifecycle_events(&self, booking_id: BookingId) -> Result<Vec<LifecycleEvent>> {
        self.check_available()?;
        Ok(self.events_for(booking_id))
    }
}

// =============================================================================
// Mock Provider Directory
// =============================================================================

/// Directory returning scripted entries and recording every query.
///
/// Providers placed with `place` are searched by radius instead, for queries
/// that carry a location.
#[derive(Default)]
pub struct MockProviderDirectory {
    entries: Mutex<Vec<DirectoryEntry>>,
    placed: Mutex<Vec<(ProviderId, GeoPoint)>>,
    failing: AtomicBool,
    queries: Mutex<Vec<DirectoryQuery>>,
}

impl MockProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<DirectoryEntry>) -> Self {
        let directory = Self::new();
        directory.set_entries(entries);
        directory
    }

    /// Directory whose every query times out
    pub fn failing() -> Self {
        let directory = Self::new();
        directory.set_failing(true);
        directory
    }

    pub fn set_entries(&self, entries: Vec<DirectoryEntry>) {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Put an active provider at `point`
    pub fn place(&self, provider_id: ProviderId, point: GeoPoint) {
        self.placed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((provider_id, point));
    }

    fn within_radius(&self, center: GeoPoint, radius_km: f64) -> Vec<DirectoryEntry> {
        let mut found: Vec<DirectoryEntry> = self
            .placed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(provider_id, point)| {
                DirectoryEntry::active(*provider_id, Some(center.distance_km(point)))
            })
            .filter(|entry| entry.distance_km.is_some_and(|d| d <= radius_km))
            .collect();
        found.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found
    }

    pub fn queries(&self) -> Vec<DirectoryQuery> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_query(&self) -> Option<DirectoryQuery> {
        self.queries().pop()
    }

    pub fn query_count(&self) -> usize {
        self.queries().len()
    }
}

#[async_trait]
impl BaseProviderDirectory for MockProviderDirectory {
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryEntry>> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.clone());

        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("provider directory query timed out");
        }
        let has_placed = !self
            .placed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if let (true, Some(center), Some(radius_km)) =
            (has_placed, query.location, query.radius_km)
        {
            return Ok(self.within_radius(center, radius_km));
        }
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

// =============================================================================
// Spy Notification Sink
// =============================================================================

/// A recorded notify call
#[derive(Debug, Clone)]
pub struct NotifyCall {
    pub providers: Vec<ProviderId>,
    pub summary: BookingSummary,
}

#[derive(Default)]
pub struct SpyNotificationSink {
    calls: Mutex<Vec<NotifyCall>>,
    failing: AtomicBool,
}

impl SpyNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that records calls but reports delivery failure
    pub fn failing() -> Self {
        let sink = Self::new();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn was_notified(&self, provider_id: ProviderId) -> bool {
        self.calls()
            .iter()
            .any(|call| call.providers.contains(&provider_id))
    }
}

#[async_trait]
impl BaseNotificationSink for SpyNotificationSink {
    async fn notify(&self, providers: &[ProviderId], summary: &BookingSummary) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(NotifyCall {
                providers: providers.to_vec(),
                summary: summary.clone(),
            });

        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("push gateway unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// TestDependencies builder
// =============================================================================

/// Wires the fakes into `ServerDeps` while keeping handles for assertions
pub struct TestDependencies {
    pub store: Arc<InMemoryBookingStore>,
    pub directory: Arc<MockProviderDirectory>,
    pub notifier: Arc<SpyNotificationSink>,
    pub matching: MatchConfig,
    pub tracking: TrackingConfig,
    pub dispatch: DispatchConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryBookingStore::new()),
            directory: Arc::new(MockProviderDirectory::new()),
            notifier: Arc::new(SpyNotificationSink::new()),
            matching: MatchConfig::default(),
            tracking: TrackingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn mock_directory(mut self, directory: MockProviderDirectory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    pub fn mock_notifier(mut self, notifier: SpyNotificationSink) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn tracking_config(mut self, config: TrackingConfig) -> Self {
        self.tracking = config;
        self
    }

    pub fn dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.store.clone(),
            self.directory.clone(),
            self.notifier.clone(),
            self.matching,
            self.tracking,
            self.dispatch,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
