use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::common::{Actor, AdminId, BookingId, ProviderId};
use crate::config::DispatchConfig;
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::machines::BookingStateMachine;
use crate::domains::bookings::models::{
    Booking, BookingGuard, BookingPatch, BookingRequest, BookingStatus, LifecycleEvent,
    LifecyclePhase, RequestStatus,
};
use crate::domains::tracking::{ProviderFeedEvent, TrackingHub};
use crate::kernel::{BaseBookingStore, BaseNotificationSink};

use super::outcomes::{AcceptDecline, AcceptOutcome, RejectOutcome};

pub const REASON_NO_PROVIDERS: &str = "no providers available";
pub const REASON_ALL_DECLINED: &str = "all providers declined";
pub const REASON_TIMED_OUT: &str = "no provider accepted in time";

/// Fans bookings out to candidates and arbitrates who gets them.
///
/// Every booking write goes through `BaseBookingStore::conditional_update`,
/// so correctness never depends on a read taken earlier in the same call.
#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<dyn BaseBookingStore>,
    notifier: Arc<dyn BaseNotificationSink>,
    tracking: TrackingHub,
    config: DispatchConfig,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn BaseBookingStore>,
        notifier: Arc<dyn BaseNotificationSink>,
        tracking: TrackingHub,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            tracking,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    async fn load(&self, booking_id: BookingId) -> Result<Booking, DispatchError> {
        self.store
            .get(booking_id)
            .await?
            .ok_or(DispatchError::BookingNotFound(booking_id))
    }

    /// Append to the lifecycle log. Failures are logged, never returned.
    async fn record(
        &self,
        booking_id: BookingId,
        phase: LifecyclePhase,
        event_type: &str,
        data: serde_json::Value,
    ) {
        let event = LifecycleEvent::new(booking_id, phase, event_type, data);
        if let Err(e) = self.store.record_lifecycle_event(&event).await {
            warn!(booking_id = %booking_id, event_type, error = %e, "Failed to record lifecycle event");
        }
    }

    /// Error for a write that lost its guard, based on where the booking is now.
    fn stale_write_error(current: &Booking, to: BookingStatus) -> DispatchError {
        if current.is_terminal() {
            DispatchError::BookingNotActive {
                booking_id: current.id,
                status: current.status,
            }
        } else {
            DispatchError::IllegalTransition {
                from: current.status,
                to,
            }
        }
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Create one request per candidate, move the booking to `PENDING`, then notify.
    ///
    /// The batch insert is all-or-nothing, and a batch whose booking never
    /// reached `PENDING` is discarded, so a failed call can be retried as a
    /// whole. Notification failures are logged; providers can still see their
    /// pending requests.
    #[instrument(skip_all, fields(booking_id = %booking.id, candidates = candidates.len()))]
    pub async fn dispatch(
        &self,
        booking: &Booking,
        candidates: &[ProviderId],
    ) -> Result<Booking, DispatchError> {
        let mut seen = HashSet::new();
        let candidates: Vec<ProviderId> = candidates
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if candidates.is_empty() {
            return Err(DispatchError::NoCandidates {
                booking_id: booking.id,
            });
        }
        BookingStateMachine::validate(booking.status, BookingStatus::Pending)?;

        // Leftovers of an attempt that failed after its insert
        let discarded = self.store.discard_unpublished_requests(booking.id).await?;
        if discarded > 0 {
            debug!(discarded, "Discarded requests of an earlier dispatch attempt");
        }

        let requests = BookingRequest::fan_out(booking.id, &candidates);
        self.store.insert_requests(&requests).await?;

        let outcome = match self
            .store
            .conditional_update(
                booking.id,
                &BookingGuard::status_is(booking.status),
                &BookingPatch::status(BookingStatus::Pending),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Nobody was notified; drop the batch so a retry starts clean
                if let Err(cleanup) = self.store.discard_unpublished_requests(booking.id).await {
                    warn!(error = %cleanup, "Failed to discard requests after a failed transition");
                }
                return Err(e.into());
            }
        };

        let pending = match outcome.booking {
            Some(pending) if outcome.rows_affected == 1 => pending,
            _ => {
                let current = self.load(booking.id).await?;
                // Cancelled between insert and transition: retire the fan-out
                if current.is_terminal() {
                    if let Err(e) = self.store.expire_outstanding_requests(booking.id, None).await {
                        warn!(error = %e, "Failed to expire requests of a booking that moved");
                    }
                }
                return Err(Self::stale_write_error(&current, BookingStatus::Pending));
            }
        };

        self.tracking
            .publish_status(pending.id, BookingStatus::Pending)
            .await;

        let summary = pending.summary();
        if let Err(e) = self.notifier.notify(&candidates, &summary).await {
            warn!(error = %e, "Provider notification failed; requests remain pending");
        }
        for provider_id in &candidates {
            self.tracking
                .publish_provider_event(*provider_id, ProviderFeedEvent::IncomingRequest(summary.clone()))
                .await;
        }

        self.record(
            pending.id,
            LifecyclePhase::Match,
            "providers_notified",
            json!({
                "candidates": candidates.len(),
                "provider_ids": candidates,
            }),
        )
        .await;

        info!(candidates = candidates.len(), "Booking dispatched");
        Ok(pending)
    }

    /// No-match path: `REQUESTED -> PENDING -> EXPIRED`.
    #[instrument(skip_all, fields(booking_id = %booking.id))]
    pub async fn expire_unmatched(&self, booking: &Booking) -> Result<Booking, DispatchError> {
        BookingStateMachine::validate(booking.status, BookingStatus::Pending)?;
        BookingStateMachine::validate(BookingStatus::Pending, BookingStatus::Expired)?;

        let outcome = self
            .store
            .conditional_update(
                booking.id,
                &BookingGuard::status_is(booking.status),
                &BookingPatch::status(BookingStatus::Pending),
            )
            .await?;
        if !outcome.success() {
            let current = self.load(booking.id).await?;
            return Err(Self::stale_write_error(&current, BookingStatus::Pending));
        }
        self.tracking
            .publish_status(booking.id, BookingStatus::Pending)
            .await;

        let outcome = self
            .store
            .conditional_update(
                booking.id,
                &BookingGuard::seeking_unbound(),
                &BookingPatch::status(BookingStatus::Expired).with_reason(REASON_NO_PROVIDERS),
            )
            .await?;
        let expired = match outcome.booking {
            Some(expired) if outcome.rows_affected == 1 => expired,
            _ => {
                let current = self.load(booking.id).await?;
                return Err(Self::stale_write_error(&current, BookingStatus::Expired));
            }
        };

        self.tracking
            .publish_status(booking.id, BookingStatus::Expired)
            .await;
        self.record(
            booking.id,
            LifecyclePhase::Expiry,
            "no_providers_available",
            json!({ "reason": REASON_NO_PROVIDERS }),
        )
        .await;

        info!("Booking expired with no candidates");
        Ok(expired)
    }

    // =========================================================================
    // Accept / reject
    // =========================================================================

    /// Race-safe accept. At most one provider wins per booking.
    ///
    /// The win is decided solely by the guarded update (`PENDING` and no
    /// provider bound). Losing is an `Ok` outcome. A winner calling again
    /// gets `accepted: true` back.
    #[instrument(skip_all, fields(booking_id = %booking_id, provider_id = %provider_id))]
    pub async fn accept(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<AcceptOutcome, DispatchError> {
        let booking = self.load(booking_id).await?;
        if booking.is_terminal() {
            warn!(status = %booking.status, "Accept on inactive booking");
            return Err(DispatchError::BookingNotActive {
                booking_id,
                status: booking.status,
            });
        }

        match booking.provider_id {
            Some(bound) if bound == provider_id => return Ok(AcceptOutcome::won()),
            Some(_) => {
                warn!("Accept lost: booking already bound");
                return Ok(AcceptOutcome::declined(AcceptDecline::AlreadyTaken));
            }
            None => {}
        }

        let request = self.store.find_request(booking_id, provider_id).await?;
        if !matches!(request, Some(ref r) if r.status == RequestStatus::Pending) {
            // A winner retires the other requests right after binding
            let current = self.load(booking_id).await?;
            return Ok(match current.provider_id {
                Some(bound) if bound == provider_id => AcceptOutcome::won(),
                Some(_) => {
                    warn!("Accept lost: booking already bound");
                    AcceptOutcome::declined(AcceptDecline::AlreadyTaken)
                }
                None if current.is_terminal() => {
                    return Err(DispatchError::BookingNotActive {
                        booking_id,
                        status: current.status,
                    })
                }
                None => {
                    warn!("Accept with no pending request");
                    AcceptOutcome::declined(AcceptDecline::Expired)
                }
            });
        }

        BookingStateMachine::validate(booking.status, BookingStatus::Confirmed)?;

        let outcome = self
            .store
            .conditional_update(
                booking_id,
                &BookingGuard::seeking_unbound(),
                &BookingPatch::status(BookingStatus::Confirmed).with_provider(provider_id),
            )
            .await?;

        if !outcome.success() {
            let current = self.load(booking_id).await?;
            if current.provider_id == Some(provider_id) {
                return Ok(AcceptOutcome::won());
            }
            if current.is_terminal() && current.provider_id.is_none() {
                return Err(DispatchError::BookingNotActive {
                    booking_id,
                    status: current.status,
                });
            }
            warn!("Accept lost the race");
            return Ok(AcceptOutcome::declined(AcceptDecline::AlreadyTaken));
        }

        // Won. Request cleanup below is best-effort.
        if let Err(e) = self
            .store
            .transition_request(booking_id, provider_id, RequestStatus::Pending, RequestStatus::Accepted)
            .await
        {
            warn!(error = %e, "Failed to mark winning request accepted");
        }
        self.retire_requests(booking_id, Some(provider_id)).await;

        if let Err(e) = self.tracking.open(booking_id, provider_id).await {
            warn!(error = %e, "Failed to open tracking channel");
        }
        self.tracking
            .publish_status(booking_id, BookingStatus::Confirmed)
            .await;

        self.record(
            booking_id,
            LifecyclePhase::Accept,
            "provider_accepted",
            json!({ "provider_id": provider_id }),
        )
        .await;

        info!("Booking accepted");
        Ok(AcceptOutcome::won())
    }

    /// Decline an offer. The last decline on a seeking booking expires it.
    #[instrument(skip_all, fields(booking_id = %booking_id, provider_id = %provider_id))]
    pub async fn reject(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<RejectOutcome, DispatchError> {
        let booking = self.load(booking_id).await?;
        if booking.is_terminal() {
            warn!(status = %booking.status, "Reject on inactive booking");
            return Err(DispatchError::BookingNotActive {
                booking_id,
                status: booking.status,
            });
        }

        let moved = self
            .store
            .transition_request(booking_id, provider_id, RequestStatus::Pending, RequestStatus::Rejected)
            .await?;
        if moved == 0 {
            warn!("Reject on a request that is no longer pending");
            return Err(DispatchError::StaleRequest {
                booking_id,
                provider_id,
            });
        }

        self.record(
            booking_id,
            LifecyclePhase::Match,
            "provider_rejected",
            json!({ "provider_id": provider_id }),
        )
        .await;

        let remaining = self.store.count_pending_requests(booking_id).await?;
        debug!(remaining, "Request rejected");

        if remaining == 0 && booking.provider_id.is_none() {
            let booking_expired = self.expire_pending(booking_id, REASON_ALL_DECLINED).await?;
            return Ok(RejectOutcome { booking_expired });
        }

        Ok(RejectOutcome {
            booking_expired: false,
        })
    }

    // =========================================================================
    // Expiry
    // =========================================================================

    /// Expire a booking that is still seeking. `Ok(false)` if it moved on first.
    pub async fn expire_pending(
        &self,
        booking_id: BookingId,
        reason: &str,
    ) -> Result<bool, DispatchError> {
        BookingStateMachine::validate(BookingStatus::Pending, BookingStatus::Expired)?;

        let outcome = self
            .store
            .conditional_update(
                booking_id,
                &BookingGuard::seeking_unbound(),
                &BookingPatch::status(BookingStatus::Expired).with_reason(reason),
            )
            .await?;
        if !outcome.success() {
            debug!(booking_id = %booking_id, "Booking no longer pending; not expired");
            return Ok(false);
        }

        self.retire_requests(booking_id, None).await;
        self.tracking
            .publish_status(booking_id, BookingStatus::Expired)
            .await;
        self.record(
            booking_id,
            LifecyclePhase::Expiry,
            "booking_expired",
            json!({ "reason": reason }),
        )
        .await;

        info!(booking_id = %booking_id, reason, "Booking expired");
        Ok(true)
    }

    /// Expire every unbound `PENDING` booking created before `cutoff`.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, DispatchError> {
        let stale = self
            .store
            .find_pending_before(cutoff, self.config.sweep_batch_size)
            .await?;

        let mut expired = 0;
        for booking in stale {
            match self.expire_pending(booking.id, REASON_TIMED_OUT).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => warn!(booking_id = %booking.id, error = %e, "Failed to expire stale booking"),
            }
        }

        if expired > 0 {
            info!(expired, "Expiry sweep complete");
        } else {
            debug!("Expiry sweep found nothing to expire");
        }
        Ok(expired)
    }

    /// Sweep using the configured pending timeout.
    pub async fn sweep(&self) -> Result<usize, DispatchError> {
        let timeout = chrono::Duration::from_std(self.config.pending_timeout).map_err(|e| {
            DispatchError::InvalidRequest(format!("pending timeout out of range: {}", e))
        })?;
        self.expire_stale(Utc::now() - timeout).await
    }

    // =========================================================================
    // Status changes after acceptance
    // =========================================================================

    /// Move a booking to `to` through the transition table.
    ///
    /// The write is guarded on the status (and bound provider) read in
    /// `booking`, so a concurrent change makes this call fail rather than
    /// overwrite it.
    #[instrument(skip_all, fields(booking_id = %booking.id, from = %booking.status, to = %to, actor = %actor))]
    pub async fn update_status(
        &self,
        booking: &Booking,
        to: BookingStatus,
        actor: &Actor,
    ) -> Result<Booking, DispatchError> {
        BookingStateMachine::validate(booking.status, to)?;

        let mut guard = BookingGuard::status_is(booking.status);
        if let Some(provider_id) = booking.provider_id {
            guard = guard.with_provider(provider_id);
        }
        let mut patch = BookingPatch::status(to);
        if to == BookingStatus::Cancelled {
            patch = patch.with_reason(format!("cancelled by {}", actor.label()));
        }

        let outcome = self.store.conditional_update(booking.id, &guard, &patch).await?;
        let updated = match outcome.booking {
            Some(updated) if outcome.rows_affected == 1 => updated,
            _ => {
                let current = self.load(booking.id).await?;
                warn!(current = %current.status, "Status update lost to a concurrent change");
                return Err(if BookingStateMachine::can_transition(current.status, to) {
                    DispatchError::InvalidRequest(format!(
                        "booking changed to {} concurrently; retry",
                        current.status
                    ))
                } else {
                    DispatchError::IllegalTransition {
                        from: current.status,
                        to,
                    }
                });
            }
        };

        self.after_status_change(booking.status, &updated, false).await;
        self.record(
            updated.id,
            LifecyclePhase::Status,
            "status_changed",
            json!({
                "from": booking.status,
                "to": to,
                "actor": actor.label(),
            }),
        )
        .await;

        info!("Booking status updated");
        Ok(updated)
    }

    /// Admin escape hatch around the transition table.
    ///
    /// Still refuses to leave a terminal state, to reach a provider-bound
    /// status without a provider, or to go back to a pre-acceptance status
    /// with one bound.
    #[instrument(skip_all, fields(booking_id = %booking_id, to = %to, admin_id = %admin_id))]
    pub async fn override_status(
        &self,
        booking_id: BookingId,
        to: BookingStatus,
        admin_id: AdminId,
        reason: &str,
    ) -> Result<Booking, DispatchError> {
        let booking = self.load(booking_id).await?;

        if booking.is_terminal() {
            return Err(DispatchError::BookingNotActive {
                booking_id,
                status: booking.status,
            });
        }
        if booking.status == to {
            return Err(DispatchError::InvalidRequest(format!(
                "booking is already {}",
                to
            )));
        }
        if to.requires_provider() && booking.provider_id.is_none() {
            return Err(DispatchError::InvalidRequest(format!(
                "cannot move an unbound booking to {}",
                to
            )));
        }
        if to.is_pre_acceptance() && booking.provider_id.is_some() {
            return Err(DispatchError::InvalidRequest(format!(
                "cannot move a bound booking back to {}",
                to
            )));
        }

        warn!(
            admin_override = true,
            from = %booking.status,
            to = %to,
            admin_id = %admin_id,
            reason,
            "Admin status override"
        );

        let outcome = self
            .store
            .conditional_update(
                booking_id,
                &BookingGuard::status_is(booking.status),
                &BookingPatch::status(to).with_reason(reason),
            )
            .await?;
        let updated = match outcome.booking {
            Some(updated) if outcome.rows_affected == 1 => updated,
            _ => {
                return Err(DispatchError::InvalidRequest(
                    "booking changed concurrently; retry".to_string(),
                ))
            }
        };

        self.after_status_change(booking.status, &updated, true).await;
        self.record(
            booking_id,
            LifecyclePhase::Override,
            "status_overridden",
            json!({
                "from": booking.status,
                "to": to,
                "admin_id": admin_id,
                "reason": reason,
            }),
        )
        .await;

        Ok(updated)
    }

    async fn after_status_change(&self, from: BookingStatus, updated: &Booking, is_override: bool) {
        if from.is_pre_acceptance() && !updated.status.is_pre_acceptance() {
            // Leaving the seeking phase without an accept (cancel, expire, override)
            let except = updated.provider_id;
            self.retire_requests(updated.id, except).await;
            if let Some(provider_id) = updated.provider_id {
                if let Err(e) = self.tracking.open(updated.id, provider_id).await {
                    warn!(error = %e, "Failed to open tracking channel");
                }
            }
        }

        if is_override {
            self.tracking
                .publish_override_status(updated.id, updated.status)
                .await;
        } else {
            self.tracking.publish_status(updated.id, updated.status).await;
        }
    }

    /// Expire outstanding requests and withdraw the offers from provider feeds.
    async fn retire_requests(&self, booking_id: BookingId, except: Option<ProviderId>) {
        let outstanding: Vec<ProviderId> = match self.store.list_requests(booking_id).await {
            Ok(requests) => requests
                .into_iter()
                .filter(|r| r.status == RequestStatus::Pending && Some(r.provider_id) != except)
                .map(|r| r.provider_id)
                .collect(),
            Err(e) => {
                warn!(booking_id = %booking_id, error = %e, "Failed to list requests");
                Vec::new()
            }
        };

        if let Err(e) = self
            .store
            .expire_outstanding_requests(booking_id, except)
            .await
        {
            warn!(booking_id = %booking_id, error = %e, "Failed to expire outstanding requests");
        }

        for provider_id in outstanding {
            self.tracking
                .publish_provider_event(provider_id, ProviderFeedEvent::RequestWithdrawn { booking_id })
                .await;
        }
    }
}
