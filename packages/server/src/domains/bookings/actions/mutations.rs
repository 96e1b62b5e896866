//! Booking mutation actions
//!
//! Every booking write the outside world can trigger goes through these
//! functions. They check input and permissions, then hand the state change to
//! the dispatch coordinator, which owns the guarded writes.

use serde_json::json;
use tracing::{info, warn};

use crate::common::{Actor, AdminId, BookingId, GeoPoint, ProviderId};
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::machines::BookingStateMachine;
use crate::domains::bookings::models::{
    Booking, BookingStatus, DeliveryMode, LifecycleEvent, LifecyclePhase, NewBooking,
};
use crate::domains::dispatch::{AcceptOutcome, RejectOutcome};
use crate::domains::tracking::PublishOutcome;
use crate::kernel::ServerDeps;

use super::authorization::authorize_status_update;

async fn load(booking_id: BookingId, deps: &ServerDeps) -> Result<Booking, DispatchError> {
    deps.store
        .get(booking_id)
        .await?
        .ok_or(DispatchError::BookingNotFound(booking_id))
}

fn validate_new_booking(input: &NewBooking) -> Result<(), DispatchError> {
    if input.category.trim().is_empty() {
        return Err(DispatchError::InvalidRequest(
            "category is required".to_string(),
        ));
    }
    if let Some(point) = input.location {
        if !point.is_valid() {
            return Err(DispatchError::InvalidRequest(format!(
                "invalid coordinates ({}, {})",
                point.lat, point.lng
            )));
        }
    }
    if input.delivery_mode == DeliveryMode::Local
        && input.location.is_none()
        && input.city.as_deref().map_or(true, |c| c.trim().is_empty())
    {
        // Accepted; matching will come back empty and the booking expires
        info!(customer_id = %input.customer_id, "LOCAL booking without location or city");
    }
    Ok(())
}

/// Create a booking in `REQUESTED` and dispatch it.
///
/// Returns the `PENDING` booking on success. With no candidates the booking
/// is expired and `NoCandidates` is returned. A transient failure during
/// matching leaves the booking in `REQUESTED`; retry with `dispatch_booking`.
pub async fn request_booking(input: NewBooking, deps: &ServerDeps) -> Result<Booking, DispatchError> {
    validate_new_booking(&input)?;

    let booking = deps.store.insert_booking(&Booking::requested(input)).await?;
    info!(
        booking_id = %booking.id,
        customer_id = %booking.customer_id,
        category = %booking.category,
        "Booking requested"
    );

    let event = LifecycleEvent::new(
        booking.id,
        LifecyclePhase::Request,
        "booking_requested",
        json!({
            "category": booking.category,
            "delivery_mode": booking.delivery_mode,
            "city": booking.city,
        }),
    );
    if let Err(e) = deps.store.record_lifecycle_event(&event).await {
        warn!(booking_id = %booking.id, error = %e, "Failed to record lifecycle event");
    }

    dispatch_requested(booking, deps).await
}

/// Match and dispatch a booking still in `REQUESTED`.
pub async fn dispatch_booking(booking_id: BookingId, deps: &ServerDeps) -> Result<Booking, DispatchError> {
    let booking = load(booking_id, deps).await?;
    BookingStateMachine::validate(booking.status, BookingStatus::Pending)?;
    dispatch_requested(booking, deps).await
}

async fn dispatch_requested(booking: Booking, deps: &ServerDeps) -> Result<Booking, DispatchError> {
    let candidates = deps.match_engine.find_candidates(&booking).await?;

    if candidates.is_empty() {
        deps.coordinator.expire_unmatched(&booking).await?;
        return Err(DispatchError::NoCandidates {
            booking_id: booking.id,
        });
    }

    deps.coordinator.dispatch(&booking, &candidates).await
}

pub async fn accept_booking(
    booking_id: BookingId,
    provider_id: ProviderId,
    deps: &ServerDeps,
) -> Result<AcceptOutcome, DispatchError> {
    deps.coordinator.accept(booking_id, provider_id).await
}

pub async fn reject_booking(
    booking_id: BookingId,
    provider_id: ProviderId,
    deps: &ServerDeps,
) -> Result<RejectOutcome, DispatchError> {
    deps.coordinator.reject(booking_id, provider_id).await
}

/// Move a booking through the transition table on behalf of `actor`.
///
/// Illegal moves fail with `IllegalTransition` before permissions are
/// considered. `CONFIRMED` is only reachable through `accept_booking`.
pub async fn update_booking_status(
    booking_id: BookingId,
    status: BookingStatus,
    actor: Actor,
    deps: &ServerDeps,
) -> Result<Booking, DispatchError> {
    let booking = load(booking_id, deps).await?;

    BookingStateMachine::validate(booking.status, status)?;
    if status == BookingStatus::Confirmed {
        return Err(DispatchError::InvalidRequest(
            "bookings are confirmed by accepting them".to_string(),
        ));
    }
    authorize_status_update(&actor, &booking, status)?;

    deps.coordinator.update_status(&booking, status, &actor).await
}

/// Admin override outside the transition table. Requires a reason.
pub async fn override_booking_status(
    booking_id: BookingId,
    status: BookingStatus,
    admin_id: AdminId,
    reason: &str,
    deps: &ServerDeps,
) -> Result<Booking, DispatchError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DispatchError::InvalidRequest(
            "an override needs a reason".to_string(),
        ));
    }
    deps.coordinator
        .override_status(booking_id, status, admin_id, reason)
        .await
}

/// Forward the bound provider's position to the booking's subscribers.
///
/// The binding and the status come from the store, so a channel lost to a
/// restart is reopened for the bound provider.
pub async fn publish_provider_location(
    booking_id: BookingId,
    provider_id: ProviderId,
    point: GeoPoint,
    deps: &ServerDeps,
) -> Result<PublishOutcome, DispatchError> {
    let booking = load(booking_id, deps).await?;

    if booking.provider_id != Some(provider_id) {
        warn!(booking_id = %booking_id, provider_id = %provider_id, "Location from unbound provider");
        return Err(DispatchError::UnauthorizedPublisher {
            booking_id,
            provider_id,
        });
    }
    if !booking.status.is_trackable() {
        return Err(DispatchError::BookingNotActive {
            booking_id,
            status: booking.status,
        });
    }

    deps.tracking.open(booking_id, provider_id).await?;

    // The booking may have finished after the read above, and its final
    // status publish would not have seen the channel opened here
    let current = load(booking_id, deps).await?;
    if !current.status.is_trackable() {
        deps.tracking.close(booking_id).await;
        return Err(DispatchError::BookingNotActive {
            booking_id,
            status: current.status,
        });
    }

    deps.tracking
        .publish_location(booking_id, provider_id, point)
        .await
}
