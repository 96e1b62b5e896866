//! Booking query actions

use crate::common::BookingId;
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::models::{Booking, BookingRequest, BookingStatus, LifecycleEvent};
use crate::domains::tracking::{LocationUpdate, Subscription, SubscriptionHandle};
use crate::kernel::ServerDeps;

pub async fn get_booking(booking_id: BookingId, deps: &ServerDeps) -> Result<Booking, DispatchError> {
    deps.store
        .get(booking_id)
        .await?
        .ok_or(DispatchError::BookingNotFound(booking_id))
}

/// Fan-out requests for a booking, in candidate order
pub async fn list_booking_requests(
    booking_id: BookingId,
    deps: &ServerDeps,
) -> Result<Vec<BookingRequest>, DispatchError> {
    Ok(deps.store.list_requests(booking_id).await?)
}

/// Lifecycle log for a booking, oldest first
pub async fn booking_history(
    booking_id: BookingId,
    deps: &ServerDeps,
) -> Result<Vec<LifecycleEvent>, DispatchError> {
    Ok(deps.store.lifecycle_events(booking_id).await?)
}

/// Subscribe to a booking's live channel.
///
/// Subscribes before reading the booking so a terminal transition racing
/// this call is either seen here or delivered to the new subscriber.
pub async fn subscribe_to_booking(
    booking_id: BookingId,
    deps: &ServerDeps,
) -> Result<Subscription, DispatchError> {
    let subscription = deps.tracking.subscribe(booking_id).await;

    let booking = match deps.store.get(booking_id).await {
        Ok(Some(booking)) => booking,
        Ok(None) => {
            deps.tracking.close(booking_id).await;
            return Err(DispatchError::BookingNotFound(booking_id));
        }
        Err(e) => return Err(e.into()),
    };

    if booking.is_terminal() {
        deps.tracking.close(booking_id).await;
        return Err(DispatchError::BookingNotActive {
            booking_id,
            status: booking.status,
        });
    }

    if let (Some(provider_id), true) = (booking.provider_id, booking.status.is_trackable()) {
        deps.tracking.open(booking_id, provider_id).await?;
    }

    Ok(subscription)
}

/// Callback form of `subscribe_to_booking`. Drop or `unsubscribe()` the
/// handle to stop receiving.
pub async fn subscribe_to_booking_with<S, L>(
    booking_id: BookingId,
    on_status: S,
    on_location: L,
    deps: &ServerDeps,
) -> Result<SubscriptionHandle, DispatchError>
where
    S: Fn(BookingStatus) + Send + 'static,
    L: Fn(LocationUpdate) + Send + 'static,
{
    let subscription = subscribe_to_booking(booking_id, deps).await?;
    Ok(subscription.with_callbacks(on_status, on_location))
}
