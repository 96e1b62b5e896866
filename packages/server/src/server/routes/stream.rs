//! SSE streaming endpoints.
//!
//! GET /api/bookings/:id/stream
//! GET /api/providers/:id/requests/stream
//!
//! EventSource clients reconnect on their own; a reconnect to a finished
//! booking gets a 409 instead of a stream.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, Sse},
};

use crate::common::{BookingId, ProviderId};
use crate::domains::bookings::actions;
use crate::kernel::sse::{booking_stream, provider_feed_stream};
use crate::server::app::AppState;
use crate::server::error::ApiError;

/// Live status and location for one booking. Ends after the `closed` event.
pub async fn booking_stream_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = actions::subscribe_to_booking(booking_id, &state.server_deps).await?;
    Ok(booking_stream(subscription))
}

/// Incoming requests and withdrawals for one provider
pub async fn provider_feed_handler(
    Extension(state): Extension<AppState>,
    Path(provider_id): Path<ProviderId>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state
        .server_deps
        .tracking
        .subscribe_provider_requests(provider_id)
        .await;
    provider_feed_stream(rx)
}
