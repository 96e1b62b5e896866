//! Booking REST endpoints.
//!
//! Thin wrappers over the booking actions. Callers are assumed authenticated
//! upstream; the acting party is named in the request body.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::common::{Actor, AdminId, BookingId, GeoPoint, ProviderId};
use crate::domains::bookings::actions;
use crate::domains::bookings::{Booking, BookingRequest, BookingStatus, LifecycleEvent, NewBooking};
use crate::domains::dispatch::{AcceptOutcome, RejectOutcome};
use crate::server::app::AppState;
use crate::server::error::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ProviderBody {
    pub provider_id: ProviderId,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: BookingStatus,
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub status: BookingStatus,
    pub admin_id: AdminId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub provider_id: ProviderId,
    pub lat: f64,
    pub lng: f64,
}

pub async fn create_booking_handler(
    Extension(state): Extension<AppState>,
    Json(input): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let booking = actions::request_booking(input, &state.server_deps).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Booking> {
    Ok(Json(actions::get_booking(booking_id, &state.server_deps).await?))
}

/// Retry matching for a booking left in `REQUESTED` by a transient failure
pub async fn dispatch_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Booking> {
    Ok(Json(actions::dispatch_booking(booking_id, &state.server_deps).await?))
}

pub async fn booking_requests_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Vec<BookingRequest>> {
    Ok(Json(
        actions::list_booking_requests(booking_id, &state.server_deps).await?,
    ))
}

pub async fn booking_history_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Vec<LifecycleEvent>> {
    Ok(Json(actions::booking_history(booking_id, &state.server_deps).await?))
}

/// Losing an accept race is a normal answer, not an error
pub async fn accept_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<ProviderBody>,
) -> ApiResult<AcceptOutcome> {
    Ok(Json(
        actions::accept_booking(booking_id, body.provider_id, &state.server_deps).await?,
    ))
}

pub async fn reject_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<ProviderBody>,
) -> ApiResult<RejectOutcome> {
    Ok(Json(
        actions::reject_booking(booking_id, body.provider_id, &state.server_deps).await?,
    ))
}

pub async fn update_status_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Booking> {
    Ok(Json(
        actions::update_booking_status(booking_id, body.status, body.actor, &state.server_deps)
            .await?,
    ))
}

pub async fn override_status_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<OverrideBody>,
) -> ApiResult<Booking> {
    Ok(Json(
        actions::override_booking_status(
            booking_id,
            body.status,
            body.admin_id,
            &body.reason,
            &state.server_deps,
        )
        .await?,
    ))
}

pub async fn location_handler(
    Extension(state): Extension<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<LocationBody>,
) -> ApiResult<Value> {
    let outcome = actions::publish_provider_location(
        booking_id,
        body.provider_id,
        GeoPoint::new(body.lat, body.lng),
        &state.server_deps,
    )
    .await?;
    Ok(Json(json!({ "outcome": outcome })))
}
