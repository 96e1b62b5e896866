//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::{
    accept_handler, booking_history_handler, booking_requests_handler, booking_stream_handler,
    create_booking_handler, dispatch_handler, get_booking_handler, health_handler,
    location_handler, override_status_handler, provider_feed_handler, reject_handler,
    update_status_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub server_deps: ServerDeps,
    /// Absent when running on the in-memory store.
    pub db_pool: Option<PgPool>,
}

/// Build the Axum application router
pub fn build_app(server_deps: ServerDeps, db_pool: Option<PgPool>) -> Router {
    let app_state = AppState {
        server_deps,
        db_pool,
    };

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        // Bookings
        .route("/api/bookings", post(create_booking_handler))
        .route("/api/bookings/:id", get(get_booking_handler))
        .route("/api/bookings/:id/dispatch", post(dispatch_handler))
        .route("/api/bookings/:id/requests", get(booking_requests_handler))
        .route("/api/bookings/:id/history", get(booking_history_handler))
        .route("/api/bookings/:id/accept", post(accept_handler))
        .route("/api/bookings/:id/reject", post(reject_handler))
        .route("/api/bookings/:id/status", post(update_status_handler))
        .route("/api/bookings/:id/override", post(override_status_handler))
        .route("/api/bookings/:id/location", post(location_handler))
        // Live streams
        .route("/api/bookings/:id/stream", get(booking_stream_handler))
        .route("/api/providers/:id/requests/stream", get(provider_feed_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
