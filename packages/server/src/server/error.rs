//! Maps dispatch errors to HTTP responses.
//!
//! Bodies look like `{"error": {"code": 409, "kind": "stale_request", "message": "..."}}`
//! so clients can branch on `kind` without parsing messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::domains::bookings::DispatchError;

#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::BookingNotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Forbidden(_) | DispatchError::UnauthorizedPublisher { .. } => {
            StatusCode::FORBIDDEN
        }
        DispatchError::InvalidRequest(_) | DispatchError::NoCandidates { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DispatchError::IllegalTransition { .. }
        | DispatchError::StaleRequest { .. }
        | DispatchError::BookingNotActive { .. } => StatusCode::CONFLICT,
        DispatchError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.0, "Request failed on a transient error");
        }
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
