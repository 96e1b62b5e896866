use thiserror::Error;

use crate::common::{BookingId, ProviderId};
use crate::domains::bookings::models::BookingStatus;

/// Failures surfaced by the dispatch core.
///
/// Only `Transient` is worth retrying. Everything else is a typed domain
/// outcome the caller is expected to branch on. Losing an accept race is not
/// here: it comes back as `AcceptOutcome` with reason `already taken`.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Directory, store or channel infrastructure failed (timeout, connectivity).
    #[error("Transient infrastructure error: {0}")]
    Transient(#[from] anyhow::Error),

    #[error("No providers available for booking {booking_id}")]
    NoCandidates { booking_id: BookingId },

    #[error("Illegal booking transition from {from} to {to}")]
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Request for booking {booking_id} is no longer pending for provider {provider_id}")]
    StaleRequest {
        booking_id: BookingId,
        provider_id: ProviderId,
    },

    #[error("Provider {provider_id} is not the bound provider for booking {booking_id}")]
    UnauthorizedPublisher {
        booking_id: BookingId,
        provider_id: ProviderId,
    },

    #[error("Booking {booking_id} is no longer active (status {status})")]
    BookingNotActive {
        booking_id: BookingId,
        status: BookingStatus,
    },

    #[error("Booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }

    /// Machine-readable kind for API bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Transient(_) => "transient",
            DispatchError::NoCandidates { .. } => "no_candidates",
            DispatchError::IllegalTransition { .. } => "illegal_transition",
            DispatchError::StaleRequest { .. } => "stale_request",
            DispatchError::UnauthorizedPublisher { .. } => "unauthorized_publisher",
            DispatchError::BookingNotActive { .. } => "booking_not_active",
            DispatchError::BookingNotFound(_) => "not_found",
            DispatchError::Forbidden(_) => "forbidden",
            DispatchError::InvalidRequest(_) => "invalid_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(DispatchError::Transient(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!DispatchError::NoCandidates {
            booking_id: BookingId::new()
        }
        .is_retryable());
        assert!(!DispatchError::StaleRequest {
            booking_id: BookingId::new(),
            provider_id: ProviderId::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_illegal_transition_names_both_states() {
        let err = DispatchError::IllegalTransition {
            from: BookingStatus::Completed,
            to: BookingStatus::EnRoute,
        };
        assert_eq!(
            err.to_string(),
            "Illegal booking transition from COMPLETED to EN_ROUTE"
        );
        assert_eq!(err.kind(), "illegal_transition");
    }
}
