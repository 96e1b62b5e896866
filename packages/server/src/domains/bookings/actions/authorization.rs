//! Who may move a booking where.
//!
//! Legality (the transition table) is checked separately; this only decides
//! whether the caller is allowed to request a legal move.

use crate::common::Actor;
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::models::{Booking, BookingStatus};

/// Statuses the bound provider may set directly.
const PROVIDER_TARGETS: [BookingStatus; 4] = [
    BookingStatus::EnRoute,
    BookingStatus::InProgress,
    BookingStatus::Completed,
    BookingStatus::Cancelled,
];

pub fn authorize_status_update(
    actor: &Actor,
    booking: &Booking,
    to: BookingStatus,
) -> Result<(), DispatchError> {
    match actor {
        Actor::Admin(_) | Actor::System => Ok(()),
        Actor::Customer(customer_id) => {
            if *customer_id != booking.customer_id {
                Err(DispatchError::Forbidden(
                    "not the customer on this booking".to_string(),
                ))
            } else if to != BookingStatus::Cancelled {
                Err(DispatchError::Forbidden(
                    "customers may only cancel a booking".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        Actor::Provider(provider_id) => {
            if booking.provider_id != Some(*provider_id) {
                Err(DispatchError::Forbidden(
                    "not the provider bound to this booking".to_string(),
                ))
            } else if !PROVIDER_TARGETS.contains(&to) {
                Err(DispatchError::Forbidden(format!(
                    "providers may not set {}",
                    to
                )))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AdminId, CustomerId, ProviderId};
    use crate::domains::bookings::models::{DeliveryMode, NewBooking};

    fn confirmed(customer_id: CustomerId, provider_id: ProviderId) -> Booking {
        let mut booking = Booking::requested(
            NewBooking::builder()
                .customer_id(customer_id)
                .category("cleaning")
                .delivery_mode(DeliveryMode::Local)
                .build(),
        );
        booking.status = BookingStatus::Confirmed;
        booking.provider_id = Some(provider_id);
        booking
    }

    #[test]
    fn test_customer_may_only_cancel_own_booking() {
        let customer = CustomerId::new();
        let booking = confirmed(customer, ProviderId::new());

        assert!(authorize_status_update(&Actor::Customer(customer), &booking, BookingStatus::Cancelled).is_ok());
        assert!(authorize_status_update(&Actor::Customer(customer), &booking, BookingStatus::EnRoute).is_err());
        assert!(authorize_status_update(
            &Actor::Customer(CustomerId::new()),
            &booking,
            BookingStatus::Cancelled
        )
        .is_err());
    }

    #[test]
    fn test_only_bound_provider_moves_job() {
        let provider = ProviderId::new();
        let booking = confirmed(CustomerId::new(), provider);

        for to in PROVIDER_TARGETS {
            assert!(authorize_status_update(&Actor::Provider(provider), &booking, to).is_ok());
        }
        assert!(authorize_status_update(&Actor::Provider(provider), &booking, BookingStatus::Expired).is_err());

        let err = authorize_status_update(
            &Actor::Provider(ProviderId::new()),
            &booking,
            BookingStatus::EnRoute,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));
    }

    #[test]
    fn test_admin_and_system_are_unrestricted() {
        let booking = confirmed(CustomerId::new(), ProviderId::new());
        assert!(authorize_status_update(&Actor::Admin(AdminId::new()), &booking, BookingStatus::Cancelled).is_ok());
        assert!(authorize_status_update(&Actor::System, &booking, BookingStatus::EnRoute).is_ok());
    }
}
