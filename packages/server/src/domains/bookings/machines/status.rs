use tracing::warn;

use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::models::BookingStatus;

use BookingStatus::*;

/// The transition table for booking status.
///
/// Every status write in the crate (dispatch, accept, provider/customer
/// updates, the expiry sweep) asks this table first. Admin overrides are the
/// only path that skips it, and they log themselves as overrides.
///
/// ```text
/// REQUESTED ─► PENDING ─► CONFIRMED ─► EN_ROUTE ─► IN_PROGRESS ─► COMPLETED
///     │           │  └──► EXPIRED      │   └────────────►│
///     └───────────┴────────────────────┴──► CANCELLED ◄──┘
/// ```
pub struct BookingStateMachine;

impl BookingStateMachine {
    /// Statuses reachable in one step from `from`.
    pub fn allowed_from(from: BookingStatus) -> &'static [BookingStatus] {
        match from {
            Requested => &[Pending, Cancelled],
            Pending => &[Confirmed, Cancelled, Expired],
            Confirmed => &[EnRoute, InProgress, Cancelled],
            EnRoute => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled | Expired => &[],
        }
    }

    pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
        Self::allowed_from(from).contains(&to)
    }

    /// `Ok` if legal, otherwise an `IllegalTransition` naming both states.
    pub fn validate(from: BookingStatus, to: BookingStatus) -> Result<(), DispatchError> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            warn!(from = %from, to = %to, "Rejected illegal booking transition");
            Err(DispatchError::IllegalTransition { from, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [Requested, Pending, Confirmed, EnRoute, InProgress, Completed];
        for pair in path.windows(2) {
            assert!(
                BookingStateMachine::can_transition(pair[0], pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_confirmed_may_skip_en_route() {
        assert!(BookingStateMachine::can_transition(Confirmed, InProgress));
    }

    #[test]
    fn test_cancel_reachable_from_every_non_terminal_state() {
        for from in BookingStatus::ALL {
            assert_eq!(
                BookingStateMachine::can_transition(from, Cancelled),
                !from.is_terminal(),
                "cancel from {}",
                from
            );
        }
    }

    #[test]
    fn test_expired_reachable_only_from_pending() {
        for from in BookingStatus::ALL {
            assert_eq!(
                BookingStateMachine::can_transition(from, Expired),
                from == Pending,
                "expire from {}",
                from
            );
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [Completed, Cancelled, Expired] {
            for to in BookingStatus::ALL {
                assert!(BookingStateMachine::validate(from, to).is_err());
            }
        }
    }

    #[test]
    fn test_table_matches_exhaustive_pairs() {
        let legal = [
            (Requested, Pending),
            (Requested, Cancelled),
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Pending, Expired),
            (Confirmed, EnRoute),
            (Confirmed, InProgress),
            (Confirmed, Cancelled),
            (EnRoute, InProgress),
            (EnRoute, Cancelled),
            (InProgress, Completed),
            (InProgress, Cancelled),
        ];
        for from in BookingStatus::ALL {
            for to in BookingStatus::ALL {
                assert_eq!(
                    BookingStateMachine::can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_validate_reports_states() {
        match BookingStateMachine::validate(Completed, EnRoute) {
            Err(DispatchError::IllegalTransition { from, to }) => {
                assert_eq!(from, Completed);
                assert_eq!(to, EnRoute);
            }
            other => panic!("expected IllegalTransition, got {:?}", other),
        }
    }
}
