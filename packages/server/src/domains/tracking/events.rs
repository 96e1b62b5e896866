use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{BookingId, GeoPoint};
use crate::domains::bookings::models::{BookingStatus, BookingSummary};

/// A provider position as forwarded to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationUpdate {
    pub fn now(point: GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            timestamp: Utc::now(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Events pushed on a booking channel, in mutation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    Status {
        booking_id: BookingId,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
    Location(LocationUpdate),
    /// Last event on a channel. Sent after the terminal status.
    Closed { booking_id: BookingId },
}

impl TrackingEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            TrackingEvent::Status { .. } => "status",
            TrackingEvent::Location(_) => "location",
            TrackingEvent::Closed { .. } => "closed",
        }
    }
}

/// Events on a provider's incoming-request feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderFeedEvent {
    IncomingRequest(BookingSummary),
    /// The offer is gone (taken by someone else, expired or cancelled).
    RequestWithdrawn { booking_id: BookingId },
}

impl ProviderFeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderFeedEvent::IncomingRequest(_) => "incoming_request",
            ProviderFeedEvent::RequestWithdrawn { .. } => "request_withdrawn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_wire_format() {
        let booking_id = BookingId::new();
        let event = TrackingEvent::Status {
            booking_id,
            status: BookingStatus::EnRoute,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "EN_ROUTE");
        assert_eq!(event.name(), "status");
    }

    #[test]
    fn test_location_event_is_flat() {
        let event = TrackingEvent::Location(LocationUpdate::now(GeoPoint::new(19.07, 72.87)));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "location");
        assert_eq!(json["lat"], 19.07);
        assert_eq!(json["lng"], 72.87);
    }
}
