//! Test fixtures for bookings and directory entries.

use dispatch_core::common::{CustomerId, GeoPoint, ProviderId};
use dispatch_core::domains::bookings::{DeliveryMode, NewBooking};
use dispatch_core::kernel::DirectoryEntry;

/// Mumbai, used by the plumbing scenarios
pub const MUMBAI: GeoPoint = GeoPoint {
    lat: 19.076,
    lng: 72.877,
};

pub fn plumbing_booking(customer_id: CustomerId) -> NewBooking {
    NewBooking::builder()
        .customer_id(customer_id)
        .category("plumbing")
        .delivery_mode(DeliveryMode::Local)
        .location(MUMBAI)
        .build()
}

pub fn tutoring_booking(customer_id: CustomerId) -> NewBooking {
    NewBooking::builder()
        .customer_id(customer_id)
        .category("tutoring")
        .delivery_mode(DeliveryMode::Online)
        .build()
}

/// LOCAL booking with nothing to search around
pub fn unlocated_booking(customer_id: CustomerId) -> NewBooking {
    NewBooking::builder()
        .customer_id(customer_id)
        .category("plumbing")
        .delivery_mode(DeliveryMode::Local)
        .build()
}

pub fn provider_ids(count: usize) -> Vec<ProviderId> {
    (0..count).map(|_| ProviderId::new()).collect()
}

/// Active entries, nearest first, 1km apart
pub fn nearby_entries(providers: &[ProviderId]) -> Vec<DirectoryEntry> {
    providers
        .iter()
        .enumerate()
        .map(|(i, id)| DirectoryEntry::active(*id, Some(1.0 + i as f64)))
        .collect()
}
