use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::common::ProviderId;
use crate::config::MatchConfig;
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::models::{Booking, DeliveryMode};
use crate::kernel::{BaseProviderDirectory, DirectoryEntry, DirectoryQuery};

/// Resolves a booking into an ordered list of candidate providers.
///
/// Strategy:
/// 1. LOCAL with a usable location: radius search around it
/// 2. LOCAL without one: city search if the booking names a city, else nothing
/// 3. ONLINE: everyone offering the category, location ignored
///
/// Inactive entries are dropped, the rest ordered nearest-first with unknown
/// distances last in directory order. Read-only.
#[derive(Clone)]
pub struct MatchEngine {
    directory: Arc<dyn BaseProviderDirectory>,
    config: MatchConfig,
}

impl MatchEngine {
    pub fn new(directory: Arc<dyn BaseProviderDirectory>, config: MatchConfig) -> Self {
        Self { directory, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Build the directory query for a booking, or `None` when there is
    /// nothing to search by.
    pub fn query_for(&self, booking: &Booking) -> Option<DirectoryQuery> {
        let base = DirectoryQuery {
            category: booking.category.clone(),
            delivery_mode: booking.delivery_mode,
            location: None,
            radius_km: None,
            city: None,
            limit: None,
        };

        match booking.delivery_mode {
            DeliveryMode::Online => Some(DirectoryQuery {
                limit: Some(self.config.online_limit),
                ..base
            }),
            DeliveryMode::Local => match booking.location().filter(|p| p.is_usable()) {
                Some(point) => Some(DirectoryQuery {
                    location: Some(point),
                    radius_km: Some(self.config.radius_km),
                    ..base
                }),
                None => booking
                    .city
                    .as_deref()
                    .map(str::trim)
                    .filter(|city| !city.is_empty())
                    .map(|city| DirectoryQuery {
                        city: Some(city.to_string()),
                        ..base
                    }),
            },
        }
    }

    #[instrument(skip(self, booking), fields(booking_id = %booking.id, category = %booking.category))]
    pub async fn find_candidates(&self, booking: &Booking) -> Result<Vec<ProviderId>, DispatchError> {
        let Some(query) = self.query_for(booking) else {
            info!("No location or city to match on");
            return Ok(Vec::new());
        };

        let entries = self.directory.query(&query).await?;
        debug!(returned = entries.len(), "Directory query complete");

        let candidates = rank(entries);
        info!(candidates = candidates.len(), "Matched candidates");
        Ok(candidates)
    }
}

/// Active entries, nearest first, unknown distances last, duplicates removed.
fn rank(entries: Vec<DirectoryEntry>) -> Vec<ProviderId> {
    let mut active: Vec<DirectoryEntry> = entries.into_iter().filter(|e| e.is_active).collect();

    // Stable, so ties and unknown distances keep directory order
    active.sort_by(|a, b| match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut seen = HashSet::new();
    active
        .into_iter()
        .filter(|e| seen.insert(e.provider_id))
        .map(|e| e.provider_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CustomerId, GeoPoint};
    use crate::domains::bookings::models::NewBooking;
    use crate::kernel::MockProviderDirectory;

    fn local(location: Option<GeoPoint>, city: Option<&str>) -> Booking {
        let mut booking = Booking::requested(
            NewBooking::builder()
                .customer_id(CustomerId::new())
                .category("plumbing")
                .delivery_mode(DeliveryMode::Local)
                .build(),
        );
        booking.latitude = location.map(|p| p.lat);
        booking.longitude = location.map(|p| p.lng);
        booking.city = city.map(str::to_string);
        booking
    }

    fn engine(directory: Arc<MockProviderDirectory>) -> MatchEngine {
        MatchEngine::new(directory, MatchConfig::default())
    }

    #[tokio::test]
    async fn test_local_orders_nearest_first_and_drops_inactive() {
        let (near, mid, far, off) = (
            ProviderId::new(),
            ProviderId::new(),
            ProviderId::new(),
            ProviderId::new(),
        );
        let directory = Arc::new(MockProviderDirectory::with_entries(vec![
            DirectoryEntry::active(far, Some(9.0)),
            DirectoryEntry {
                provider_id: off,
                distance_km: Some(0.5),
                is_active: false,
            },
            DirectoryEntry::active(near, Some(1.0)),
            DirectoryEntry::active(mid, Some(4.0)),
        ]));

        let candidates = engine(directory.clone())
            .find_candidates(&local(Some(GeoPoint::new(19.076, 72.877)), None))
            .await
            .unwrap();

        assert_eq!(candidates, vec![near, mid, far]);
        let query = directory.last_query().unwrap();
        assert_eq!(query.radius_km, Some(10.0));
        assert_eq!(query.location, Some(GeoPoint::new(19.076, 72.877)));
    }

    #[tokio::test]
    async fn test_zero_location_falls_back_to_city() {
        let provider = ProviderId::new();
        let directory = Arc::new(MockProviderDirectory::with_entries(vec![
            DirectoryEntry::active(provider, None),
        ]));

        let candidates = engine(directory.clone())
            .find_candidates(&local(Some(GeoPoint::new(0.0, 0.0)), Some("Pune")))
            .await
            .unwrap();

        assert_eq!(candidates, vec![provider]);
        let query = directory.last_query().unwrap();
        assert_eq!(query.city.as_deref(), Some("Pune"));
        assert!(query.location.is_none());
    }

    #[tokio::test]
    async fn test_no_location_no_city_skips_directory() {
        let directory = Arc::new(MockProviderDirectory::with_entries(vec![
            DirectoryEntry::active(ProviderId::new(), None),
        ]));

        let candidates = engine(directory.clone())
            .find_candidates(&local(None, None))
            .await
            .unwrap();

        assert!(candidates.is_empty());
        assert_eq!(directory.query_count(), 0);
    }

    #[tokio::test]
    async fn test_online_ignores_location_and_applies_limit() {
        let directory = Arc::new(MockProviderDirectory::with_entries(vec![]));
        let mut booking = local(Some(GeoPoint::new(19.0, 72.0)), None);
        booking.delivery_mode = DeliveryMode::Online;

        engine(directory.clone()).find_candidates(&booking).await.unwrap();

        let query = directory.last_query().unwrap();
        assert!(query.location.is_none());
        assert_eq!(query.limit, Some(20));
    }

    #[tokio::test]
    async fn test_directory_failure_is_transient() {
        let directory = Arc::new(MockProviderDirectory::failing());

        let err = engine(directory)
            .find_candidates(&local(Some(GeoPoint::new(19.0, 72.0)), None))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[test]
    fn test_rank_keeps_directory_order_for_unknown_distance() {
        let ids: Vec<ProviderId> = (0..3).map(|_| ProviderId::new()).collect();
        let entries = vec![
            DirectoryEntry::active(ids[0], None),
            DirectoryEntry::active(ids[1], None),
            DirectoryEntry::active(ids[0], None),
            DirectoryEntry::active(ids[2], None),
        ];
        assert_eq!(rank(entries), ids);
    }
}
