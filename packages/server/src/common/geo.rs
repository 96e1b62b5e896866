//! Geographic primitives used by matching and tracking.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula, in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a point from nullable columns. Returns `None` if either half is missing.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }

    /// `(0, 0)` is what clients send when geolocation failed.
    pub fn is_zero(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    /// Finite and inside lat/lng bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// A point usable as a search center: valid and not the zero sentinel.
    pub fn is_usable(&self) -> bool {
        self.is_valid() && !self.is_zero()
    }

    /// Great-circle distance to `other` in kilometers.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_mumbai_to_pune() {
        let mumbai = GeoPoint::new(19.076, 72.877);
        let pune = GeoPoint::new(18.5204, 73.8567);
        let km = mumbai.distance_km(&pune);
        assert!((115.0..125.0).contains(&km), "got {km}");
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = GeoPoint::new(19.076, 72.877);
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn test_zero_point_is_not_usable() {
        assert!(!GeoPoint::new(0.0, 0.0).is_usable());
        assert!(!GeoPoint::new(91.0, 10.0).is_usable());
        assert!(!GeoPoint::new(f64::NAN, 10.0).is_usable());
        assert!(GeoPoint::new(19.076, 72.877).is_usable());
    }

    #[test]
    fn test_from_parts_requires_both() {
        assert!(GeoPoint::from_parts(Some(1.0), None).is_none());
        assert_eq!(
            GeoPoint::from_parts(Some(1.0), Some(2.0)),
            Some(GeoPoint::new(1.0, 2.0))
        );
    }
}
