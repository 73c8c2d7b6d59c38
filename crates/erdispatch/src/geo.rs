//! Geographic points and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, `-90..=90`.
    pub latitude: f64,
    /// Longitude in degrees, `-180..=180`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range or non-finite coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if either coordinate is out of range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::invalid_input(format!("latitude out of range: {latitude}")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::invalid_input(format!(
                "longitude out of range: {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Haversine distance to `other` in metres.
    #[must_use]
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let d_phi = (other.latitude - self.latitude).to_radians();
        let d_lambda = (other.longitude - self.longitude).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// Render a distance the way the directory shows it: whole metres below one
/// kilometre, otherwise kilometres with one decimal.
#[must_use]
pub fn format_distance(distance_m: f64) -> String {
    if distance_m < 1000.0 {
        format!("약 {}m", distance_m.floor())
    } else {
        let km = format!("{:.1}", distance_m / 1000.0);
        let km = km.strip_suffix(".0").unwrap_or(&km);
        format!("약 {km}km")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul_city_hall() -> GeoPoint {
        GeoPoint::new(37.5663, 126.9779).unwrap()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = seoul_city_hall();
        assert!(p.distance_to(&p).abs() < 1e-6);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = seoul_city_hall();
        let b = GeoPoint::new(35.1796, 129.0756).unwrap(); // Busan
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_seoul_to_busan_distance() {
        let a = seoul_city_hall();
        let b = GeoPoint::new(35.1796, 129.0756).unwrap();
        let km = a.distance_to(&b) / 1000.0;
        assert!((320.0..330.0).contains(&km), "got {km}");
    }

    #[test]
    fn test_one_degree_latitude() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(1.0, 0.0).unwrap();
        let m = a.distance_to(&b);
        assert!((m - 111_195.0).abs() < 100.0, "got {m}");
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(850.4), "약 850m");
        assert_eq!(format_distance(1234.0), "약 1.2km");
        assert_eq!(format_distance(3000.0), "약 3km");
    }
}
