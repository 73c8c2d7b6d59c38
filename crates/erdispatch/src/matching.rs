//! Radius-expanding hospital matching.

use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::model::Hospital;

/// Hospitals found by a successful search.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// The radius at which the search succeeded, in metres.
    pub radius_m: f64,
    /// Matching hospitals, nearest first.
    pub hospital_ids: Vec<String>,
}

/// Find the hospitals inside the smallest radius of `radii_m` that holds any.
///
/// `candidates` are assumed to already offer a recommended department.
/// Hospitals listed in `exclude` are never matched. Each radius is tried
/// once, in order.
///
/// # Errors
///
/// Returns [`Error::NoHospitalMatch`] if no radius yields a hospital.
pub fn match_hospitals(
    candidates: &[Hospital],
    origin: &GeoPoint,
    radii_m: &[f64],
    exclude: &[String],
) -> Result<MatchOutcome> {
    let mut by_distance: Vec<(f64, &Hospital)> = candidates
        .iter()
        .filter(|h| !exclude.contains(&h.id))
        .map(|h| (origin.distance_to(&h.location), h))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

    for &radius_m in radii_m {
        let hospital_ids: Vec<String> = by_distance
            .iter()
            .take_while(|(distance, _)| *distance <= radius_m)
            .map(|(_, h)| h.id.clone())
            .collect();

        debug!(radius_m, found = hospital_ids.len(), "Searched radius");
        if !hospital_ids.is_empty() {
            return Ok(MatchOutcome {
                radius_m,
                hospital_ids,
            });
        }
    }

    Err(Error::NoHospitalMatch {
        radii_m: radii_m.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Beds;
    use crate::testutil;

    fn hospital(id: &str, km_north: f64) -> Hospital {
        Hospital {
            id: id.to_string(),
            name: id.to_string(),
            address: String::new(),
            location: testutil::north_of_origin(km_north),
            beds: Beds::new(20, 5).unwrap(),
            available_departments: Vec::new(),
        }
    }

    const RADII: [f64; 3] = [5_000.0, 10_000.0, 20_000.0];

    #[test]
    fn test_first_radius_wins() {
        let candidates = [hospital("a", 2.0), hospital("b", 4.0), hospital("c", 8.0)];
        let outcome = match_hospitals(&candidates, &testutil::origin(), &RADII, &[]).unwrap();

        assert_eq!(outcome.radius_m, 5_000.0);
        assert_eq!(outcome.hospital_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_expands_to_second_radius() {
        let candidates = [hospital("c", 8.0), hospital("d", 15.0)];
        let outcome = match_hospitals(&candidates, &testutil::origin(), &RADII, &[]).unwrap();

        assert_eq!(outcome.radius_m, 10_000.0);
        assert_eq!(outcome.hospital_ids, vec!["c"]);
    }

    #[test]
    fn test_expands_to_third_radius() {
        let candidates = [hospital("d", 15.0)];
        let outcome = match_hospitals(&candidates, &testutil::origin(), &RADII, &[]).unwrap();
        assert_eq!(outcome.radius_m, 20_000.0);
    }

    #[test]
    fn test_nothing_in_range() {
        let candidates = [hospital("e", 25.0)];
        let err = match_hospitals(&candidates, &testutil::origin(), &RADII, &[]).unwrap_err();

        let Error::NoHospitalMatch { radii_m } = err else {
            panic!("expected NoHospitalMatch");
        };
        assert_eq!(radii_m, RADII.to_vec());
    }

    #[test]
    fn test_no_candidates() {
        let err = match_hospitals(&[], &testutil::origin(), &RADII, &[]).unwrap_err();
        assert!(err.is_no_hospital_match());
    }

    #[test]
    fn test_excluded_hospitals_are_skipped() {
        let candidates = [hospital("a", 2.0), hospital("c", 8.0)];
        let outcome =
            match_hospitals(&candidates, &testutil::origin(), &RADII, &["a".to_string()]).unwrap();

        assert_eq!(outcome.radius_m, 10_000.0);
        assert_eq!(outcome.hospital_ids, vec!["c"]);
    }
}
