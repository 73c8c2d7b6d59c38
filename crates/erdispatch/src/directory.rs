//! Hospital directory lookups.

use std::cmp::Ordering;

use crate::department::Department;
use crate::error::Result;
use crate::geo::{format_distance, GeoPoint};
use crate::model::Hospital;
use crate::store::Store;

/// Narrows a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFilter {
    /// Only hospitals offering this department.
    pub department: Option<Department>,
    /// Only hospitals whose name contains this text, ignoring case.
    pub name: Option<String>,
}

impl DirectoryFilter {
    fn matches(&self, hospital: &Hospital) -> bool {
        if let Some(department) = self.department {
            if !hospital.available_departments.contains(&department) {
                return false;
            }
        }
        match self.name.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => hospital
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// The hospital.
    pub hospital: Hospital,
    /// Distance from the search origin, when one was given.
    pub distance_m: Option<f64>,
}

impl DirectoryEntry {
    /// Distance rendered for display, e.g. "약 1.2km".
    #[must_use]
    pub fn distance_label(&self) -> Option<String> {
        self.distance_m.map(format_distance)
    }
}

/// List hospitals matching `filter`.
///
/// With an `origin`, entries carry their distance and are ordered nearest
/// first; otherwise they keep the store's name order.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_hospitals(
    store: &Store,
    filter: &DirectoryFilter,
    origin: Option<&GeoPoint>,
) -> Result<Vec<DirectoryEntry>> {
    let hospitals = match filter.department {
        Some(department) => store.hospitals_offering_any(&[department])?,
        None => store.list_hospitals()?,
    };

    let mut entries: Vec<DirectoryEntry> = hospitals
        .into_iter()
        .filter(|h| filter.matches(h))
        .map(|hospital| DirectoryEntry {
            distance_m: origin.map(|o| o.distance_to(&hospital.location)),
            hospital,
        })
        .collect();

    entries.sort_by(|a, b| match (a.distance_m, b.distance_m) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Fixture};

    #[test]
    fn test_sorted_by_distance() {
        let fx = Fixture::new();
        let entries =
            find_hospitals(&fx.store, &DirectoryFilter::default(), Some(&testutil::origin()))
                .unwrap();

        let distances: Vec<f64> = entries.iter().filter_map(|e| e.distance_m).collect();
        assert_eq!(distances.len(), entries.len());
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(entries[0].hospital.id, fx.skin);
    }

    #[test]
    fn test_department_filter() {
        let fx = Fixture::new();
        let filter = DirectoryFilter {
            department: Some(Department::ThoracicSurgery),
            name: None,
        };
        let entries = find_hospitals(&fx.store, &filter, None).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hospital.id, fx.mid);
        assert!(entries[0].distance_m.is_none());
    }

    #[test]
    fn test_name_filter_ignores_case() {
        let store = Store::open_in_memory().unwrap();
        store
            .register_hospital(
                "a",
                &crate::model::NewHospital::new("Seoul General", "", testutil::origin()),
            )
            .unwrap();
        store
            .register_hospital(
                "b",
                &crate::model::NewHospital::new("Busan Medical", "", testutil::origin()),
            )
            .unwrap();

        let filter = DirectoryFilter {
            department: None,
            name: Some("seoul".to_string()),
        };
        let entries = find_hospitals(&store, &filter, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hospital.name, "Seoul General");
    }

    #[test]
    fn test_blank_name_filter_matches_all() {
        let fx = Fixture::new();
        let filter = DirectoryFilter {
            department: None,
            name: Some("  ".to_string()),
        };
        let all = find_hospitals(&fx.store, &DirectoryFilter::default(), None).unwrap();
        assert_eq!(find_hospitals(&fx.store, &filter, None).unwrap().len(), all.len());
    }

    #[test]
    fn test_distance_label() {
        let fx = Fixture::new();
        let entries =
            find_hospitals(&fx.store, &DirectoryFilter::default(), Some(&testutil::origin()))
                .unwrap();
        let label = entries[0].distance_label().unwrap();
        assert!(label.starts_with("약 "));
    }
}
