//! Postal-code lookup and great-circle distance.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Mean Earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.7613;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine distance between two coordinates, in miles.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_MILES * c
}

#[derive(Debug, thiserror::Error)]
pub enum GeoIndexError {
    #[error("failed to read postal table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid postal table data: {0}")]
    Csv(#[from] csv::Error),
    #[error("postal code {postal_code} has out-of-range coordinates")]
    InvalidCoordinate { postal_code: String },
}

/// Read-only postal code to coordinate table shared by all handlers.
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    table: HashMap<String, Coordinate>,
}

#[derive(Debug, Deserialize)]
struct PostalRow {
    postal_code: String,
    latitude: f64,
    longitude: f64,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `postal_code,latitude,longitude` CSV export.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, GeoIndexError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GeoIndexError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut index = Self::new();

        for row in csv_reader.deserialize::<PostalRow>() {
            let row = row?;
            let coordinate = Coordinate::new(row.latitude, row.longitude);
            if !coordinate.is_valid() {
                return Err(GeoIndexError::InvalidCoordinate {
                    postal_code: row.postal_code,
                });
            }
            index.insert(&row.postal_code, coordinate);
        }

        Ok(index)
    }

    pub fn insert(&mut self, postal_code: &str, coordinate: Coordinate) {
        self.table.insert(normalize_postal_code(postal_code), coordinate);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// `None` means the code is unknown; callers skip radius filtering rather than fail.
    pub fn resolve(&self, postal_code: &str) -> Option<Coordinate> {
        self.table.get(&normalize_postal_code(postal_code)).copied()
    }

    pub fn distance_between(&self, from: &str, to: &str) -> Option<f64> {
        Some(distance(self.resolve(from)?, self.resolve(to)?))
    }
}

fn normalize_postal_code(raw: &str) -> String {
    let trimmed = raw.trim();
    let base = trimmed.split('-').next().unwrap_or(trimmed);
    base.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> GeoIndex {
        let csv = "postal_code,latitude,longitude\n\
                   50309,41.5868,-93.6250\n\
                   52401,41.9779,-91.6656\n\
                   10001,40.7506,-73.9972\n";
        GeoIndex::from_reader(csv.as_bytes()).expect("valid table")
    }

    #[test]
    fn distance_to_self_is_zero() {
        let point = Coordinate::new(41.5868, -93.6250);
        assert!(distance(point, point).abs() < 1e-9);
    }

    #[test]
    fn distance_is_symmetric_and_plausible() {
        let index = sample_index();
        let des_moines = index.resolve("50309").expect("known");
        let cedar_rapids = index.resolve("52401").expect("known");

        let there = distance(des_moines, cedar_rapids);
        let back = distance(cedar_rapids, des_moines);
        assert!((there - back).abs() < 1e-9);
        assert!(there > 100.0 && there < 120.0, "got {there}");
    }

    #[test]
    fn quarter_meridian_matches_radius() {
        let pole = Coordinate::new(90.0, 0.0);
        let equator = Coordinate::new(0.0, 0.0);
        let expected = EARTH_RADIUS_MILES * std::f64::consts::FRAC_PI_2;
        assert!((distance(pole, equator) - expected).abs() < 1e-6);
    }

    #[test]
    fn resolve_normalizes_zip_plus_four() {
        let index = sample_index();
        assert_eq!(index.resolve(" 50309-1234 "), index.resolve("50309"));
        assert!(index.resolve("99999").is_none());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn distance_between_unknown_code_is_none() {
        let index = sample_index();
        assert!(index.distance_between("50309", "00000").is_none());
        assert!(index.distance_between("50309", "10001").is_some());
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let csv = "postal_code,latitude,longitude\n12345,123.0,10.0\n";
        match GeoIndex::from_reader(csv.as_bytes()) {
            Err(GeoIndexError::InvalidCoordinate { postal_code }) => {
                assert_eq!(postal_code, "12345")
            }
            other => panic!("expected invalid coordinate, got {other:?}"),
        }
    }
}
