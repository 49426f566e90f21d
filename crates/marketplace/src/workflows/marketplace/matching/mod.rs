mod admission;
pub mod geo;
pub mod scoring;

pub use admission::AdmissionController;
pub use geo::{distance, Coordinate, GeoIndex, GeoIndexError};
pub use scoring::{budget_passes, rank, score};
