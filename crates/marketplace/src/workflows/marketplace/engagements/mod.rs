mod domain;
mod engine;

pub use domain::{
    Engagement, EngagementRating, EngagementStatus, FeeBreakdown, StatusHistoryEntry,
};
pub use engine::{EngagementEngine, StatusUpdate};
pub(crate) use engine::validate_rating;
