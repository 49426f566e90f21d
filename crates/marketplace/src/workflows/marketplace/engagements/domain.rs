use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::workflows::marketplace::domain::{
    EngagementId, RatingId, RequestId, ResponseId, ServiceAreaId, UserId,
};

/// Engagement lifecycle. The adjacency table lives in [`EngagementStatus::allowed_targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    Active,
    InProgress,
    UnderReview,
    Delivered,
    Approved,
    Disputed,
    Completed,
    Cancelled,
}

impl EngagementStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EngagementStatus::Active => "active",
            EngagementStatus::InProgress => "in_progress",
            EngagementStatus::UnderReview => "under_review",
            EngagementStatus::Delivered => "delivered",
            EngagementStatus::Approved => "approved",
            EngagementStatus::Disputed => "disputed",
            EngagementStatus::Completed => "completed",
            EngagementStatus::Cancelled => "cancelled",
        }
    }

    pub const fn allowed_targets(self) -> &'static [EngagementStatus] {
        use EngagementStatus::*;
        match self {
            Active => &[InProgress],
            InProgress => &[UnderReview, Delivered, Cancelled],
            UnderReview => &[InProgress, Delivered, Cancelled],
            Delivered => &[Approved, Disputed, InProgress],
            Approved => &[Completed],
            Disputed => &[InProgress, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: EngagementStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// States whose arrival may cascade into external records (gap tracking).
    pub fn is_resolution(self) -> bool {
        matches!(self, EngagementStatus::Approved | EngagementStatus::Completed)
    }
}

impl fmt::Display for EngagementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One accepted transition. The initial entry has no `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub from: Option<EngagementStatus>,
    pub to: EngagementStatus,
    pub actor: UserId,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Fee split for an agreed service fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub service_fee: Decimal,
    pub marketplace_fee: Decimal,
    pub total_amount: Decimal,
}

impl FeeBreakdown {
    /// `marketplace_fee = round(service_fee * rate, 2)`, half away from zero.
    pub fn compute(service_fee: Decimal, rate: Decimal) -> Self {
        let marketplace_fee =
            (service_fee * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self {
            service_fee,
            marketplace_fee,
            total_amount: service_fee + marketplace_fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub id: EngagementId,
    pub request_id: RequestId,
    pub response_id: ResponseId,
    pub client_id: UserId,
    pub provider_id: UserId,
    pub service_area: ServiceAreaId,
    pub status: EngagementStatus,
    pub fees: FeeBreakdown,
    pub progress_percentage: u8,
    pub status_history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token maintained by the store.
    pub revision: u64,
}

impl Engagement {
    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.client_id == user || &self.provider_id == user
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementRating {
    pub id: RatingId,
    pub engagement_id: EngagementId,
    pub client_id: UserId,
    pub provider_id: UserId,
    pub rating: u8,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}
