use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::workflows::marketplace::domain::{
    DeliveryId, GigId, OrderId, ReviewId, ServiceAreaId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageTier {
    Basic,
    Standard,
    Premium,
}

impl PackageTier {
    pub const fn label(self) -> &'static str {
        match self {
            PackageTier::Basic => "basic",
            PackageTier::Standard => "standard",
            PackageTier::Premium => "premium",
        }
    }
}

/// One purchasable tier of a gig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GigPackage {
    pub tier: PackageTier,
    pub title: String,
    pub price: Decimal,
    pub delivery_days: u32,
    pub revisions_included: u32,
}

/// Intake question the client answers when ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GigRequirement {
    pub key: String,
    pub prompt: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gig {
    pub id: GigId,
    pub provider_id: UserId,
    pub service_area: ServiceAreaId,
    pub title: String,
    pub packages: Vec<GigPackage>,
    #[serde(default)]
    pub requirements: Vec<GigRequirement>,
    #[serde(default)]
    pub average_rating: f64,
    #[serde(default)]
    pub review_count: u32,
}

impl Gig {
    pub fn package(&self, tier: PackageTier) -> Option<&GigPackage> {
        self.packages.iter().find(|package| package.tier == tier)
    }

    /// Required intake keys the answers leave empty or missing.
    pub fn missing_answers(&self, answers: &BTreeMap<String, String>) -> Vec<String> {
        self.requirements
            .iter()
            .filter(|requirement| requirement.required)
            .filter(|requirement| {
                answers
                    .get(&requirement.key)
                    .map_or(true, |answer| answer.trim().is_empty())
            })
            .map(|requirement| requirement.key.clone())
            .collect()
    }

    /// Running-average fold for one new rating.
    pub fn with_review(mut self, rating: u8) -> Self {
        let count = f64::from(self.review_count);
        let total = self.average_rating * count + f64::from(rating);
        self.review_count += 1;
        self.average_rating = total / f64::from(self.review_count);
        self
    }
}

/// Listing as submitted by a provider, before it is assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GigDraft {
    pub service_area: ServiceAreaId,
    pub title: String,
    pub packages: Vec<GigPackage>,
    #[serde(default)]
    pub requirements: Vec<GigRequirement>,
}

impl GigDraft {
    pub fn into_gig(self, provider_id: UserId) -> Gig {
        Gig {
            id: GigId::generate(),
            provider_id,
            service_area: self.service_area,
            title: self.title,
            packages: self.packages,
            requirements: self.requirements,
            average_rating: 0.0,
            review_count: 0,
        }
    }
}

/// Order lifecycle. The adjacency table lives in [`OrderStatus::allowed_targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Delivered,
    RevisionRequested,
    Disputed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Delivered => "delivered",
            OrderStatus::RevisionRequested => "revision_requested",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub const fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[InProgress, Cancelled, Disputed],
            InProgress => &[Delivered, Cancelled, Disputed],
            Delivered => &[Completed, RevisionRequested, Cancelled, Disputed],
            RevisionRequested => &[Delivered, Cancelled, Disputed],
            Disputed => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn accepts_delivery(self) -> bool {
        matches!(self, OrderStatus::InProgress | OrderStatus::RevisionRequested)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for where order funds conceptually sit. Never moves money itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Held,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Held => "held",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }

    /// `pending -> refunded` is deliberately absent: funds must be held first.
    pub fn can_transition_to(self, target: EscrowStatus) -> bool {
        matches!(
            (self, target),
            (EscrowStatus::Pending, EscrowStatus::Held)
                | (EscrowStatus::Held, EscrowStatus::Released | EscrowStatus::Refunded)
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: OrderId,
    pub gig_id: GigId,
    pub package: PackageTier,
    pub client_id: UserId,
    pub provider_id: UserId,
    pub price: Decimal,
    pub placed_at: DateTime<Utc>,
    pub delivery_deadline: DateTime<Utc>,
    pub answers: BTreeMap<String, String>,
    pub status: OrderStatus,
    pub escrow_status: EscrowStatus,
    pub revisions_remaining: u32,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token maintained by the store.
    pub revision: u64,
}

impl ServiceOrder {
    /// Deadline breaches are reported, never enforced.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.delivery_deadline
            && matches!(
                self.status,
                OrderStatus::Pending | OrderStatus::InProgress | OrderStatus::RevisionRequested
            )
    }

    pub fn is_party(&self, user: &UserId) -> bool {
        &self.client_id == user || &self.provider_id == user
    }
}

/// Append-only delivery record; `version` starts at 1 and never repeats per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivery {
    pub id: DeliveryId,
    pub order_id: OrderId,
    pub version: u32,
    pub message: String,
    pub attachments: Vec<String>,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReview {
    pub id: ReviewId,
    pub order_id: OrderId,
    pub gig_id: GigId,
    pub reviewer_id: UserId,
    pub provider_id: UserId,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}
