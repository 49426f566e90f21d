use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4().simple()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Identity of a client, provider, or operator as supplied by the identity collaborator.
    UserId,
    "usr"
);
identifier!(RequestId, "req");
identifier!(ResponseId, "rsp");
identifier!(EngagementId, "eng");
identifier!(RatingId, "rat");
identifier!(GigId, "gig");
identifier!(OrderId, "ord");
identifier!(DeliveryId, "dlv");
identifier!(ReviewId, "rev");

/// Coded business-capability category, e.g. `area3`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceAreaId(pub String);

impl fmt::Display for ServiceAreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Provider,
    Admin,
}

/// Caller identity attached to every facade operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: ActorRole,
}

impl Actor {
    pub fn client(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            role: ActorRole::Client,
        }
    }

    pub fn provider(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            role: ActorRole::Provider,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            role: ActorRole::Admin,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.role == ActorRole::Admin
    }

    /// True when the actor is `owner` or holds a privileged role.
    pub fn owns_or_privileged(&self, owner: &UserId) -> bool {
        self.is_privileged() || &self.id == owner
    }
}

/// Client budget, either a single figure or a min/max band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Budget {
    Fixed { amount: Decimal },
    Range { min: Decimal, max: Decimal },
}

impl Budget {
    /// Figure used for price fitting; ranges are fitted by their ceiling.
    pub fn fit_amount(&self) -> Decimal {
        match self {
            Budget::Fixed { amount } => *amount,
            Budget::Range { max, .. } => *max,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Budget::Fixed { amount } => !amount.is_sign_negative(),
            Budget::Range { min, max } => !min.is_sign_negative() && min <= max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPreference {
    FixedPrice,
    Milestones,
    Hourly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Engaged,
    Closed,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Engaged => "engaged",
            RequestStatus::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, target: RequestStatus) -> bool {
        matches!(
            (self, target),
            (RequestStatus::Open, RequestStatus::Engaged | RequestStatus::Closed)
                | (RequestStatus::Engaged, RequestStatus::Closed)
        )
    }
}

/// Client-supplied fields for a new service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequestDraft {
    pub service_area: ServiceAreaId,
    pub budget: Budget,
    #[serde(default = "default_payment_preference")]
    pub payment_preference: PaymentPreference,
    pub timeline: String,
    pub description: String,
    #[serde(default)]
    pub origin_postal_code: Option<String>,
    #[serde(default)]
    pub radius_miles: Option<f64>,
}

fn default_payment_preference() -> PaymentPreference {
    PaymentPreference::FixedPrice
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub client_id: UserId,
    pub service_area: ServiceAreaId,
    pub budget: Budget,
    pub payment_preference: PaymentPreference,
    pub timeline: String,
    pub description: String,
    pub origin_postal_code: Option<String>,
    pub radius_miles: Option<f64>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl ServiceRequest {
    pub fn from_draft(client_id: UserId, draft: ServiceRequestDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::generate(),
            client_id,
            service_area: draft.service_area,
            budget: draft.budget,
            payment_preference: draft.payment_preference,
            timeline: draft.timeline,
            description: draft.description,
            origin_postal_code: draft.origin_postal_code,
            radius_miles: draft.radius_miles,
            status: RequestStatus::Open,
            created_at: now,
        }
    }
}

/// Published min/max price band for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl PriceRange {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && amount <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub provider_id: UserId,
    pub service_areas: BTreeSet<ServiceAreaId>,
    #[serde(default)]
    pub price_range: Option<PriceRange>,
    pub available: bool,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl ProviderProfile {
    pub fn serves(&self, area: &ServiceAreaId) -> bool {
        self.service_areas.contains(area)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ResponseStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Accepted => "accepted",
            ResponseStatus::Rejected => "rejected",
        }
    }
}

/// A provider's proposal against a request. At most one per (request, provider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub provider_id: UserId,
    pub proposal_note: String,
    pub status: ResponseStatus,
    pub created_at: DateTime<Utc>,
}

/// A request visible to a provider, flagged when the provider was pushed an invite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibleRequest {
    pub request: ServiceRequest,
    pub invited: bool,
}

/// Ranked candidate for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredProvider {
    pub provider_id: UserId,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_miles: Option<f64>,
    pub invited: bool,
}
