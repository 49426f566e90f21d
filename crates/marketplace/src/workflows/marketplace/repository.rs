use serde::{Deserialize, Serialize};

use super::domain::{
    EngagementId, GigId, MatchResponse, OrderId, ProviderProfile, RequestId, RequestStatus,
    ResponseId, ResponseStatus, ServiceRequest, UserId,
};
use super::engagements::{Engagement, EngagementRating, EngagementStatus};
use super::orders::{Gig, OrderDelivery, OrderStatus, ServiceOrder, ServiceReview};

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently")]
    Stale,
    #[error("admission limit of {limit} reached")]
    LimitReached { limit: usize },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Service requests owned by clients.
pub trait RequestRepository: Send + Sync {
    fn insert_request(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError>;
    fn fetch_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError>;
    fn requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<ServiceRequest>, RepositoryError>;
    /// Conditional status write; `Stale` when the stored status is not `from`.
    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<ServiceRequest, RepositoryError>;
}

/// Provider profiles, listed in discovery order.
pub trait ProviderDirectory: Send + Sync {
    fn upsert_profile(&self, profile: ProviderProfile) -> Result<ProviderProfile, RepositoryError>;
    fn fetch_profile(&self, id: &UserId) -> Result<Option<ProviderProfile>, RepositoryError>;
    fn profiles(&self) -> Result<Vec<ProviderProfile>, RepositoryError>;
}

pub trait ResponseRepository: Send + Sync {
    /// Open check, duplicate check, admission count, and insert as one atomic step. `Stale`
    /// when the request is no longer open. A repeat responder gets `Conflict` regardless of
    /// count; otherwise `LimitReached` once `limit` responses exist.
    fn insert_response_within_limit(
        &self,
        response: MatchResponse,
        limit: usize,
    ) -> Result<MatchResponse, RepositoryError>;
    fn fetch_response(&self, id: &ResponseId) -> Result<Option<MatchResponse>, RepositoryError>;
    fn responses_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<MatchResponse>, RepositoryError>;
    fn transition_response(
        &self,
        id: &ResponseId,
        from: ResponseStatus,
        to: ResponseStatus,
    ) -> Result<MatchResponse, RepositoryError>;
    /// Adds providers to the request's invite list, ignoring ones already present.
    fn record_invitations(
        &self,
        request_id: &RequestId,
        providers: &[UserId],
    ) -> Result<(), RepositoryError>;
    fn invited_providers(&self, request_id: &RequestId) -> Result<Vec<UserId>, RepositoryError>;
}

pub trait EngagementRepository: Send + Sync {
    /// Inserts the engagement, flips its request `open -> engaged`, and accepts its response
    /// in one step. `Conflict` when the request already has an engagement, `Stale` when the
    /// request is no longer open.
    fn create_engagement(&self, engagement: Engagement) -> Result<Engagement, RepositoryError>;
    fn fetch_engagement(&self, id: &EngagementId) -> Result<Option<Engagement>, RepositoryError>;
    /// Compare-and-swap on `revision`; the stored copy gets `expected_revision + 1`.
    fn replace_engagement(
        &self,
        engagement: Engagement,
        expected_revision: u64,
    ) -> Result<Engagement, RepositoryError>;
    /// `Conflict` when the engagement was already rated.
    fn insert_rating(&self, rating: EngagementRating) -> Result<EngagementRating, RepositoryError>;
}

pub trait GigCatalog: Send + Sync {
    fn upsert_gig(&self, gig: Gig) -> Result<Gig, RepositoryError>;
    fn fetch_gig(&self, id: &GigId) -> Result<Option<Gig>, RepositoryError>;
}

pub trait OrderRepository: Send + Sync {
    fn insert_order(&self, order: ServiceOrder) -> Result<ServiceOrder, RepositoryError>;
    fn fetch_order(&self, id: &OrderId) -> Result<Option<ServiceOrder>, RepositoryError>;
    /// Compare-and-swap on `revision`; the stored copy gets `expected_revision + 1`.
    fn replace_order(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
    ) -> Result<ServiceOrder, RepositoryError>;
    /// Swaps the order and appends the delivery together. `Stale` when either the revision
    /// moved or `delivery.version` is not one past the stored delivery count.
    fn record_delivery(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
        delivery: OrderDelivery,
    ) -> Result<(ServiceOrder, OrderDelivery), RepositoryError>;
    fn deliveries(&self, order_id: &OrderId) -> Result<Vec<OrderDelivery>, RepositoryError>;
    /// Stores the review and folds its rating into the gig's running average in one step.
    /// `Conflict` when the reviewer already reviewed the order, `NotFound` when the gig is
    /// gone; neither leaves a partial write.
    fn insert_review(
        &self,
        review: ServiceReview,
    ) -> Result<(ServiceReview, Gig), RepositoryError>;
}

/// Everything the facade needs from the document store.
pub trait MarketplaceStore:
    RequestRepository
    + ProviderDirectory
    + ResponseRepository
    + EngagementRepository
    + GigCatalog
    + OrderRepository
{
}

impl<T> MarketplaceStore for T where
    T: RequestRepository
        + ProviderDirectory
        + ResponseRepository
        + EngagementRepository
        + GigCatalog
        + OrderRepository
{
}

/// Outbound, fire-and-forget notification hook.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: MarketplaceEvent) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketplaceEvent {
    ProvidersInvited {
        request_id: RequestId,
        providers: Vec<UserId>,
    },
    EngagementStatusChanged {
        engagement_id: EngagementId,
        from: EngagementStatus,
        to: EngagementStatus,
        actor: UserId,
    },
    /// Emitted on `approved`/`completed` so downstream gap tracking can resolve its records.
    EngagementResolved {
        engagement_id: EngagementId,
        request_id: RequestId,
        client_id: UserId,
        status: EngagementStatus,
    },
    OrderStatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        actor: UserId,
    },
}

impl MarketplaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MarketplaceEvent::ProvidersInvited { .. } => "providers_invited",
            MarketplaceEvent::EngagementStatusChanged { .. } => "engagement_status_changed",
            MarketplaceEvent::EngagementResolved { .. } => "engagement_resolved",
            MarketplaceEvent::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Dispatch without letting delivery failures leak into the caller's result.
pub(crate) fn dispatch<N: NotificationSink + ?Sized>(sink: &N, event: MarketplaceEvent) {
    let name = event.name();
    if let Err(error) = sink.publish(event) {
        tracing::warn!(event = name, %error, "notification dispatch failed");
    }
}
