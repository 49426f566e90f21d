//! Service-marketplace core: provider matching with admission control, the engagement
//! lifecycle for custom requests, and the packaged-gig order lifecycle.

pub mod domain;
pub mod engagements;
pub mod error;
pub mod matching;
pub mod memory;
pub mod orders;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, ActorRole, Budget, EligibleRequest, EngagementId, GigId, MatchResponse, OrderId,
    PaymentPreference, PriceRange, ProviderProfile, RequestId, RequestStatus, ResponseId,
    ResponseStatus, ScoredProvider, ServiceAreaId, ServiceRequest, ServiceRequestDraft, UserId,
};
pub use engagements::{
    Engagement, EngagementEngine, EngagementRating, EngagementStatus, FeeBreakdown,
    StatusHistoryEntry, StatusUpdate,
};
pub use error::MarketplaceError;
pub use matching::{AdmissionController, Coordinate, GeoIndex, GeoIndexError};
pub use memory::{InMemoryMarketplaceStore, InMemoryNotificationSink};
pub use orders::{
    EscrowStatus, Gig, GigDraft, GigPackage, GigRequirement, OrderDelivery,
    OrderFulfillmentEngine, OrderStatus, PackageTier, ServiceOrder, ServiceReview,
};
pub use repository::{
    EngagementRepository, GigCatalog, MarketplaceEvent, MarketplaceStore, NotificationError,
    NotificationSink, OrderRepository, ProviderDirectory, RepositoryError, RequestRepository,
    ResponseRepository,
};
pub use router::{marketplace_router, RequestActor};
pub use service::MarketplaceFacade;
