use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::MarketplaceConfig;
use crate::workflows::marketplace::domain::{
    Actor, Budget, EngagementId, GigId, MatchResponse, OrderId, PaymentPreference, PriceRange,
    ProviderProfile, RequestId, RequestStatus, ResponseId, ResponseStatus, ServiceAreaId,
    ServiceRequest, ServiceRequestDraft, UserId,
};
use crate::workflows::marketplace::engagements::{Engagement, EngagementRating};
use crate::workflows::marketplace::matching::{Coordinate, GeoIndex};
use crate::workflows::marketplace::memory::{InMemoryMarketplaceStore, InMemoryNotificationSink};
use crate::workflows::marketplace::orders::{
    Gig, GigPackage, GigRequirement, OrderDelivery, PackageTier, ServiceOrder, ServiceReview,
};
use crate::workflows::marketplace::repository::{
    EngagementRepository, GigCatalog, MarketplaceEvent, NotificationError, NotificationSink,
    OrderRepository, ProviderDirectory, RepositoryError, RequestRepository, ResponseRepository,
};
use crate::workflows::marketplace::service::MarketplaceFacade;

pub(super) type MemoryFacade = MarketplaceFacade<InMemoryMarketplaceStore, InMemoryNotificationSink>;

pub(super) fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn config() -> MarketplaceConfig {
    MarketplaceConfig::default()
}

pub(super) fn client() -> Actor {
    Actor::client("client-1")
}

pub(super) fn area(code: &str) -> ServiceAreaId {
    ServiceAreaId(code.to_string())
}

pub(super) fn money(units: i64) -> Decimal {
    Decimal::from(units)
}

pub(super) fn geo_index() -> GeoIndex {
    let mut index = GeoIndex::new();
    index.insert("10001", Coordinate::new(40.7506, -73.9972));
    index.insert("07030", Coordinate::new(40.7440, -74.0324));
    index.insert("19103", Coordinate::new(39.9526, -75.1652));
    index.insert("94103", Coordinate::new(37.7725, -122.4091));
    index
}

pub(super) fn provider_profile(
    id: &str,
    areas: &[&str],
    range: Option<(i64, i64)>,
    available: bool,
    postal_code: Option<&str>,
) -> ProviderProfile {
    ProviderProfile {
        provider_id: UserId(id.to_string()),
        service_areas: areas.iter().map(|code| area(code)).collect::<BTreeSet<_>>(),
        price_range: range.map(|(min, max)| PriceRange {
            min: money(min),
            max: money(max),
        }),
        available,
        postal_code: postal_code.map(str::to_string),
    }
}

pub(super) fn request_draft(service_area: &str, budget: i64) -> ServiceRequestDraft {
    ServiceRequestDraft {
        service_area: area(service_area),
        budget: Budget::Fixed {
            amount: money(budget),
        },
        payment_preference: PaymentPreference::FixedPrice,
        timeline: "within 30 days".to_string(),
        description: "quarter-end bookkeeping clean-up".to_string(),
        origin_postal_code: None,
        radius_miles: None,
    }
}

pub(super) fn stored_request(client: &Actor, service_area: &str, budget: i64) -> ServiceRequest {
    ServiceRequest::from_draft(client.id.clone(), request_draft(service_area, budget), at())
}

pub(super) fn logo_gig(provider: &Actor) -> Gig {
    Gig {
        id: GigId::generate(),
        provider_id: provider.id.clone(),
        service_area: area("area3"),
        title: "Brand identity package".to_string(),
        packages: vec![
            GigPackage {
                tier: PackageTier::Basic,
                title: "Logo".to_string(),
                price: money(150),
                delivery_days: 3,
                revisions_included: 1,
            },
            GigPackage {
                tier: PackageTier::Standard,
                title: "Logo and palette".to_string(),
                price: money(400),
                delivery_days: 5,
                revisions_included: 2,
            },
            GigPackage {
                tier: PackageTier::Premium,
                title: "Full identity".to_string(),
                price: money(900),
                delivery_days: 10,
                revisions_included: 4,
            },
        ],
        requirements: vec![
            GigRequirement {
                key: "brand_name".to_string(),
                prompt: "What is the brand called?".to_string(),
                required: true,
            },
            GigRequirement {
                key: "references".to_string(),
                prompt: "Links to styles you like".to_string(),
                required: false,
            },
        ],
        average_rating: 0.0,
        review_count: 0,
    }
}

pub(super) fn intake_answers() -> BTreeMap<String, String> {
    BTreeMap::from([("brand_name".to_string(), "Northwind Books".to_string())])
}

pub(super) fn build_facade() -> (
    MemoryFacade,
    Arc<InMemoryMarketplaceStore>,
    Arc<InMemoryNotificationSink>,
) {
    let store = Arc::new(InMemoryMarketplaceStore::default());
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let facade = MarketplaceFacade::new(
        store.clone(),
        notifier.clone(),
        Arc::new(geo_index()),
        &config(),
    );
    (facade, store, notifier)
}

/// Registers `count` available providers serving `area3` with an 800..1200 band.
pub(super) fn register_providers(facade: &MemoryFacade, count: usize) -> Vec<Actor> {
    (0..count)
        .map(|index| {
            let actor = Actor::provider(format!("provider-{index:03}"));
            facade
                .register_provider(
                    &actor,
                    provider_profile(&actor.id.0, &["area3"], Some((800, 1200)), true, None),
                )
                .expect("provider registers");
            actor
        })
        .collect()
}

pub(super) fn pending_response(request: &ServiceRequest, provider: &Actor) -> MatchResponse {
    MatchResponse {
        id: ResponseId::generate(),
        request_id: request.id.clone(),
        provider_id: provider.id.clone(),
        proposal_note: "Available next week".to_string(),
        status: ResponseStatus::Pending,
        created_at: at(),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Sink whose transport is always down.
pub(super) struct OfflineSink;

impl NotificationSink for OfflineSink {
    fn publish(&self, _event: MarketplaceEvent) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("broker offline".to_string()))
    }
}

/// Delegates to the in-memory store but reports the next `stale_writes` compare-and-swap
/// writes as lost races. `moved_after_read` lets a concurrent writer move an open request
/// right after the next read of it.
#[derive(Default)]
pub(super) struct ContendedStore {
    pub(super) inner: InMemoryMarketplaceStore,
    pub(super) stale_writes: AtomicU32,
    pub(super) attempts: AtomicU32,
    pub(super) moved_after_read: Mutex<Option<RequestStatus>>,
}

impl ContendedStore {
    pub(super) fn failing(stale_writes: u32) -> Self {
        Self {
            stale_writes: AtomicU32::new(stale_writes),
            ..Self::default()
        }
    }

    pub(super) fn moving_request_after_read(status: RequestStatus) -> Self {
        Self {
            moved_after_read: Mutex::new(Some(status)),
            ..Self::default()
        }
    }

    fn contend(&self) -> Result<(), RepositoryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .stale_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lost {
            Err(RepositoryError::Stale)
        } else {
            Ok(())
        }
    }
}

impl RequestRepository for ContendedStore {
    fn insert_request(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        self.inner.insert_request(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError> {
        let request = self.inner.fetch_request(id)?;
        let moved = self
            .moved_after_read
            .lock()
            .map_err(|_| RepositoryError::Unavailable("hook poisoned".to_string()))?
            .take();
        if let Some(status) = moved {
            self.inner
                .transition_request(id, RequestStatus::Open, status)?;
        }
        Ok(request)
    }

    fn requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.inner.requests_with_status(statuses)
    }

    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<ServiceRequest, RepositoryError> {
        self.inner.transition_request(id, from, to)
    }
}

impl ProviderDirectory for ContendedStore {
    fn upsert_profile(&self, profile: ProviderProfile) -> Result<ProviderProfile, RepositoryError> {
        self.inner.upsert_profile(profile)
    }

    fn fetch_profile(&self, id: &UserId) -> Result<Option<ProviderProfile>, RepositoryError> {
        self.inner.fetch_profile(id)
    }

    fn profiles(&self) -> Result<Vec<ProviderProfile>, RepositoryError> {
        self.inner.profiles()
    }
}

impl ResponseRepository for ContendedStore {
    fn insert_response_within_limit(
        &self,
        response: MatchResponse,
        limit: usize,
    ) -> Result<MatchResponse, RepositoryError> {
        self.inner.insert_response_within_limit(response, limit)
    }

    fn fetch_response(&self, id: &ResponseId) -> Result<Option<MatchResponse>, RepositoryError> {
        self.inner.fetch_response(id)
    }

    fn responses_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<MatchResponse>, RepositoryError> {
        self.inner.responses_for_request(request_id)
    }

    fn transition_response(
        &self,
        id: &ResponseId,
        from: ResponseStatus,
        to: ResponseStatus,
    ) -> Result<MatchResponse, RepositoryError> {
        self.inner.transition_response(id, from, to)
    }

    fn record_invitations(
        &self,
        request_id: &RequestId,
        providers: &[UserId],
    ) -> Result<(), RepositoryError> {
        self.inner.record_invitations(request_id, providers)
    }

    fn invited_providers(&self, request_id: &RequestId) -> Result<Vec<UserId>, RepositoryError> {
        self.inner.invited_providers(request_id)
    }
}

impl EngagementRepository for ContendedStore {
    fn create_engagement(&self, engagement: Engagement) -> Result<Engagement, RepositoryError> {
        self.inner.create_engagement(engagement)
    }

    fn fetch_engagement(&self, id: &EngagementId) -> Result<Option<Engagement>, RepositoryError> {
        self.inner.fetch_engagement(id)
    }

    fn replace_engagement(
        &self,
        engagement: Engagement,
        expected_revision: u64,
    ) -> Result<Engagement, RepositoryError> {
        self.contend()?;
        self.inner.replace_engagement(engagement, expected_revision)
    }

    fn insert_rating(&self, rating: EngagementRating) -> Result<EngagementRating, RepositoryError> {
        self.inner.insert_rating(rating)
    }
}

impl GigCatalog for ContendedStore {
    fn upsert_gig(&self, gig: Gig) -> Result<Gig, RepositoryError> {
        self.inner.upsert_gig(gig)
    }

    fn fetch_gig(&self, id: &GigId) -> Result<Option<Gig>, RepositoryError> {
        self.inner.fetch_gig(id)
    }
}

impl OrderRepository for ContendedStore {
    fn insert_order(&self, order: ServiceOrder) -> Result<ServiceOrder, RepositoryError> {
        self.inner.insert_order(order)
    }

    fn fetch_order(&self, id: &OrderId) -> Result<Option<ServiceOrder>, RepositoryError> {
        self.inner.fetch_order(id)
    }

    fn replace_order(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
    ) -> Result<ServiceOrder, RepositoryError> {
        self.contend()?;
        self.inner.replace_order(order, expected_revision)
    }

    fn record_delivery(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
        delivery: OrderDelivery,
    ) -> Result<(ServiceOrder, OrderDelivery), RepositoryError> {
        self.contend()?;
        self.inner.record_delivery(order, expected_revision, delivery)
    }

    fn deliveries(&self, order_id: &OrderId) -> Result<Vec<OrderDelivery>, RepositoryError> {
        self.inner.deliveries(order_id)
    }

    fn insert_review(
        &self,
        review: ServiceReview,
    ) -> Result<(ServiceReview, Gig), RepositoryError> {
        self.inner.insert_review(review)
    }
}
