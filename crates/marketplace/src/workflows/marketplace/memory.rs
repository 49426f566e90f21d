//! Process-local store used by the API service and tests. Every conditional write runs
//! under one lock, which gives the same atomicity a document store's conditional update does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    EngagementId, GigId, MatchResponse, OrderId, ProviderProfile, RequestId, RequestStatus,
    ResponseId, ResponseStatus, ServiceRequest, UserId,
};
use super::engagements::{Engagement, EngagementRating};
use super::orders::{Gig, OrderDelivery, ServiceOrder, ServiceReview};
use super::repository::{
    EngagementRepository, GigCatalog, MarketplaceEvent, NotificationError, NotificationSink,
    OrderRepository, ProviderDirectory, RepositoryError, RequestRepository, ResponseRepository,
};

#[derive(Default)]
struct StoreState {
    requests: HashMap<RequestId, ServiceRequest>,
    request_order: Vec<RequestId>,
    profiles: HashMap<UserId, ProviderProfile>,
    profile_order: Vec<UserId>,
    responses: HashMap<ResponseId, MatchResponse>,
    responses_by_request: HashMap<RequestId, Vec<ResponseId>>,
    invitations: HashMap<RequestId, Vec<UserId>>,
    engagements: HashMap<EngagementId, Engagement>,
    engagement_by_request: HashMap<RequestId, EngagementId>,
    ratings: HashMap<EngagementId, EngagementRating>,
    gigs: HashMap<GigId, Gig>,
    orders: HashMap<OrderId, ServiceOrder>,
    deliveries: HashMap<OrderId, Vec<OrderDelivery>>,
    reviews: HashMap<(OrderId, UserId), ServiceReview>,
}

#[derive(Default, Clone)]
pub struct InMemoryMarketplaceStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryMarketplaceStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl RequestRepository for InMemoryMarketplaceStore {
    fn insert_request(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        let mut state = self.lock()?;
        if state.requests.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        state.request_order.push(request.id.clone());
        state.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError> {
        Ok(self.lock()?.requests.get(id).cloned())
    }

    fn requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .request_order
            .iter()
            .filter_map(|id| state.requests.get(id))
            .filter(|request| statuses.contains(&request.status))
            .cloned()
            .collect())
    }

    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<ServiceRequest, RepositoryError> {
        let mut state = self.lock()?;
        let request = state.requests.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if request.status != from {
            return Err(RepositoryError::Stale);
        }
        request.status = to;
        Ok(request.clone())
    }
}

impl ProviderDirectory for InMemoryMarketplaceStore {
    fn upsert_profile(&self, profile: ProviderProfile) -> Result<ProviderProfile, RepositoryError> {
        let mut state = self.lock()?;
        if !state.profiles.contains_key(&profile.provider_id) {
            state.profile_order.push(profile.provider_id.clone());
        }
        state
            .profiles
            .insert(profile.provider_id.clone(), profile.clone());
        Ok(profile)
    }

    fn fetch_profile(&self, id: &UserId) -> Result<Option<ProviderProfile>, RepositoryError> {
        Ok(self.lock()?.profiles.get(id).cloned())
    }

    fn profiles(&self) -> Result<Vec<ProviderProfile>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .profile_order
            .iter()
            .filter_map(|id| state.profiles.get(id))
            .cloned()
            .collect())
    }
}

impl ResponseRepository for InMemoryMarketplaceStore {
    fn insert_response_within_limit(
        &self,
        response: MatchResponse,
        limit: usize,
    ) -> Result<MatchResponse, RepositoryError> {
        let mut state = self.lock()?;
        let request = state
            .requests
            .get(&response.request_id)
            .ok_or(RepositoryError::NotFound)?;
        if request.status != RequestStatus::Open {
            return Err(RepositoryError::Stale);
        }

        let existing = state
            .responses_by_request
            .get(&response.request_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let duplicate = existing.iter().any(|id| {
            state
                .responses
                .get(id)
                .is_some_and(|stored| stored.provider_id == response.provider_id)
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        if existing.len() >= limit {
            return Err(RepositoryError::LimitReached { limit });
        }

        state
            .responses_by_request
            .entry(response.request_id.clone())
            .or_default()
            .push(response.id.clone());
        state.responses.insert(response.id.clone(), response.clone());
        Ok(response)
    }

    fn fetch_response(&self, id: &ResponseId) -> Result<Option<MatchResponse>, RepositoryError> {
        Ok(self.lock()?.responses.get(id).cloned())
    }

    fn responses_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<MatchResponse>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .responses_by_request
            .get(request_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.responses.get(id))
            .cloned()
            .collect())
    }

    fn transition_response(
        &self,
        id: &ResponseId,
        from: ResponseStatus,
        to: ResponseStatus,
    ) -> Result<MatchResponse, RepositoryError> {
        let mut state = self.lock()?;
        let response = state.responses.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if response.status != from {
            return Err(RepositoryError::Stale);
        }
        response.status = to;
        Ok(response.clone())
    }

    fn record_invitations(
        &self,
        request_id: &RequestId,
        providers: &[UserId],
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if !state.requests.contains_key(request_id) {
            return Err(RepositoryError::NotFound);
        }
        let invited = state.invitations.entry(request_id.clone()).or_default();
        for provider in providers {
            if !invited.contains(provider) {
                invited.push(provider.clone());
            }
        }
        Ok(())
    }

    fn invited_providers(&self, request_id: &RequestId) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self
            .lock()?
            .invitations
            .get(request_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl EngagementRepository for InMemoryMarketplaceStore {
    fn create_engagement(&self, engagement: Engagement) -> Result<Engagement, RepositoryError> {
        let mut state = self.lock()?;
        if state.engagement_by_request.contains_key(&engagement.request_id) {
            return Err(RepositoryError::Conflict);
        }

        match state.requests.get(&engagement.request_id).map(|r| r.status) {
            None => return Err(RepositoryError::NotFound),
            Some(RequestStatus::Open) => {}
            Some(RequestStatus::Engaged) => return Err(RepositoryError::Conflict),
            Some(RequestStatus::Closed) => return Err(RepositoryError::Stale),
        }
        match state.responses.get(&engagement.response_id).map(|r| r.status) {
            None => return Err(RepositoryError::NotFound),
            Some(ResponseStatus::Rejected) => return Err(RepositoryError::Stale),
            Some(ResponseStatus::Pending | ResponseStatus::Accepted) => {}
        }

        if let Some(request) = state.requests.get_mut(&engagement.request_id) {
            request.status = RequestStatus::Engaged;
        }
        if let Some(response) = state.responses.get_mut(&engagement.response_id) {
            response.status = ResponseStatus::Accepted;
        }

        let mut stored = engagement;
        stored.revision = 0;
        state
            .engagement_by_request
            .insert(stored.request_id.clone(), stored.id.clone());
        state.engagements.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn fetch_engagement(&self, id: &EngagementId) -> Result<Option<Engagement>, RepositoryError> {
        Ok(self.lock()?.engagements.get(id).cloned())
    }

    fn replace_engagement(
        &self,
        engagement: Engagement,
        expected_revision: u64,
    ) -> Result<Engagement, RepositoryError> {
        let mut state = self.lock()?;
        let current = state
            .engagements
            .get(&engagement.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.revision != expected_revision {
            return Err(RepositoryError::Stale);
        }

        let mut stored = engagement;
        stored.revision = expected_revision + 1;
        state.engagements.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn insert_rating(&self, rating: EngagementRating) -> Result<EngagementRating, RepositoryError> {
        let mut state = self.lock()?;
        if !state.engagements.contains_key(&rating.engagement_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.ratings.contains_key(&rating.engagement_id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .ratings
            .insert(rating.engagement_id.clone(), rating.clone());
        Ok(rating)
    }
}

impl GigCatalog for InMemoryMarketplaceStore {
    fn upsert_gig(&self, gig: Gig) -> Result<Gig, RepositoryError> {
        self.lock()?.gigs.insert(gig.id.clone(), gig.clone());
        Ok(gig)
    }

    fn fetch_gig(&self, id: &GigId) -> Result<Option<Gig>, RepositoryError> {
        Ok(self.lock()?.gigs.get(id).cloned())
    }
}

impl OrderRepository for InMemoryMarketplaceStore {
    fn insert_order(&self, order: ServiceOrder) -> Result<ServiceOrder, RepositoryError> {
        let mut state = self.lock()?;
        if state.orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict);
        }
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    fn fetch_order(&self, id: &OrderId) -> Result<Option<ServiceOrder>, RepositoryError> {
        Ok(self.lock()?.orders.get(id).cloned())
    }

    fn replace_order(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
    ) -> Result<ServiceOrder, RepositoryError> {
        let mut state = self.lock()?;
        let current = state.orders.get(&order.id).ok_or(RepositoryError::NotFound)?;
        if current.revision != expected_revision {
            return Err(RepositoryError::Stale);
        }

        let mut stored = order;
        stored.revision = expected_revision + 1;
        state.orders.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn record_delivery(
        &self,
        order: ServiceOrder,
        expected_revision: u64,
        delivery: OrderDelivery,
    ) -> Result<(ServiceOrder, OrderDelivery), RepositoryError> {
        let mut state = self.lock()?;
        let current = state.orders.get(&order.id).ok_or(RepositoryError::NotFound)?;
        if current.revision != expected_revision {
            return Err(RepositoryError::Stale);
        }
        let prior = state.deliveries.get(&order.id).map_or(0, Vec::len);
        if delivery.version as usize != prior + 1 {
            return Err(RepositoryError::Stale);
        }

        let mut stored = order;
        stored.revision = expected_revision + 1;
        state
            .deliveries
            .entry(stored.id.clone())
            .or_default()
            .push(delivery.clone());
        state.orders.insert(stored.id.clone(), stored.clone());
        Ok((stored, delivery))
    }

    fn deliveries(&self, order_id: &OrderId) -> Result<Vec<OrderDelivery>, RepositoryError> {
        Ok(self
            .lock()?
            .deliveries
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_review(
        &self,
        review: ServiceReview,
    ) -> Result<(ServiceReview, Gig), RepositoryError> {
        let mut state = self.lock()?;
        let key = (review.order_id.clone(), review.reviewer_id.clone());
        if state.reviews.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        let gig = state
            .gigs
            .get(&review.gig_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?
            .with_review(review.rating);

        state.gigs.insert(gig.id.clone(), gig.clone());
        state.reviews.insert(key, review.clone());
        Ok((review, gig))
    }
}

/// Records events instead of delivering them.
#[derive(Default, Clone)]
pub struct InMemoryNotificationSink {
    events: Arc<Mutex<Vec<MarketplaceEvent>>>,
}

impl InMemoryNotificationSink {
    pub fn events(&self) -> Vec<MarketplaceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn publish(&self, event: MarketplaceEvent) -> Result<(), NotificationError> {
        self.events
            .lock()
            .map_err(|_| NotificationError::Transport("sink mutex poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}
