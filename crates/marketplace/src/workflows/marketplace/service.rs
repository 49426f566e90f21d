use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use super::domain::{
    Actor, ActorRole, EligibleRequest, EngagementId, GigId, MatchResponse, OrderId,
    ProviderProfile, RequestId, RequestStatus, ResponseId, ScoredProvider, ServiceRequest,
    ServiceRequestDraft, UserId,
};
use super::engagements::{Engagement, EngagementEngine, EngagementRating, StatusUpdate};
use super::error::{retry_on_stale, MarketplaceError};
use super::matching::{AdmissionController, GeoIndex};
use super::orders::{
    Gig, GigDraft, OrderDelivery, OrderFulfillmentEngine, PackageTier, ServiceOrder,
    ServiceReview,
};
use super::repository::{MarketplaceStore, NotificationSink};
use crate::config::MarketplaceConfig;

/// Single entry point for callers; composes admission, engagements, and order fulfillment
/// over one store.
pub struct MarketplaceFacade<S, N> {
    store: Arc<S>,
    admission: AdmissionController<S, N>,
    engagements: EngagementEngine<S, N>,
    orders: OrderFulfillmentEngine<S, N>,
    write_attempts: u32,
}

impl<S, N> MarketplaceFacade<S, N>
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        geo: Arc<GeoIndex>,
        config: &MarketplaceConfig,
    ) -> Self {
        Self {
            admission: AdmissionController::new(store.clone(), notifier.clone(), geo, config),
            engagements: EngagementEngine::new(store.clone(), notifier.clone(), config),
            orders: OrderFulfillmentEngine::new(store.clone(), notifier, config),
            store,
            write_attempts: config.write_attempts,
        }
    }

    pub fn register_provider(
        &self,
        actor: &Actor,
        profile: ProviderProfile,
    ) -> Result<ProviderProfile, MarketplaceError> {
        let self_service = actor.role == ActorRole::Provider && actor.id == profile.provider_id;
        if !(self_service || actor.is_privileged()) {
            return Err(MarketplaceError::unauthorized(&actor.id, "register this provider"));
        }
        if profile.service_areas.is_empty() {
            return Err(MarketplaceError::Validation(
                "a provider serves at least one service area".to_string(),
            ));
        }
        if let Some(range) = profile.price_range {
            if range.min.is_sign_negative() || range.min > range.max {
                return Err(MarketplaceError::Validation(format!(
                    "price range {}..{} is not a valid band",
                    range.min, range.max
                )));
            }
        }

        let stored = self.store.upsert_profile(profile)?;
        info!(
            provider_id = %stored.provider_id,
            areas = stored.service_areas.len(),
            "provider registered"
        );
        Ok(stored)
    }

    pub fn create_service_request(
        &self,
        actor: &Actor,
        draft: ServiceRequestDraft,
    ) -> Result<ServiceRequest, MarketplaceError> {
        if actor.role != ActorRole::Client {
            return Err(MarketplaceError::unauthorized(&actor.id, "create service requests"));
        }
        if !draft.budget.is_valid() {
            return Err(MarketplaceError::Validation(
                "budget must be non-negative with min <= max".to_string(),
            ));
        }
        if draft
            .radius_miles
            .is_some_and(|radius| !radius.is_finite() || radius <= 0.0)
        {
            return Err(MarketplaceError::Validation(
                "radius must be a positive number of miles".to_string(),
            ));
        }

        let request = ServiceRequest::from_draft(actor.id.clone(), draft, Utc::now());
        let stored = self.store.insert_request(request)?;
        info!(
            request_id = %stored.id,
            client_id = %stored.client_id,
            service_area = %stored.service_area,
            "service request created"
        );
        Ok(stored)
    }

    pub fn get_service_request(
        &self,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, MarketplaceError> {
        self.store
            .fetch_request(request_id)?
            .ok_or_else(|| MarketplaceError::not_found("request", request_id))
    }

    /// Owner or operator withdraws a request; `open` and `engaged` requests may be closed.
    pub fn close_service_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, MarketplaceError> {
        let closed = retry_on_stale(self.write_attempts, "request_close", || {
            let request = self.get_service_request(request_id)?;
            if !actor.owns_or_privileged(&request.client_id) {
                return Err(MarketplaceError::unauthorized(&actor.id, "close this request"));
            }
            if !request.status.can_transition_to(RequestStatus::Closed) {
                return Err(MarketplaceError::InvalidTransition {
                    machine: "request",
                    from: request.status.label(),
                    to: RequestStatus::Closed.label(),
                });
            }
            Ok(self
                .store
                .transition_request(request_id, request.status, RequestStatus::Closed)?)
        })?;
        info!(request_id = %closed.id, "service request closed");
        Ok(closed)
    }

    pub fn list_eligible_requests(
        &self,
        actor: &Actor,
        provider_id: &UserId,
    ) -> Result<Vec<EligibleRequest>, MarketplaceError> {
        if !actor.owns_or_privileged(provider_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "list eligible requests"));
        }
        self.admission.eligible_requests_for(provider_id)
    }

    pub fn respond_to_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        proposal_note: String,
    ) -> Result<MatchResponse, MarketplaceError> {
        self.admission.respond(actor, request_id, proposal_note, Utc::now())
    }

    pub fn decline_response(
        &self,
        actor: &Actor,
        response_id: &ResponseId,
    ) -> Result<MatchResponse, MarketplaceError> {
        self.admission.decline(actor, response_id)
    }

    pub fn list_responses(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<MatchResponse>, MarketplaceError> {
        self.admission.responses(actor, request_id)
    }

    pub fn invite_top_providers(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<UserId>, MarketplaceError> {
        self.admission.invite_top(actor, request_id)
    }

    pub fn get_matches_for_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<ScoredProvider>, MarketplaceError> {
        let request = self.get_service_request(request_id)?;
        if !actor.owns_or_privileged(&request.client_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "view matches"));
        }
        self.admission.matches_for(request_id)
    }

    pub fn create_engagement(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        response_id: &ResponseId,
        agreed_fee: Decimal,
    ) -> Result<Engagement, MarketplaceError> {
        self.engagements.create(actor, request_id, response_id, agreed_fee, Utc::now())
    }

    pub fn get_engagement(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
    ) -> Result<Engagement, MarketplaceError> {
        self.engagements.get(actor, engagement_id)
    }

    pub fn update_engagement_status(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
        update: StatusUpdate,
    ) -> Result<Engagement, MarketplaceError> {
        self.engagements.update_status(actor, engagement_id, update, Utc::now())
    }

    pub fn rate_engagement(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
        rating: u8,
        feedback: String,
    ) -> Result<EngagementRating, MarketplaceError> {
        self.engagements.submit_rating(actor, engagement_id, rating, feedback, Utc::now())
    }

    pub fn publish_gig(&self, actor: &Actor, draft: GigDraft) -> Result<Gig, MarketplaceError> {
        if actor.role != ActorRole::Provider {
            return Err(MarketplaceError::unauthorized(&actor.id, "publish gigs"));
        }
        self.orders.publish_gig(actor, draft.into_gig(actor.id.clone()))
    }

    pub fn get_gig(&self, gig_id: &GigId) -> Result<Gig, MarketplaceError> {
        self.orders.gig(gig_id)
    }

    pub fn place_order(
        &self,
        actor: &Actor,
        gig_id: &GigId,
        tier: PackageTier,
        answers: BTreeMap<String, String>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        if actor.role != ActorRole::Client {
            return Err(MarketplaceError::unauthorized(&actor.id, "place orders"));
        }
        self.orders.place_order(actor, gig_id, tier, answers, Utc::now())
    }

    pub fn get_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.get(actor, order_id)
    }

    pub fn list_deliveries(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<Vec<OrderDelivery>, MarketplaceError> {
        self.orders.deliveries(actor, order_id)
    }

    pub fn deliver_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        message: String,
        attachments: Vec<String>,
    ) -> Result<OrderDelivery, MarketplaceError> {
        self.orders.deliver(actor, order_id, message, attachments, Utc::now())
    }

    pub fn request_revision(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.request_revision(actor, order_id, Utc::now())
    }

    pub fn accept_delivery(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.accept_delivery(actor, order_id, Utc::now())
    }

    pub fn cancel_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.cancel(actor, order_id, Utc::now())
    }

    pub fn dispute_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.dispute(actor, order_id, Utc::now())
    }

    pub fn resolve_dispute(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        release_to_provider: bool,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.orders.resolve_dispute(actor, order_id, release_to_provider, Utc::now())
    }

    pub fn review_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        rating: u8,
        comment: String,
    ) -> Result<ServiceReview, MarketplaceError> {
        self.orders.review(actor, order_id, rating, comment, Utc::now())
    }
}
