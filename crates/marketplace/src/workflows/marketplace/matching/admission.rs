use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::geo::GeoIndex;
use super::scoring;
use crate::config::MarketplaceConfig;
use crate::workflows::marketplace::domain::{
    Actor, ActorRole, EligibleRequest, MatchResponse, RequestId, RequestStatus, ResponseId,
    ResponseStatus, ScoredProvider, ServiceRequest, UserId,
};
use crate::workflows::marketplace::error::MarketplaceError;
use crate::workflows::marketplace::repository::{
    dispatch, MarketplaceEvent, NotificationSink, ProviderDirectory, RepositoryError,
    RequestRepository, ResponseRepository,
};

/// Ranks providers for requests and caps how many of them may respond.
pub struct AdmissionController<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    geo: Arc<GeoIndex>,
    admission_limit: usize,
    invite_limit: usize,
}

impl<S, N> AdmissionController<S, N>
where
    S: RequestRepository + ProviderDirectory + ResponseRepository + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        geo: Arc<GeoIndex>,
        config: &MarketplaceConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            geo,
            admission_limit: config.admission_limit,
            invite_limit: config.invite_limit,
        }
    }

    /// Ranked candidates for a request, with radius filtering when geo data allows it.
    pub fn matches_for(&self, request_id: &RequestId) -> Result<Vec<ScoredProvider>, MarketplaceError> {
        let request = self.fetch_request(request_id)?;
        self.rank(&request)
    }

    fn rank(&self, request: &ServiceRequest) -> Result<Vec<ScoredProvider>, MarketplaceError> {
        let candidates = self.store.profiles()?;
        let invited = self.store.invited_providers(&request.id)?;
        Ok(scoring::rank(request, &candidates, &self.geo, &invited))
    }

    /// Push the top-N ranked providers an invitation. Invites do not reserve response slots.
    pub fn invite_top(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<UserId>, MarketplaceError> {
        let request = self.fetch_request(request_id)?;
        if !actor.owns_or_privileged(&request.client_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "invite providers"));
        }
        if request.status != RequestStatus::Open {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "request {} is {}",
                request.id,
                request.status.label()
            )));
        }

        let top: Vec<UserId> = self
            .rank(&request)?
            .into_iter()
            .take(self.invite_limit)
            .map(|candidate| candidate.provider_id)
            .collect();

        self.store.record_invitations(&request.id, &top)?;
        info!(request_id = %request.id, invited = top.len(), "providers invited");
        dispatch(
            self.notifier.as_ref(),
            MarketplaceEvent::ProvidersInvited {
                request_id: request.id.clone(),
                providers: top.clone(),
            },
        );
        Ok(top)
    }

    /// Admit a proposal if the request is open and still has a free slot. The store repeats
    /// the open check alongside the duplicate check, count, and insert in one conditional write.
    pub fn respond(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        proposal_note: String,
        now: DateTime<Utc>,
    ) -> Result<MatchResponse, MarketplaceError> {
        if actor.role != ActorRole::Provider {
            return Err(MarketplaceError::unauthorized(&actor.id, "respond to requests"));
        }
        self.store
            .fetch_profile(&actor.id)?
            .ok_or_else(|| MarketplaceError::not_found("provider profile", &actor.id))?;

        let request = self.fetch_request(request_id)?;
        if request.status != RequestStatus::Open {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "request {} is {} and no longer accepts responses",
                request.id,
                request.status.label()
            )));
        }

        let response = MatchResponse {
            id: ResponseId::generate(),
            request_id: request.id.clone(),
            provider_id: actor.id.clone(),
            proposal_note,
            status: ResponseStatus::Pending,
            created_at: now,
        };

        match self
            .store
            .insert_response_within_limit(response, self.admission_limit)
        {
            Ok(stored) => {
                info!(
                    request_id = %stored.request_id,
                    provider_id = %stored.provider_id,
                    response_id = %stored.id,
                    "response admitted"
                );
                Ok(stored)
            }
            Err(RepositoryError::Conflict) => Err(MarketplaceError::Duplicate {
                entity: "response",
                key: format!("{}/{}", request.id, actor.id),
            }),
            Err(RepositoryError::LimitReached { limit }) => {
                warn!(request_id = %request.id, provider_id = %actor.id, limit, "admission limit reached");
                Err(MarketplaceError::AdmissionLimitExceeded {
                    request_id: request.id,
                    limit,
                })
            }
            Err(RepositoryError::Stale) => Err(MarketplaceError::PreconditionFailed(format!(
                "request {} stopped accepting responses before admission",
                request.id
            ))),
            Err(other) => Err(other.into()),
        }
    }

    /// Request owner turns down a pending proposal. The admission slot stays consumed.
    pub fn decline(
        &self,
        actor: &Actor,
        response_id: &ResponseId,
    ) -> Result<MatchResponse, MarketplaceError> {
        let response = self
            .store
            .fetch_response(response_id)?
            .ok_or_else(|| MarketplaceError::not_found("response", response_id))?;
        let request = self.fetch_request(&response.request_id)?;
        if !actor.owns_or_privileged(&request.client_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "decline responses"));
        }

        let declined = self
            .store
            .transition_response(response_id, ResponseStatus::Pending, ResponseStatus::Rejected)
            .map_err(|error| match error {
                RepositoryError::Stale => MarketplaceError::InvalidTransition {
                    machine: "response",
                    from: response.status.label(),
                    to: ResponseStatus::Rejected.label(),
                },
                other => other.into(),
            })?;
        info!(response_id = %declined.id, "response declined");
        Ok(declined)
    }

    pub fn responses(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<MatchResponse>, MarketplaceError> {
        let request = self.fetch_request(request_id)?;
        if !actor.owns_or_privileged(&request.client_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "list responses"));
        }
        Ok(self.store.responses_for_request(request_id)?)
    }

    /// Open or engaged requests in the provider's areas whose budget clears the fit floor.
    pub fn eligible_requests_for(
        &self,
        provider_id: &UserId,
    ) -> Result<Vec<EligibleRequest>, MarketplaceError> {
        let profile = self
            .store
            .fetch_profile(provider_id)?
            .ok_or_else(|| MarketplaceError::not_found("provider profile", provider_id))?;

        let requests = self
            .store
            .requests_with_status(&[RequestStatus::Open, RequestStatus::Engaged])?;

        let mut eligible = Vec::new();
        for request in requests {
            if !profile.serves(&request.service_area) || !scoring::budget_passes(&request, &profile)
            {
                continue;
            }
            let invited = self
                .store
                .invited_providers(&request.id)?
                .contains(provider_id);
            eligible.push(EligibleRequest { request, invited });
        }
        Ok(eligible)
    }

    fn fetch_request(&self, request_id: &RequestId) -> Result<ServiceRequest, MarketplaceError> {
        self.store
            .fetch_request(request_id)?
            .ok_or_else(|| MarketplaceError::not_found("request", request_id))
    }
}
