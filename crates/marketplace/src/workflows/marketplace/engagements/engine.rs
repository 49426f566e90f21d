use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use super::domain::{
    Engagement, EngagementRating, EngagementStatus, FeeBreakdown, StatusHistoryEntry,
};
use crate::config::MarketplaceConfig;
use crate::workflows::marketplace::domain::{
    Actor, EngagementId, RatingId, RequestId, RequestStatus, ResponseId, ResponseStatus,
};
use crate::workflows::marketplace::error::{retry_on_stale, MarketplaceError};
use crate::workflows::marketplace::repository::{
    dispatch, EngagementRepository, MarketplaceEvent, NotificationSink, RepositoryError,
    RequestRepository, ResponseRepository,
};

/// Requested engagement transition plus optional audit notes and progress.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusUpdate {
    pub status: EngagementStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completion_percent: Option<u8>,
}

impl StatusUpdate {
    pub fn to(status: EngagementStatus) -> Self {
        Self {
            status,
            notes: None,
            completion_percent: None,
        }
    }
}

/// Turns accepted proposals into engagements and drives their lifecycle.
pub struct EngagementEngine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    fee_rate: Decimal,
    write_attempts: u32,
}

impl<S, N> EngagementEngine<S, N>
where
    S: RequestRepository + ResponseRepository + EngagementRepository + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: &MarketplaceConfig) -> Self {
        Self {
            store,
            notifier,
            fee_rate: config.marketplace_fee_rate,
            write_attempts: config.write_attempts,
        }
    }

    pub fn create(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        response_id: &ResponseId,
        agreed_fee: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Engagement, MarketplaceError> {
        if agreed_fee <= Decimal::ZERO {
            return Err(MarketplaceError::Validation(
                "agreed fee must be positive".to_string(),
            ));
        }

        let request = self
            .store
            .fetch_request(request_id)?
            .ok_or_else(|| MarketplaceError::not_found("request", request_id))?;
        if actor.id != request.client_id {
            return Err(MarketplaceError::unauthorized(&actor.id, "engage on this request"));
        }

        let response = self
            .store
            .fetch_response(response_id)?
            .ok_or_else(|| MarketplaceError::not_found("response", response_id))?;
        if response.request_id != request.id {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "response {} does not belong to request {}",
                response.id, request.id
            )));
        }
        if response.status == ResponseStatus::Rejected {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "response {} was declined",
                response.id
            )));
        }

        match request.status {
            RequestStatus::Open => {}
            RequestStatus::Engaged => return Err(duplicate_engagement(request_id)),
            RequestStatus::Closed => {
                return Err(MarketplaceError::PreconditionFailed(format!(
                    "request {} is closed",
                    request.id
                )))
            }
        }

        let fees = FeeBreakdown::compute(agreed_fee, self.fee_rate);
        let engagement = Engagement {
            id: EngagementId::generate(),
            request_id: request.id.clone(),
            response_id: response.id.clone(),
            client_id: request.client_id.clone(),
            provider_id: response.provider_id.clone(),
            service_area: request.service_area.clone(),
            status: EngagementStatus::Active,
            fees,
            progress_percentage: 0,
            status_history: vec![StatusHistoryEntry {
                from: None,
                to: EngagementStatus::Active,
                actor: actor.id.clone(),
                notes: None,
                recorded_at: now,
            }],
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        let stored = self
            .store
            .create_engagement(engagement)
            .map_err(|error| match error {
                RepositoryError::Conflict => duplicate_engagement(request_id),
                RepositoryError::Stale => MarketplaceError::PreconditionFailed(format!(
                    "request {request_id} is no longer open"
                )),
                other => other.into(),
            })?;

        info!(
            engagement_id = %stored.id,
            request_id = %stored.request_id,
            provider_id = %stored.provider_id,
            service_fee = %stored.fees.service_fee,
            marketplace_fee = %stored.fees.marketplace_fee,
            "engagement created"
        );
        Ok(stored)
    }

    pub fn get(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
    ) -> Result<Engagement, MarketplaceError> {
        let engagement = self.fetch(engagement_id)?;
        if !(actor.is_privileged() || engagement.is_participant(&actor.id)) {
            return Err(MarketplaceError::unauthorized(&actor.id, "view this engagement"));
        }
        Ok(engagement)
    }

    /// Validate and apply one transition. Conflicting concurrent writers are retried against
    /// fresh state, so history entries land in acceptance order.
    pub fn update_status(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Engagement, MarketplaceError> {
        if let Some(percent) = update.completion_percent {
            if percent > 100 {
                return Err(MarketplaceError::Validation(format!(
                    "completion percent {percent} exceeds 100"
                )));
            }
        }

        let (previous, updated) =
            retry_on_stale(self.write_attempts, "engagement_status", || {
                let current = self.fetch(engagement_id)?;
                if !(actor.is_privileged() || current.is_participant(&actor.id)) {
                    return Err(MarketplaceError::unauthorized(
                        &actor.id,
                        "update this engagement",
                    ));
                }

                let from = current.status;
                if !from.can_transition_to(update.status) {
                    return Err(MarketplaceError::InvalidTransition {
                        machine: "engagement",
                        from: from.label(),
                        to: update.status.label(),
                    });
                }

                let mut next = current.clone();
                next.status = update.status;
                next.updated_at = now;
                next.status_history.push(StatusHistoryEntry {
                    from: Some(from),
                    to: update.status,
                    actor: actor.id.clone(),
                    notes: update.notes.clone(),
                    recorded_at: now,
                });
                match update.completion_percent {
                    Some(percent) => next.progress_percentage = percent,
                    None if update.status == EngagementStatus::Completed => {
                        next.progress_percentage = 100
                    }
                    None => {}
                }

                let stored = self.store.replace_engagement(next, current.revision)?;
                Ok((from, stored))
            })?;

        info!(
            engagement_id = %updated.id,
            from = previous.label(),
            to = updated.status.label(),
            actor = %actor.id,
            "engagement status updated"
        );

        dispatch(
            self.notifier.as_ref(),
            MarketplaceEvent::EngagementStatusChanged {
                engagement_id: updated.id.clone(),
                from: previous,
                to: updated.status,
                actor: actor.id.clone(),
            },
        );
        if updated.status.is_resolution() {
            dispatch(
                self.notifier.as_ref(),
                MarketplaceEvent::EngagementResolved {
                    engagement_id: updated.id.clone(),
                    request_id: updated.request_id.clone(),
                    client_id: updated.client_id.clone(),
                    status: updated.status,
                },
            );
        }

        Ok(updated)
    }

    pub fn submit_rating(
        &self,
        actor: &Actor,
        engagement_id: &EngagementId,
        rating: u8,
        feedback: String,
        now: DateTime<Utc>,
    ) -> Result<EngagementRating, MarketplaceError> {
        validate_rating(rating)?;

        let engagement = self.fetch(engagement_id)?;
        if actor.id != engagement.client_id {
            return Err(MarketplaceError::unauthorized(&actor.id, "rate this engagement"));
        }
        if engagement.status != EngagementStatus::Completed {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "engagement {} is {}, ratings require completed",
                engagement.id,
                engagement.status.label()
            )));
        }

        let stored = self
            .store
            .insert_rating(EngagementRating {
                id: RatingId::generate(),
                engagement_id: engagement.id.clone(),
                client_id: engagement.client_id.clone(),
                provider_id: engagement.provider_id.clone(),
                rating,
                feedback,
                created_at: now,
            })
            .map_err(|error| match error {
                RepositoryError::Conflict => MarketplaceError::Duplicate {
                    entity: "rating",
                    key: engagement.id.to_string(),
                },
                other => other.into(),
            })?;

        info!(engagement_id = %engagement.id, rating, "engagement rated");
        Ok(stored)
    }

    fn fetch(&self, engagement_id: &EngagementId) -> Result<Engagement, MarketplaceError> {
        self.store
            .fetch_engagement(engagement_id)?
            .ok_or_else(|| MarketplaceError::not_found("engagement", engagement_id))
    }
}

fn duplicate_engagement(request_id: &RequestId) -> MarketplaceError {
    MarketplaceError::Duplicate {
        entity: "engagement",
        key: request_id.to_string(),
    }
}

pub(crate) fn validate_rating(rating: u8) -> Result<(), MarketplaceError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(MarketplaceError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )))
    }
}
