use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::domain::{
    EscrowStatus, Gig, OrderDelivery, OrderStatus, PackageTier, ServiceOrder, ServiceReview,
};
use crate::config::MarketplaceConfig;
use crate::workflows::marketplace::domain::{Actor, DeliveryId, GigId, OrderId, ReviewId};
use crate::workflows::marketplace::engagements::validate_rating;
use crate::workflows::marketplace::error::{retry_on_stale, MarketplaceError};
use crate::workflows::marketplace::repository::{
    dispatch, GigCatalog, MarketplaceEvent, NotificationSink, OrderRepository, RepositoryError,
};

/// Who may drive a given order transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Client,
    Provider,
    EitherParty,
    Operator,
}

impl Party {
    fn permits(self, actor: &Actor, order: &ServiceOrder) -> bool {
        match self {
            Party::Client => actor.id == order.client_id,
            Party::Provider => actor.id == order.provider_id,
            Party::EitherParty => actor.is_privileged() || order.is_party(&actor.id),
            Party::Operator => actor.is_privileged(),
        }
    }
}

/// Packaged-gig orders: placement, deliveries, revisions, escrow labels, and reviews.
pub struct OrderFulfillmentEngine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    write_attempts: u32,
}

impl<S, N> OrderFulfillmentEngine<S, N>
where
    S: GigCatalog + OrderRepository + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: &MarketplaceConfig) -> Self {
        Self {
            store,
            notifier,
            write_attempts: config.write_attempts,
        }
    }

    pub fn publish_gig(&self, actor: &Actor, gig: Gig) -> Result<Gig, MarketplaceError> {
        if !actor.owns_or_privileged(&gig.provider_id) {
            return Err(MarketplaceError::unauthorized(&actor.id, "publish this gig"));
        }
        if gig.packages.is_empty() || gig.packages.len() > 3 {
            return Err(MarketplaceError::Validation(
                "a gig offers between one and three packages".to_string(),
            ));
        }
        let mut tiers: Vec<PackageTier> = gig.packages.iter().map(|p| p.tier).collect();
        tiers.sort();
        tiers.dedup();
        if tiers.len() != gig.packages.len() {
            return Err(MarketplaceError::Validation(
                "package tiers must be unique".to_string(),
            ));
        }
        if gig.packages.iter().any(|p| p.price.is_sign_negative()) {
            return Err(MarketplaceError::Validation(
                "package prices cannot be negative".to_string(),
            ));
        }

        let stored = self.store.upsert_gig(gig)?;
        info!(gig_id = %stored.id, provider_id = %stored.provider_id, "gig published");
        Ok(stored)
    }

    pub fn gig(&self, gig_id: &GigId) -> Result<Gig, MarketplaceError> {
        self.store
            .fetch_gig(gig_id)?
            .ok_or_else(|| MarketplaceError::not_found("gig", gig_id))
    }

    /// Place an order on one package. Funds are labelled `held` and work starts immediately.
    pub fn place_order(
        &self,
        actor: &Actor,
        gig_id: &GigId,
        tier: PackageTier,
        answers: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        let gig = self.gig(gig_id)?;
        if actor.id == gig.provider_id {
            return Err(MarketplaceError::PreconditionFailed(
                "providers cannot order their own gig".to_string(),
            ));
        }

        let package = gig.package(tier).ok_or_else(|| {
            MarketplaceError::not_found("package", format!("{}/{}", gig.id, tier.label()))
        })?;

        let missing = gig.missing_answers(&answers);
        if !missing.is_empty() {
            return Err(MarketplaceError::Validation(format!(
                "missing required answers: {}",
                missing.join(", ")
            )));
        }

        let order = ServiceOrder {
            id: OrderId::generate(),
            gig_id: gig.id.clone(),
            package: tier,
            client_id: actor.id.clone(),
            provider_id: gig.provider_id.clone(),
            price: package.price,
            placed_at: now,
            delivery_deadline: now + Duration::days(i64::from(package.delivery_days)),
            answers,
            status: OrderStatus::InProgress,
            escrow_status: EscrowStatus::Held,
            revisions_remaining: package.revisions_included,
            updated_at: now,
            revision: 0,
        };

        let stored = self.store.insert_order(order)?;
        info!(
            order_id = %stored.id,
            gig_id = %stored.gig_id,
            package = tier.label(),
            price = %stored.price,
            deadline = %stored.delivery_deadline,
            "order placed"
        );
        Ok(stored)
    }

    pub fn get(&self, actor: &Actor, order_id: &OrderId) -> Result<ServiceOrder, MarketplaceError> {
        let order = self.fetch(order_id)?;
        if !Party::EitherParty.permits(actor, &order) {
            return Err(MarketplaceError::unauthorized(&actor.id, "view this order"));
        }
        Ok(order)
    }

    pub fn deliveries(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> Result<Vec<OrderDelivery>, MarketplaceError> {
        self.get(actor, order_id)?;
        Ok(self.store.deliveries(order_id)?)
    }

    /// Submit (or resubmit) work. Versions are assigned from the stored delivery count and
    /// the order swap is conditional, so racing deliveries cannot share a version.
    pub fn deliver(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        message: String,
        attachments: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<OrderDelivery, MarketplaceError> {
        let (from, order, delivery) = retry_on_stale(self.write_attempts, "order_delivery", || {
            let current = self.fetch(order_id)?;
            if !Party::Provider.permits(actor, &current) {
                return Err(MarketplaceError::unauthorized(&actor.id, "deliver this order"));
            }
            if !current.status.accepts_delivery() {
                return Err(invalid_transition(current.status, OrderStatus::Delivered));
            }

            let prior = self.store.deliveries(order_id)?.len();
            let version = u32::try_from(prior + 1).map_err(|_| {
                MarketplaceError::PreconditionFailed("delivery limit reached".to_string())
            })?;

            let mut next = current.clone();
            next.status = OrderStatus::Delivered;
            next.updated_at = now;

            let delivery = OrderDelivery {
                id: DeliveryId::generate(),
                order_id: current.id.clone(),
                version,
                message: message.clone(),
                attachments: attachments.clone(),
                delivered_at: now,
            };

            let (order, delivery) =
                self.store
                    .record_delivery(next, current.revision, delivery)?;
            Ok((current.status, order, delivery))
        })?;

        info!(order_id = %order.id, version = delivery.version, "order delivered");
        self.announce(&order, from, actor);
        Ok(delivery)
    }

    /// Client asks for another pass. Consumes one included revision.
    pub fn request_revision(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        let current = self.fetch(order_id)?;
        if Party::Client.permits(actor, &current) && current.revisions_remaining == 0 {
            return Err(no_revisions_left(&current));
        }

        self.transition(
            actor,
            order_id,
            OrderStatus::RevisionRequested,
            Party::Client,
            "request a revision",
            now,
            |order| {
                order.revisions_remaining = order
                    .revisions_remaining
                    .checked_sub(1)
                    .ok_or_else(|| no_revisions_left(order))?;
                Ok(())
            },
        )
    }

    /// Client accepts a `delivered` order; escrow is released.
    pub fn accept_delivery(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.transition(
            actor,
            order_id,
            OrderStatus::Completed,
            Party::Client,
            "accept this delivery",
            now,
            |order| {
                // disputed -> completed belongs to resolve_dispute
                if order.status != OrderStatus::Delivered {
                    return Err(invalid_transition(order.status, OrderStatus::Completed));
                }
                move_escrow(order, EscrowStatus::Released)
            },
        )
    }

    pub fn cancel(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.transition(
            actor,
            order_id,
            OrderStatus::Cancelled,
            Party::EitherParty,
            "cancel this order",
            now,
            refund_if_held,
        )
    }

    pub fn dispute(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        self.transition(
            actor,
            order_id,
            OrderStatus::Disputed,
            Party::EitherParty,
            "dispute this order",
            now,
            |_| Ok(()),
        )
    }

    /// Operator closes a dispute either in the provider's favour (release) or the client's
    /// (refund).
    pub fn resolve_dispute(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        release_to_provider: bool,
        now: DateTime<Utc>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        let current = self.fetch(order_id)?;
        if current.status != OrderStatus::Disputed {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "order {} is {}, not disputed",
                current.id,
                current.status.label()
            )));
        }

        if release_to_provider {
            self.transition(
                actor,
                order_id,
                OrderStatus::Completed,
                Party::Operator,
                "resolve disputes",
                now,
                |order| move_escrow(order, EscrowStatus::Released),
            )
        } else {
            self.transition(
                actor,
                order_id,
                OrderStatus::Cancelled,
                Party::Operator,
                "resolve disputes",
                now,
                refund_if_held,
            )
        }
    }

    /// One review per (order, client), only once the order completed. Updates the gig's
    /// running rating.
    pub fn review(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        rating: u8,
        comment: String,
        now: DateTime<Utc>,
    ) -> Result<ServiceReview, MarketplaceError> {
        validate_rating(rating)?;

        let order = self.fetch(order_id)?;
        if !Party::Client.permits(actor, &order) {
            return Err(MarketplaceError::unauthorized(&actor.id, "review this order"));
        }
        if order.status != OrderStatus::Completed {
            return Err(MarketplaceError::PreconditionFailed(format!(
                "order {} is {}, reviews require completed",
                order.id,
                order.status.label()
            )));
        }

        let (review, gig) = self
            .store
            .insert_review(ServiceReview {
                id: ReviewId::generate(),
                order_id: order.id.clone(),
                gig_id: order.gig_id.clone(),
                reviewer_id: actor.id.clone(),
                provider_id: order.provider_id.clone(),
                rating,
                comment,
                created_at: now,
            })
            .map_err(|error| match error {
                RepositoryError::Conflict => MarketplaceError::Duplicate {
                    entity: "review",
                    key: format!("{}/{}", order.id, actor.id),
                },
                other => other.into(),
            })?;

        info!(
            order_id = %order.id,
            gig_id = %gig.id,
            rating,
            average_rating = gig.average_rating,
            review_count = gig.review_count,
            "order reviewed"
        );
        Ok(review)
    }

    fn transition(
        &self,
        actor: &Actor,
        order_id: &OrderId,
        target: OrderStatus,
        party: Party,
        action: &'static str,
        now: DateTime<Utc>,
        apply: impl Fn(&mut ServiceOrder) -> Result<(), MarketplaceError>,
    ) -> Result<ServiceOrder, MarketplaceError> {
        let (from, stored) = retry_on_stale(self.write_attempts, action, || {
            let current = self.fetch(order_id)?;
            if !party.permits(actor, &current) {
                return Err(MarketplaceError::unauthorized(&actor.id, action));
            }

            ensure_transition(current.status, target)?;
            let mut next = current.clone();
            apply(&mut next)?;
            next.status = target;
            next.updated_at = now;

            let stored = self.store.replace_order(next, current.revision)?;
            Ok((current.status, stored))
        })?;

        info!(
            order_id = %stored.id,
            from = from.label(),
            to = stored.status.label(),
            escrow = stored.escrow_status.label(),
            "order status updated"
        );
        self.announce(&stored, from, actor);
        Ok(stored)
    }

    fn announce(&self, order: &ServiceOrder, from: OrderStatus, actor: &Actor) {
        dispatch(
            self.notifier.as_ref(),
            MarketplaceEvent::OrderStatusChanged {
                order_id: order.id.clone(),
                from,
                to: order.status,
                actor: actor.id.clone(),
            },
        );
    }

    fn fetch(&self, order_id: &OrderId) -> Result<ServiceOrder, MarketplaceError> {
        self.store
            .fetch_order(order_id)?
            .ok_or_else(|| MarketplaceError::not_found("order", order_id))
    }
}

fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), MarketplaceError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(invalid_transition(from, to))
    }
}

fn invalid_transition(from: OrderStatus, to: OrderStatus) -> MarketplaceError {
    MarketplaceError::InvalidTransition {
        machine: "order",
        from: from.label(),
        to: to.label(),
    }
}

fn move_escrow(order: &mut ServiceOrder, target: EscrowStatus) -> Result<(), MarketplaceError> {
    if !order.escrow_status.can_transition_to(target) {
        return Err(MarketplaceError::InvalidTransition {
            machine: "escrow",
            from: order.escrow_status.label(),
            to: target.label(),
        });
    }
    order.escrow_status = target;
    Ok(())
}

/// Held funds are refunded; funds never reserved stay `pending`.
fn refund_if_held(order: &mut ServiceOrder) -> Result<(), MarketplaceError> {
    if order.escrow_status == EscrowStatus::Held {
        move_escrow(order, EscrowStatus::Refunded)
    } else {
        Ok(())
    }
}

fn no_revisions_left(order: &ServiceOrder) -> MarketplaceError {
    MarketplaceError::PreconditionFailed(format!(
        "order {} has no revisions remaining",
        order.id
    ))
}
