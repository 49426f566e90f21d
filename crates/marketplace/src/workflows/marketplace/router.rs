use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    Actor, ActorRole, EngagementId, GigId, OrderId, ProviderProfile, RequestId, ResponseId,
    ServiceRequestDraft, UserId,
};
use super::engagements::StatusUpdate;
use super::error::MarketplaceError;
use super::orders::{GigDraft, PackageTier};
use super::repository::{MarketplaceStore, NotificationSink, RepositoryError};
use super::service::MarketplaceFacade;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type Facade<S, N> = State<Arc<MarketplaceFacade<S, N>>>;

/// Router builder exposing the marketplace facade over HTTP.
pub fn marketplace_router<S, N>(facade: Arc<MarketplaceFacade<S, N>>) -> Router
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route("/api/v1/marketplace/providers", post(register_provider::<S, N>))
        .route(
            "/api/v1/marketplace/providers/:provider_id/eligible-requests",
            get(eligible_requests::<S, N>),
        )
        .route("/api/v1/marketplace/requests", post(create_request::<S, N>))
        .route(
            "/api/v1/marketplace/requests/:request_id",
            get(get_request::<S, N>),
        )
        .route(
            "/api/v1/marketplace/requests/:request_id/close",
            post(close_request::<S, N>),
        )
        .route(
            "/api/v1/marketplace/requests/:request_id/matches",
            get(request_matches::<S, N>),
        )
        .route(
            "/api/v1/marketplace/requests/:request_id/invitations",
            post(invite_providers::<S, N>),
        )
        .route(
            "/api/v1/marketplace/requests/:request_id/responses",
            post(respond_to_request::<S, N>).get(list_responses::<S, N>),
        )
        .route(
            "/api/v1/marketplace/responses/:response_id/decline",
            post(decline_response::<S, N>),
        )
        .route(
            "/api/v1/marketplace/engagements",
            post(create_engagement::<S, N>),
        )
        .route(
            "/api/v1/marketplace/engagements/:engagement_id",
            get(get_engagement::<S, N>),
        )
        .route(
            "/api/v1/marketplace/engagements/:engagement_id/status",
            post(update_engagement_status::<S, N>),
        )
        .route(
            "/api/v1/marketplace/engagements/:engagement_id/rating",
            post(rate_engagement::<S, N>),
        )
        .route("/api/v1/marketplace/gigs", post(publish_gig::<S, N>))
        .route("/api/v1/marketplace/gigs/:gig_id", get(get_gig::<S, N>))
        .route("/api/v1/marketplace/orders", post(place_order::<S, N>))
        .route(
            "/api/v1/marketplace/orders/:order_id",
            get(get_order::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/deliveries",
            post(deliver_order::<S, N>).get(list_deliveries::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/revision",
            post(request_revision::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/accept",
            post(accept_delivery::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/cancel",
            post(cancel_order::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/dispute",
            post(dispute_order::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/resolve",
            post(resolve_dispute::<S, N>),
        )
        .route(
            "/api/v1/marketplace/orders/:order_id/review",
            post(review_order::<S, N>),
        )
        .with_state(facade)
}

/// Caller identity supplied by the upstream identity layer through request headers.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<St> FromRequestParts<St> for RequestActor
where
    St: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(RequestActor)
    }
}

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let Some(id) = header(ACTOR_ID_HEADER) else {
        return Err(unauthenticated("missing x-actor-id header"));
    };
    let role = match header(ACTOR_ROLE_HEADER) {
        Some("client") => ActorRole::Client,
        Some("provider") => ActorRole::Provider,
        Some("admin") => ActorRole::Admin,
        Some(_) => return Err(unauthenticated("unknown x-actor-role")),
        None => return Err(unauthenticated("missing x-actor-role header")),
    };

    Ok(Actor {
        id: UserId(id.to_string()),
        role,
    })
}

fn unauthenticated(message: &str) -> Response {
    let payload = json!({
        "error": message,
        "kind": "unauthenticated",
    });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let status = match &self {
            MarketplaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            MarketplaceError::Duplicate { .. }
            | MarketplaceError::AdmissionLimitExceeded { .. }
            | MarketplaceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MarketplaceError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            MarketplaceError::PreconditionFailed(_) | MarketplaceError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            MarketplaceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            MarketplaceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            MarketplaceError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let payload = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(payload)).into_response()
    }
}

fn reply<T: Serialize>(status: StatusCode, result: Result<T, MarketplaceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsePayload {
    #[serde(default)]
    pub proposal_note: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EngagementPayload {
    pub request_id: RequestId,
    pub response_id: ResponseId,
    pub agreed_fee: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RatingPayload {
    pub rating: u8,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderPayload {
    pub gig_id: GigId,
    pub package: PackageTier,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeliveryPayload {
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolutionPayload {
    pub release_to_provider: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewPayload {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

async fn register_provider<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Json(profile): Json<ProviderProfile>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::OK, facade.register_provider(&actor, profile))
}

async fn eligible_requests<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(provider_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.list_eligible_requests(&actor, &UserId(provider_id)),
    )
}

pub(crate) async fn create_request<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Json(draft): Json<ServiceRequestDraft>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::CREATED, facade.create_service_request(&actor, draft))
}

async fn get_request<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(_actor): RequestActor,
    Path(request_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.get_service_request(&RequestId(request_id)),
    )
}

async fn close_request<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(request_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.close_service_request(&actor, &RequestId(request_id)),
    )
}

async fn request_matches<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(request_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.get_matches_for_request(&actor, &RequestId(request_id)),
    )
}

async fn invite_providers<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(request_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    let request_id = RequestId(request_id);
    match facade.invite_top_providers(&actor, &request_id) {
        Ok(invited) => {
            let payload = json!({
                "request_id": request_id,
                "invited": invited,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn respond_to_request<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(request_id): Path<String>,
    Json(payload): Json<ResponsePayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.respond_to_request(&actor, &RequestId(request_id), payload.proposal_note),
    )
}

async fn list_responses<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(request_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.list_responses(&actor, &RequestId(request_id)),
    )
}

async fn decline_response<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(response_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.decline_response(&actor, &ResponseId(response_id)),
    )
}

async fn create_engagement<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Json(payload): Json<EngagementPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.create_engagement(
            &actor,
            &payload.request_id,
            &payload.response_id,
            payload.agreed_fee,
        ),
    )
}

async fn get_engagement<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(engagement_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.get_engagement(&actor, &EngagementId(engagement_id)),
    )
}

pub(crate) async fn update_engagement_status<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(engagement_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.update_engagement_status(&actor, &EngagementId(engagement_id), update),
    )
}

async fn rate_engagement<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(engagement_id): Path<String>,
    Json(payload): Json<RatingPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.rate_engagement(
            &actor,
            &EngagementId(engagement_id),
            payload.rating,
            payload.feedback,
        ),
    )
}

async fn publish_gig<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Json(draft): Json<GigDraft>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::CREATED, facade.publish_gig(&actor, draft))
}

async fn get_gig<S, N>(State(facade): Facade<S, N>, Path(gig_id): Path<String>) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::OK, facade.get_gig(&GigId(gig_id)))
}

async fn place_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Json(payload): Json<OrderPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.place_order(&actor, &payload.gig_id, payload.package, payload.answers),
    )
}

async fn get_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::OK, facade.get_order(&actor, &OrderId(order_id)))
}

async fn list_deliveries<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.list_deliveries(&actor, &OrderId(order_id)),
    )
}

async fn deliver_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
    Json(payload): Json<DeliveryPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.deliver_order(
            &actor,
            &OrderId(order_id),
            payload.message,
            payload.attachments,
        ),
    )
}

async fn request_revision<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.request_revision(&actor, &OrderId(order_id)),
    )
}

async fn accept_delivery<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.accept_delivery(&actor, &OrderId(order_id)),
    )
}

async fn cancel_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(StatusCode::OK, facade.cancel_order(&actor, &OrderId(order_id)))
}

async fn dispute_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.dispute_order(&actor, &OrderId(order_id)),
    )
}

async fn resolve_dispute<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
    Json(payload): Json<ResolutionPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::OK,
        facade.resolve_dispute(&actor, &OrderId(order_id), payload.release_to_provider),
    )
}

async fn review_order<S, N>(
    State(facade): Facade<S, N>,
    RequestActor(actor): RequestActor,
    Path(order_id): Path<String>,
    Json(payload): Json<ReviewPayload>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    reply(
        StatusCode::CREATED,
        facade.review_order(
            &actor,
            &OrderId(order_id),
            payload.rating,
            payload.comment,
        ),
    )
}
