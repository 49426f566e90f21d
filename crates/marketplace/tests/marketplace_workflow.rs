use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use marketplace::config::MarketplaceConfig;
use marketplace::workflows::marketplace::{
    marketplace_router, Actor, Budget, EngagementStatus, GeoIndex, GigDraft, GigPackage,
    GigRequirement, InMemoryMarketplaceStore, InMemoryNotificationSink, MarketplaceFacade,
    MarketplaceError, OrderStatus, PackageTier, PaymentPreference, PriceRange, ProviderProfile,
    ServiceAreaId, ServiceRequestDraft, StatusUpdate, UserId,
};
use rust_decimal::Decimal;
use tower::ServiceExt;

type Facade = MarketplaceFacade<InMemoryMarketplaceStore, InMemoryNotificationSink>;

fn facade() -> Facade {
    MarketplaceFacade::new(
        Arc::new(InMemoryMarketplaceStore::default()),
        Arc::new(InMemoryNotificationSink::default()),
        Arc::new(GeoIndex::new()),
        &MarketplaceConfig::default(),
    )
}

fn draft(amount: i64) -> ServiceRequestDraft {
    ServiceRequestDraft {
        service_area: ServiceAreaId("area3".to_string()),
        budget: Budget::Fixed {
            amount: Decimal::from(amount),
        },
        payment_preference: PaymentPreference::Milestones,
        timeline: "this quarter".to_string(),
        description: "migrate the books to a new ledger".to_string(),
        origin_postal_code: None,
        radius_miles: None,
    }
}

fn register(facade: &Facade, id: &str) -> Actor {
    let actor = Actor::provider(id);
    facade
        .register_provider(
            &actor,
            ProviderProfile {
                provider_id: UserId(id.to_string()),
                service_areas: BTreeSet::from([ServiceAreaId("area3".to_string())]),
                price_range: Some(PriceRange {
                    min: Decimal::from(800),
                    max: Decimal::from(1200),
                }),
                available: true,
                postal_code: None,
            },
        )
        .expect("provider registered");
    actor
}

fn standard_gig() -> GigDraft {
    GigDraft {
        service_area: ServiceAreaId("area3".to_string()),
        title: "Monthly bookkeeping".to_string(),
        packages: vec![
            GigPackage {
                tier: PackageTier::Basic,
                title: "One account".to_string(),
                price: Decimal::from(200),
                delivery_days: 3,
                revisions_included: 1,
            },
            GigPackage {
                tier: PackageTier::Standard,
                title: "Three accounts".to_string(),
                price: Decimal::from(450),
                delivery_days: 5,
                revisions_included: 2,
            },
        ],
        requirements: vec![GigRequirement {
            key: "ledger".to_string(),
            prompt: "Which ledger software do you use?".to_string(),
            required: true,
        }],
    }
}

#[test]
fn concurrent_responders_never_exceed_the_admission_limit() {
    let facade = facade();
    let owner = Actor::client("client-1");
    let providers: Vec<Actor> = (0..100)
        .map(|index| register(&facade, &format!("provider-{index:03}")))
        .collect();
    let request = facade
        .create_service_request(&owner, draft(1000))
        .expect("request created");

    let outcomes: Vec<Result<(), MarketplaceError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = providers
            .iter()
            .map(|provider| {
                let facade = &facade;
                let request_id = request.id.clone();
                scope.spawn(move || {
                    facade
                        .respond_to_request(provider, &request_id, "available".to_string())
                        .map(|_| ())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("responder thread"))
            .collect()
    });

    let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let limited = outcomes
        .iter()
        .filter(|outcome| {
            matches!(
                outcome,
                Err(MarketplaceError::AdmissionLimitExceeded { .. })
            )
        })
        .count();
    assert_eq!(admitted, 5);
    assert_eq!(limited, 95);

    let stored = facade
        .list_responses(&owner, &request.id)
        .expect("responses listed");
    assert_eq!(stored.len(), 5);
}

#[test]
fn duplicate_responses_are_rejected_idempotently() {
    let facade = facade();
    let owner = Actor::client("client-1");
    let provider = register(&facade, "provider-a");
    let request = facade
        .create_service_request(&owner, draft(1000))
        .expect("request created");

    facade
        .respond_to_request(&provider, &request.id, "first".to_string())
        .expect("admitted");
    for _ in 0..3 {
        let error = facade
            .respond_to_request(&provider, &request.id, "again".to_string())
            .expect_err("duplicate");
        assert_eq!(error.kind(), "duplicate");
    }
    assert_eq!(
        facade
            .list_responses(&owner, &request.id)
            .expect("listed")
            .len(),
        1
    );
}

#[test]
fn request_to_completed_engagement() {
    let facade = facade();
    let owner = Actor::client("client-1");
    let provider = register(&facade, "provider-a");
    let request = facade
        .create_service_request(&owner, draft(1000))
        .expect("request created");

    let matches = facade
        .get_matches_for_request(&owner, &request.id)
        .expect("matches");
    assert_eq!(matches[0].score, 100);

    let proposal = facade
        .respond_to_request(&provider, &request.id, "can start monday".to_string())
        .expect("admitted");
    let engagement = facade
        .create_engagement(&owner, &request.id, &proposal.id, Decimal::new(100000, 2))
        .expect("engagement created");
    assert_eq!(engagement.fees.marketplace_fee, Decimal::new(5000, 2));
    assert_eq!(engagement.fees.total_amount, Decimal::new(105000, 2));

    let skipped = facade
        .update_engagement_status(
            &owner,
            &engagement.id,
            StatusUpdate::to(EngagementStatus::Approved),
        )
        .expect_err("active cannot jump to approved");
    assert_eq!(skipped.kind(), "invalid_transition");

    for (actor, status) in [
        (&provider, EngagementStatus::InProgress),
        (&provider, EngagementStatus::Delivered),
        (&owner, EngagementStatus::Approved),
        (&owner, EngagementStatus::Completed),
    ] {
        facade
            .update_engagement_status(actor, &engagement.id, StatusUpdate::to(status))
            .expect("transition accepted");
    }

    let finished = facade
        .get_engagement(&owner, &engagement.id)
        .expect("engagement");
    assert_eq!(finished.status, EngagementStatus::Completed);
    assert_eq!(finished.status_history.len(), 5);
    facade
        .rate_engagement(&owner, &engagement.id, 5, "on time".to_string())
        .expect("rated");
}

#[test]
fn packaged_order_lifecycle() {
    let facade = facade();
    let owner = Actor::client("client-1");
    let provider = Actor::provider("bookkeeper-1");
    let gig = facade
        .publish_gig(&provider, standard_gig())
        .expect("gig published");
    let answers = BTreeMap::from([("ledger".to_string(), "GnuCash".to_string())]);

    let order = facade
        .place_order(&owner, &gig.id, PackageTier::Standard, answers)
        .expect("order placed");
    assert_eq!(
        order.delivery_deadline,
        order.placed_at + chrono::Duration::days(5)
    );
    assert_eq!(order.revisions_remaining, 2);

    let mut versions = Vec::new();
    for _ in 0..2 {
        versions.push(
            facade
                .deliver_order(&provider, &order.id, "draft".to_string(), Vec::new())
                .expect("delivered")
                .version,
        );
        facade
            .request_revision(&owner, &order.id)
            .expect("revision granted");
    }
    versions.push(
        facade
            .deliver_order(&provider, &order.id, "final".to_string(), Vec::new())
            .expect("delivered")
            .version,
    );
    assert_eq!(versions, vec![1, 2, 3]);

    let exhausted = facade
        .request_revision(&owner, &order.id)
        .expect_err("allowance used up");
    assert_eq!(exhausted.kind(), "precondition_failed");

    let early_review = facade
        .review_order(&owner, &order.id, 5, "great".to_string())
        .expect_err("not completed");
    assert_eq!(early_review.kind(), "precondition_failed");

    let completed = facade
        .accept_delivery(&owner, &order.id)
        .expect("accepted");
    assert_eq!(completed.status, OrderStatus::Completed);

    facade
        .review_order(&owner, &order.id, 5, "great".to_string())
        .expect("reviewed");
    let again = facade
        .review_order(&owner, &order.id, 4, "second thoughts".to_string())
        .expect_err("one review");
    assert_eq!(again.kind(), "duplicate");

    let gig = facade.get_gig(&gig.id).expect("gig");
    assert_eq!(gig.review_count, 1);
}

#[tokio::test]
async fn http_surface_reports_error_kinds() {
    let facade = Arc::new(facade());
    let owner = Actor::client("client-1");
    let request = facade
        .create_service_request(&owner, draft(1000))
        .expect("request created");
    let router = marketplace_router(facade.clone());

    let response = router
        .oneshot(
            Request::post(format!(
                "/api/v1/marketplace/requests/{}/responses",
                request.id
            ))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-actor-id", "nobody")
            .header("x-actor-role", "provider")
            .body(Body::from(r#"{"proposal_note":"hi"}"#))
            .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("body");
    let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["kind"], "not_found");
}
