use super::common::*;
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::workflows::marketplace::domain::{
    Actor, MatchResponse, RequestStatus, ResponseStatus, ServiceRequest,
};
use crate::workflows::marketplace::engagements::{
    Engagement, EngagementEngine, EngagementStatus, StatusUpdate,
};
use crate::workflows::marketplace::error::MarketplaceError;
use crate::workflows::marketplace::memory::{InMemoryMarketplaceStore, InMemoryNotificationSink};
use crate::workflows::marketplace::repository::{
    MarketplaceEvent, NotificationSink, RequestRepository, ResponseRepository,
};

fn seed<S>(store: &S) -> (ServiceRequest, MatchResponse, Actor)
where
    S: RequestRepository + ResponseRepository,
{
    let provider = Actor::provider("provider-001");
    let request = store
        .insert_request(stored_request(&client(), "area3", 1000))
        .expect("request stored");
    let response = store
        .insert_response_within_limit(pending_response(&request, &provider), 5)
        .expect("response stored");
    (request, response, provider)
}

fn engine<N: NotificationSink + 'static>(
    notifier: Arc<N>,
) -> (EngagementEngine<InMemoryMarketplaceStore, N>, Arc<InMemoryMarketplaceStore>) {
    let store = Arc::new(InMemoryMarketplaceStore::default());
    (EngagementEngine::new(store.clone(), notifier, &config()), store)
}

fn engaged() -> (
    EngagementEngine<InMemoryMarketplaceStore, InMemoryNotificationSink>,
    Arc<InMemoryNotificationSink>,
    Engagement,
    Actor,
) {
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let (engine, store) = engine(notifier.clone());
    let (request, response, provider) = seed(store.as_ref());
    let engagement = engine
        .create(&client(), &request.id, &response.id, money(1000), at())
        .expect("engagement created");
    (engine, notifier, engagement, provider)
}

fn walk(
    engine: &EngagementEngine<InMemoryMarketplaceStore, InMemoryNotificationSink>,
    engagement: &Engagement,
    actor: &Actor,
    path: &[EngagementStatus],
) -> Engagement {
    let mut current = engagement.clone();
    for status in path {
        current = engine
            .update_status(actor, &engagement.id, StatusUpdate::to(*status), at())
            .unwrap_or_else(|error| panic!("transition to {status} failed: {error}"));
    }
    current
}

#[test]
fn create_computes_fees_and_engages_the_request() {
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let (engine, store) = engine(notifier);
    let (request, response, provider) = seed(store.as_ref());

    let engagement = engine
        .create(&client(), &request.id, &response.id, Decimal::new(100000, 2), at())
        .expect("engagement created");

    assert_eq!(engagement.fees.marketplace_fee, Decimal::new(5000, 2));
    assert_eq!(engagement.fees.total_amount, Decimal::new(105000, 2));
    assert_eq!(engagement.status, EngagementStatus::Active);
    assert_eq!(engagement.provider_id, provider.id);
    assert_eq!(engagement.status_history.len(), 1);
    assert_eq!(engagement.status_history[0].from, None);
    assert_eq!(engagement.status_history[0].to, EngagementStatus::Active);

    let stored_request = store
        .fetch_request(&request.id)
        .expect("fetch")
        .expect("present");
    assert_eq!(stored_request.status, RequestStatus::Engaged);
    let stored_response = store
        .fetch_response(&response.id)
        .expect("fetch")
        .expect("present");
    assert_eq!(stored_response.status, ResponseStatus::Accepted);
}

#[test]
fn marketplace_fee_rounds_half_away_from_zero() {
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let (engine, store) = engine(notifier);
    let (request, response, _) = seed(store.as_ref());

    let engagement = engine
        .create(&client(), &request.id, &response.id, Decimal::new(33333, 2), at())
        .expect("engagement created");

    assert_eq!(engagement.fees.marketplace_fee, Decimal::new(1667, 2));
    assert_eq!(engagement.fees.total_amount, Decimal::new(35000, 2));
}

#[test]
fn a_request_is_engaged_at_most_once() {
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let (engine, store) = engine(notifier);
    let (request, response, _) = seed(store.as_ref());
    let second = store
        .insert_response_within_limit(pending_response(&request, &Actor::provider("provider-002")), 5)
        .expect("second response stored");

    engine
        .create(&client(), &request.id, &response.id, money(1000), at())
        .expect("first engagement");
    match engine.create(&client(), &request.id, &second.id, money(900), at()) {
        Err(MarketplaceError::Duplicate { entity, .. }) => assert_eq!(entity, "engagement"),
        other => panic!("expected duplicate engagement, got {other:?}"),
    }
}

#[test]
fn create_checks_ownership_and_pairing() {
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let (engine, store) = engine(notifier);
    let (request, response, _) = seed(store.as_ref());
    let other_request = store
        .insert_request(stored_request(&client(), "area3", 500))
        .expect("stored");

    let stranger = engine
        .create(&Actor::client("client-2"), &request.id, &response.id, money(1000), at())
        .expect_err("stranger rejected");
    assert_eq!(stranger.kind(), "unauthorized");

    let mismatched = engine
        .create(&client(), &other_request.id, &response.id, money(1000), at())
        .expect_err("response belongs elsewhere");
    assert_eq!(mismatched.kind(), "precondition_failed");

    let free = engine
        .create(&client(), &request.id, &response.id, Decimal::ZERO, at())
        .expect_err("fee must be positive");
    assert_eq!(free.kind(), "validation");
}

#[test]
fn active_cannot_jump_to_approved() {
    let (engine, _, engagement, _) = engaged();

    match engine.update_status(
        &client(),
        &engagement.id,
        StatusUpdate::to(EngagementStatus::Approved),
        at(),
    ) {
        Err(MarketplaceError::InvalidTransition { machine, from, to }) => {
            assert_eq!(machine, "engagement");
            assert_eq!(from, "active");
            assert_eq!(to, "approved");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn delivered_approved_completed_succeeds_in_order() {
    let (engine, notifier, engagement, provider) = engaged();

    walk(
        &engine,
        &engagement,
        &provider,
        &[EngagementStatus::InProgress, EngagementStatus::Delivered],
    );
    let completed = walk(
        &engine,
        &engagement,
        &client(),
        &[EngagementStatus::Approved, EngagementStatus::Completed],
    );

    assert_eq!(completed.status, EngagementStatus::Completed);
    assert_eq!(completed.progress_percentage, 100);
    let trail: Vec<_> = completed
        .status_history
        .iter()
        .map(|entry| (entry.from, entry.to))
        .collect();
    assert_eq!(
        trail,
        vec![
            (None, EngagementStatus::Active),
            (Some(EngagementStatus::Active), EngagementStatus::InProgress),
            (Some(EngagementStatus::InProgress), EngagementStatus::Delivered),
            (Some(EngagementStatus::Delivered), EngagementStatus::Approved),
            (Some(EngagementStatus::Approved), EngagementStatus::Completed),
        ]
    );

    let resolved: Vec<_> = notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            MarketplaceEvent::EngagementResolved { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        resolved,
        vec![EngagementStatus::Approved, EngagementStatus::Completed]
    );
}

#[test]
fn terminal_states_accept_no_further_transitions() {
    let (engine, _, engagement, provider) = engaged();
    walk(
        &engine,
        &engagement,
        &provider,
        &[EngagementStatus::InProgress, EngagementStatus::Cancelled],
    );

    let error = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect_err("cancelled is terminal");
    assert_eq!(error.kind(), "invalid_transition");
}

#[test]
fn progress_and_notes_are_recorded() {
    let (engine, _, engagement, provider) = engaged();
    let updated = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate {
                status: EngagementStatus::InProgress,
                notes: Some("kick-off call done".to_string()),
                completion_percent: Some(20),
            },
            at(),
        )
        .expect("update applied");

    assert_eq!(updated.progress_percentage, 20);
    let last = updated.status_history.last().expect("history entry");
    assert_eq!(last.notes.as_deref(), Some("kick-off call done"));
    assert_eq!(last.actor, provider.id);

    let error = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate {
                status: EngagementStatus::Delivered,
                notes: None,
                completion_percent: Some(120),
            },
            at(),
        )
        .expect_err("percent out of range");
    assert_eq!(error.kind(), "validation");
}

#[test]
fn outsiders_cannot_drive_an_engagement() {
    let (engine, _, engagement, _) = engaged();
    let error = engine
        .update_status(
            &Actor::provider("provider-999"),
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect_err("not a participant");
    assert_eq!(error.kind(), "unauthorized");

    engine
        .update_status(
            &Actor::admin("ops"),
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect("admin may drive");
}

#[test]
fn ratings_require_completion_and_are_unique() {
    let (engine, _, engagement, provider) = engaged();

    let early = engine
        .submit_rating(&client(), &engagement.id, 5, "great".to_string(), at())
        .expect_err("not completed yet");
    assert_eq!(early.kind(), "precondition_failed");

    walk(
        &engine,
        &engagement,
        &provider,
        &[EngagementStatus::InProgress, EngagementStatus::Delivered],
    );
    walk(
        &engine,
        &engagement,
        &client(),
        &[EngagementStatus::Approved, EngagementStatus::Completed],
    );

    let invalid = engine
        .submit_rating(&client(), &engagement.id, 6, String::new(), at())
        .expect_err("out of range");
    assert_eq!(invalid.kind(), "validation");

    let by_provider = engine
        .submit_rating(&provider, &engagement.id, 5, String::new(), at())
        .expect_err("only the client rates");
    assert_eq!(by_provider.kind(), "unauthorized");

    let rating = engine
        .submit_rating(&client(), &engagement.id, 4, "solid work".to_string(), at())
        .expect("rating stored");
    assert_eq!(rating.rating, 4);
    assert_eq!(rating.provider_id, provider.id);

    let again = engine
        .submit_rating(&client(), &engagement.id, 5, "again".to_string(), at())
        .expect_err("one rating per engagement");
    assert_eq!(again.kind(), "duplicate");
}

#[test]
fn lost_races_are_retried_transparently() {
    let store = Arc::new(ContendedStore::failing(2));
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let engine = EngagementEngine::new(store.clone(), notifier, &config());
    let (request, response, provider) = seed(store.as_ref());
    let engagement = engine
        .create(&client(), &request.id, &response.id, money(1000), at())
        .expect("engagement created");

    let updated = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect("retried until the write lands");

    assert_eq!(updated.status, EngagementStatus::InProgress);
    assert_eq!(updated.status_history.len(), 2);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_retries_surface_as_contention() {
    let store = Arc::new(ContendedStore::failing(u32::MAX));
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let engine = EngagementEngine::new(store.clone(), notifier, &config());
    let (request, response, provider) = seed(store.as_ref());
    let engagement = engine
        .create(&client(), &request.id, &response.id, money(1000), at())
        .expect("engagement created");

    let error = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect_err("never lands");
    assert_eq!(error.kind(), "contention");
    assert_eq!(
        store.attempts.load(Ordering::SeqCst),
        config().write_attempts
    );
}

#[test]
fn notification_failures_do_not_fail_transitions() {
    let (engine, store) = engine(Arc::new(OfflineSink));
    let (request, response, provider) = seed(store.as_ref());
    let engagement = engine
        .create(&client(), &request.id, &response.id, money(1000), at())
        .expect("engagement created");

    let updated = engine
        .update_status(
            &provider,
            &engagement.id,
            StatusUpdate::to(EngagementStatus::InProgress),
            at(),
        )
        .expect("dispatch failure is swallowed");
    assert_eq!(updated.status, EngagementStatus::InProgress);
}
