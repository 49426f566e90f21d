use crate::infra::{sample_geo_index, seed_marketplace};
use clap::Args;
use marketplace::config::MarketplaceConfig;
use marketplace::error::AppError;
use marketplace::workflows::marketplace::{
    Actor, Budget, Engagement, EngagementStatus, Gig, InMemoryMarketplaceStore,
    InMemoryNotificationSink, MarketplaceError, MarketplaceFacade, PackageTier, PaymentPreference,
    ServiceAreaId, ServiceRequestDraft, StatusUpdate,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

type DemoFacade = MarketplaceFacade<InMemoryMarketplaceStore, InMemoryNotificationSink>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Fee the client agrees with the chosen provider. Defaults to 1500.
    #[arg(long)]
    pub(crate) agreed_fee: Option<Decimal>,
    /// Origin postal code for the request radius filter.
    #[arg(long, default_value = "10001")]
    pub(crate) postal_code: String,
    /// Radius around the origin postal code, in miles.
    #[arg(long, default_value_t = 25.0)]
    pub(crate) radius_miles: f64,
    /// Skip the packaged-gig order portion of the demo.
    #[arg(long)]
    pub(crate) skip_orders: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        agreed_fee,
        postal_code,
        radius_miles,
        skip_orders,
    } = args;

    let notifier = Arc::new(InMemoryNotificationSink::default());
    let facade = MarketplaceFacade::new(
        Arc::new(InMemoryMarketplaceStore::default()),
        notifier.clone(),
        Arc::new(sample_geo_index()?),
        &MarketplaceConfig::default(),
    );
    let gig = seed_marketplace(&facade)?;

    println!("Service marketplace demo");
    let engagement = run_request_flow(
        &facade,
        agreed_fee.unwrap_or_else(|| Decimal::from(1_500)),
        postal_code,
        radius_miles,
    )?;
    render_engagement(&engagement);

    if !skip_orders {
        run_order_flow(&facade, &gig)?;
    }

    println!("\nNotifications dispatched");
    for event in notifier.events() {
        match serde_json::to_string(&event) {
            Ok(json) => println!("  - {json}"),
            Err(err) => println!("  - {} (unserializable: {err})", event.name()),
        }
    }

    Ok(())
}

fn run_request_flow(
    facade: &DemoFacade,
    agreed_fee: Decimal,
    postal_code: String,
    radius_miles: f64,
) -> Result<Engagement, AppError> {
    let client = Actor::client("client-demo");
    let request = facade.create_service_request(
        &client,
        ServiceRequestDraft {
            service_area: ServiceAreaId("area3".to_string()),
            budget: Budget::Range {
                min: Decimal::from(1_000),
                max: Decimal::from(2_000),
            },
            payment_preference: PaymentPreference::Milestones,
            timeline: "before quarter close".to_string(),
            description: "Reconcile ledgers and prepare quarterly filings".to_string(),
            origin_postal_code: Some(postal_code.clone()),
            radius_miles: Some(radius_miles),
        },
    )?;
    println!(
        "\nRequest {} opened in {} within {:.0} miles of {}",
        request.id, request.service_area, radius_miles, postal_code
    );

    let matches = facade.get_matches_for_request(&client, &request.id)?;
    println!("Ranked providers:");
    for candidate in &matches {
        let distance = candidate
            .distance_miles
            .map(|miles| format!("{miles:.1} mi"))
            .unwrap_or_else(|| "distance unknown".to_string());
        println!(
            "  {:<20} score {:>3}  {}",
            candidate.provider_id, candidate.score, distance
        );
    }

    let invited = facade.invite_top_providers(&client, &request.id)?;
    println!("Invited {} provider(s)", invited.len());

    for provider_id in &invited {
        let provider = Actor::provider(provider_id.0.clone());
        match facade.respond_to_request(
            &provider,
            &request.id,
            "Available this week with a fixed-fee proposal".to_string(),
        ) {
            Ok(response) => println!("  {} responded ({})", provider_id, response.id),
            Err(err) => println!("  {} could not respond: {err}", provider_id),
        }
    }

    let responses = facade.list_responses(&client, &request.id)?;
    let Some(chosen) = responses.first() else {
        return Err(AppError::from(MarketplaceError::PreconditionFailed(
            "no provider responded to the demo request".to_string(),
        )));
    };

    let engagement = facade.create_engagement(&client, &request.id, &chosen.id, agreed_fee)?;
    let provider = Actor::provider(engagement.provider_id.0.clone());

    facade.update_engagement_status(
        &provider,
        &engagement.id,
        StatusUpdate {
            status: EngagementStatus::InProgress,
            notes: Some("kick-off call held".to_string()),
            completion_percent: Some(20),
        },
    )?;
    facade.update_engagement_status(
        &provider,
        &engagement.id,
        StatusUpdate {
            status: EngagementStatus::Delivered,
            notes: Some("filings uploaded for review".to_string()),
            completion_percent: Some(90),
        },
    )?;
    facade.update_engagement_status(
        &client,
        &engagement.id,
        StatusUpdate::to(EngagementStatus::Approved),
    )?;
    let engagement = facade.update_engagement_status(
        &client,
        &engagement.id,
        StatusUpdate::to(EngagementStatus::Completed),
    )?;

    let rating = facade.rate_engagement(
        &client,
        &engagement.id,
        5,
        "Clear communication and on time".to_string(),
    )?;
    println!("Client rated {} {}/5", rating.provider_id, rating.rating);

    Ok(engagement)
}

fn render_engagement(engagement: &Engagement) {
    println!(
        "\nEngagement {} with {}: {} ({}% complete)",
        engagement.id,
        engagement.provider_id,
        engagement.status,
        engagement.progress_percentage
    );
    println!(
        "  Service fee {} + marketplace fee {} = {}",
        engagement.fees.service_fee, engagement.fees.marketplace_fee, engagement.fees.total_amount
    );
    println!("  History:");
    for entry in &engagement.status_history {
        let from = entry
            .from
            .map(|status| status.label())
            .unwrap_or("created");
        println!(
            "    {:<12} -> {:<12} by {}{}",
            from,
            entry.to.label(),
            entry.actor,
            entry
                .notes
                .as_deref()
                .map(|notes| format!(" ({notes})"))
                .unwrap_or_default()
        );
    }
}

fn run_order_flow(facade: &DemoFacade, gig: &Gig) -> Result<(), AppError> {
    let client = Actor::client("client-studio");
    let provider = Actor::provider(gig.provider_id.0.clone());

    let mut answers = BTreeMap::new();
    answers.insert("brand_name".to_string(), "Northwind Coffee".to_string());
    let order = facade.place_order(&client, &gig.id, PackageTier::Standard, answers)?;
    println!(
        "\nOrder {} on '{}' ({} package) for {}, due {}",
        order.id,
        gig.title,
        order.package.label(),
        order.price,
        order.delivery_deadline.format("%Y-%m-%d")
    );

    facade.deliver_order(
        &provider,
        &order.id,
        "First logo concepts".to_string(),
        vec!["concepts-v1.pdf".to_string()],
    )?;
    let revised = facade.request_revision(&client, &order.id)?;
    println!(
        "  Revision requested; {} revision(s) remaining",
        revised.revisions_remaining
    );
    facade.deliver_order(
        &provider,
        &order.id,
        "Refined mark with palette".to_string(),
        vec!["concepts-v2.pdf".to_string(), "palette.png".to_string()],
    )?;

    for delivery in facade.list_deliveries(&client, &order.id)? {
        println!("  Delivery v{}: {}", delivery.version, delivery.message);
    }

    let accepted = facade.accept_delivery(&client, &order.id)?;
    println!(
        "  Order {} with escrow {}",
        accepted.status, accepted.escrow_status
    );

    facade.review_order(&client, &order.id, 5, "Exactly what we wanted".to_string())?;
    let gig = facade.get_gig(&gig.id)?;
    println!(
        "  Gig rating {:.1} across {} review(s)",
        gig.average_rating, gig.review_count
    );

    Ok(())
}
