use crate::cli::ServeArgs;
use crate::infra::{load_geo_index, seed_marketplace, AppState};
use crate::routes::with_marketplace_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use marketplace::config::AppConfig;
use marketplace::error::AppError;
use marketplace::telemetry;
use marketplace::workflows::marketplace::{
    InMemoryMarketplaceStore, InMemoryNotificationSink, MarketplaceFacade,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let geo = load_geo_index(config.marketplace.geo_table.as_deref())?;
    info!(postal_codes = geo.len(), "postal table loaded");

    let store = Arc::new(InMemoryMarketplaceStore::default());
    let notifier = Arc::new(InMemoryNotificationSink::default());
    let facade = Arc::new(MarketplaceFacade::new(
        store,
        notifier,
        Arc::new(geo),
        &config.marketplace,
    ));

    if args.seed {
        let gig = seed_marketplace(facade.as_ref())?;
        info!(gig_id = %gig.id, "sample providers and gig seeded");
    }

    let app = with_marketplace_routes(facade)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        admission_limit = config.marketplace.admission_limit,
        "marketplace service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
