use marketplace::workflows::marketplace::{
    Actor, GeoIndex, GeoIndexError, Gig, GigDraft, GigPackage, GigRequirement, MarketplaceError,
    MarketplaceFacade, MarketplaceStore, NotificationSink, PackageTier, PriceRange,
    ProviderProfile, ServiceAreaId, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Postal centroids used when no table is configured.
const SAMPLE_POSTAL_TABLE: &str = "postal_code,latitude,longitude
10001,40.7506,-73.9972
10013,40.7209,-74.0048
07030,40.7440,-74.0324
11201,40.6945,-73.9899
19103,39.9526,-75.1652
02108,42.3576,-71.0640
60601,41.8858,-87.6181
94103,37.7725,-122.4091
";

pub(crate) fn sample_geo_index() -> Result<GeoIndex, GeoIndexError> {
    GeoIndex::from_reader(Cursor::new(SAMPLE_POSTAL_TABLE))
}

pub(crate) fn load_geo_index(path: Option<&Path>) -> Result<GeoIndex, GeoIndexError> {
    match path {
        Some(path) => GeoIndex::from_path(path),
        None => sample_geo_index(),
    }
}

pub(crate) fn operator() -> Actor {
    Actor::admin("ops-console")
}

fn area(code: &str) -> ServiceAreaId {
    ServiceAreaId(code.to_string())
}

fn seeded_profile(id: &str, areas: &[&str], min: i64, max: i64, postal: &str) -> ProviderProfile {
    ProviderProfile {
        provider_id: UserId(id.to_string()),
        service_areas: areas.iter().map(|code| area(code)).collect::<BTreeSet<_>>(),
        price_range: Some(PriceRange {
            min: Decimal::from(min),
            max: Decimal::from(max),
        }),
        available: true,
        postal_code: Some(postal.to_string()),
    }
}

pub(crate) fn seed_providers() -> Vec<ProviderProfile> {
    vec![
        seeded_profile("prov-ledgerline", &["area3", "area7"], 800, 2_500, "10013"),
        seeded_profile("prov-harbor-books", &["area3"], 1_200, 4_000, "07030"),
        seeded_profile("prov-brightmark", &["area5"], 150, 900, "11201"),
        seeded_profile("prov-keystone-tax", &["area3", "area4"], 600, 1_800, "19103"),
        seeded_profile("prov-bayside", &["area3"], 900, 3_000, "94103"),
    ]
}

fn package(tier: PackageTier, title: &str, price: i64, days: u32, revisions: u32) -> GigPackage {
    GigPackage {
        tier,
        title: title.to_string(),
        price: Decimal::from(price),
        delivery_days: days,
        revisions_included: revisions,
    }
}

pub(crate) fn seed_gig_draft() -> GigDraft {
    GigDraft {
        service_area: area("area5"),
        title: "Brand identity refresh".to_string(),
        packages: vec![
            package(PackageTier::Basic, "Logo concept", 150, 3, 1),
            package(PackageTier::Standard, "Logo and palette", 400, 5, 2),
            package(PackageTier::Premium, "Full brand kit", 900, 10, 4),
        ],
        requirements: vec![
            GigRequirement {
                key: "brand_name".to_string(),
                prompt: "Business name as it should appear".to_string(),
                required: true,
            },
            GigRequirement {
                key: "references".to_string(),
                prompt: "Links to designs you like".to_string(),
                required: false,
            },
        ],
    }
}

/// Registers the sample provider directory and publishes one packaged gig.
pub(crate) fn seed_marketplace<S, N>(
    facade: &MarketplaceFacade<S, N>,
) -> Result<Gig, MarketplaceError>
where
    S: MarketplaceStore + 'static,
    N: NotificationSink + 'static,
{
    let operator = operator();
    for profile in seed_providers() {
        facade.register_provider(&operator, profile)?;
    }

    let designer = Actor::provider("prov-brightmark");
    facade.publish_gig(&designer, seed_gig_draft())
}
