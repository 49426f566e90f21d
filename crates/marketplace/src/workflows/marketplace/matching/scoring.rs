use rust_decimal::Decimal;

use super::geo::GeoIndex;
use crate::workflows::marketplace::domain::{
    ProviderProfile, ScoredProvider, ServiceRequest, UserId,
};

pub(crate) const AREA_MATCH_POINTS: u32 = 50;
pub(crate) const BUDGET_IN_RANGE_POINTS: u32 = 40;
pub(crate) const BUDGET_NEAR_RANGE_POINTS: u32 = 20;
pub(crate) const AVAILABILITY_POINTS: u32 = 10;

/// Fraction of a provider's minimum price a budget must reach for partial credit.
fn near_range_floor(min: Decimal) -> Decimal {
    min * Decimal::new(8, 1)
}

fn budget_points(request: &ServiceRequest, profile: &ProviderProfile) -> u32 {
    let Some(range) = profile.price_range else {
        return 0;
    };

    let budget = request.budget.fit_amount();
    if range.contains(budget) {
        BUDGET_IN_RANGE_POINTS
    } else if budget >= near_range_floor(range.min) {
        BUDGET_NEAR_RANGE_POINTS
    } else {
        0
    }
}

/// Fit score for one candidate. Zero when the provider does not serve the request's area.
pub fn score(request: &ServiceRequest, profile: &ProviderProfile) -> u32 {
    if !profile.serves(&request.service_area) {
        return 0;
    }

    let mut total = AREA_MATCH_POINTS;
    total += budget_points(request, profile);
    if profile.available {
        total += AVAILABILITY_POINTS;
    }
    total
}

/// Eligibility uses the area rule plus a budget floor; no score threshold applies.
pub fn budget_passes(request: &ServiceRequest, profile: &ProviderProfile) -> bool {
    match profile.price_range {
        None => true,
        Some(range) => request.budget.fit_amount() >= near_range_floor(range.min),
    }
}

/// Ranks candidates in discovery order, dropping area mismatches and anyone outside the
/// request radius. Equal scores keep their discovery order.
pub fn rank(
    request: &ServiceRequest,
    candidates: &[ProviderProfile],
    geo: &GeoIndex,
    invited: &[UserId],
) -> Vec<ScoredProvider> {
    let origin = request
        .origin_postal_code
        .as_deref()
        .and_then(|code| geo.resolve(code));

    let mut ranked: Vec<ScoredProvider> = candidates
        .iter()
        .filter_map(|profile| {
            let score = score(request, profile);
            if score == 0 {
                return None;
            }

            let distance_miles = match (origin, profile.postal_code.as_deref()) {
                (Some(origin), Some(code)) => {
                    geo.resolve(code).map(|point| super::geo::distance(origin, point))
                }
                _ => None,
            };

            if let (Some(radius), Some(miles)) = (request.radius_miles, distance_miles) {
                if miles > radius {
                    return None;
                }
            }

            Some(ScoredProvider {
                provider_id: profile.provider_id.clone(),
                score,
                distance_miles,
                invited: invited.contains(&profile.provider_id),
            })
        })
        .collect();

    // `sort_by` is stable, which keeps discovery order for ties.
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}
