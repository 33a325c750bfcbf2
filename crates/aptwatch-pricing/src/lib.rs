//! Market valuation of announcements against comparable sale transactions.

use aptwatch_core::{PriceBadge, PricedUnitType};

mod badge;
mod market;

pub use badge::{BadgeEvaluation, PriceBadgeCalculator, UnknownReason};
pub use market::{
    HouseTypeComparison, HouseTypeComparisonBuilder, MarketAnalyzer, MarketStats, ProfitIndicator,
};

pub const CRATE_NAME: &str = "aptwatch-pricing";

/// Canonical reference size in ㎡ used to pick the representative floor plan.
pub const REFERENCE_AREA_M2: f64 = 84.0;
/// Half-width in ㎡ of every area matching window.
pub const AREA_TOLERANCE_M2: f64 = 5.0;
/// Transactions count as new builds when built within this many years of the reference year.
pub const NEW_BUILD_YEARS: i32 = 4;
pub const CHEAP_RATIO: f64 = 0.95;
pub const EXPENSIVE_RATIO: f64 = 1.05;

/// True median: the middle value, or the mean of the two middle values.
pub fn median(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

pub fn within_area_tolerance(area: f64, target: f64) -> bool {
    (area - target).abs() <= AREA_TOLERANCE_M2
}

/// Floor plan closest to the reference size, or the most supplied one when none is near it.
pub fn select_representative(unit_types: &[PricedUnitType]) -> Option<&PricedUnitType> {
    let near_reference = unit_types
        .iter()
        .filter_map(|u| u.decoded_area().map(|area| (u, (area - REFERENCE_AREA_M2).abs())))
        .filter(|(_, distance)| *distance <= AREA_TOLERANCE_M2)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(u, _)| u);

    near_reference.or_else(|| {
        unit_types.iter().reduce(|best, candidate| {
            if candidate.total_supply() > best.total_supply() {
                candidate
            } else {
                best
            }
        })
    })
}

/// Badge for `price` against the market `median`; the middle band carries no signal.
pub fn classify(price: i64, median: f64) -> PriceBadge {
    let price = price as f64;
    if price < median * CHEAP_RATIO {
        PriceBadge::Cheap
    } else if price > median * EXPENSIVE_RATIO {
        PriceBadge::Expensive
    } else {
        PriceBadge::Unknown
    }
}
