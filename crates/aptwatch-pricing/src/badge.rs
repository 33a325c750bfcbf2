use std::sync::Arc;

use aptwatch_core::{today_kst, AddressResolver, Announcement, PriceBadge, Transaction};
use aptwatch_storage::{TransactionStore, UnitTypeStore};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{classify, median, select_representative, within_area_tolerance, NEW_BUILD_YEARS};

/// Why an evaluation ended without a Cheap or Expensive signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NoMarketPricing,
    MissingManagementNo,
    MissingAddress,
    NoUnitTypes,
    NoTopPrice,
    NoDecodableArea,
    UnresolvedAddress,
    NoRecentTransactions,
    NoComparableArea,
    WithinBand,
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeEvaluation {
    pub badge: PriceBadge,
    pub house_type: Option<String>,
    pub top_price: Option<i64>,
    pub market_median: Option<f64>,
    pub comparables: usize,
    pub unknown_reason: Option<UnknownReason>,
}

impl BadgeEvaluation {
    fn unknown(reason: UnknownReason) -> Self {
        Self {
            badge: PriceBadge::Unknown,
            house_type: None,
            top_price: None,
            market_median: None,
            comparables: 0,
            unknown_reason: Some(reason),
        }
    }
}

/// Labels an announcement's representative price against recent comparable sales.
///
/// Read-only over its collaborators, so one calculator can serve concurrent callers.
pub struct PriceBadgeCalculator<S> {
    store: Arc<S>,
    resolver: Arc<dyn AddressResolver>,
    reference_date: Option<NaiveDate>,
}

impl<S> PriceBadgeCalculator<S>
where
    S: UnitTypeStore + TransactionStore,
{
    pub fn new(store: Arc<S>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            store,
            resolver,
            reference_date: None,
        }
    }

    /// Pin the date the new-build window is counted from; defaults to today in KST.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    fn reference_year(&self) -> i32 {
        self.reference_date.unwrap_or_else(today_kst).year()
    }

    pub async fn compute_badge(&self, announcement: &Announcement) -> PriceBadge {
        self.evaluate(announcement).await.badge
    }

    pub async fn compute_badges(&self, announcements: &[Announcement]) -> Vec<PriceBadge> {
        let mut badges = Vec::with_capacity(announcements.len());
        for announcement in announcements {
            badges.push(self.compute_badge(announcement).await);
        }
        badges
    }

    pub async fn evaluate(&self, announcement: &Announcement) -> BadgeEvaluation {
        let evaluation = self.evaluate_inner(announcement).await;
        debug!(
            key = %announcement.natural_key(),
            badge = %evaluation.badge,
            reason = ?evaluation.unknown_reason,
            "price badge evaluated"
        );
        evaluation
    }

    async fn evaluate_inner(&self, announcement: &Announcement) -> BadgeEvaluation {
        if !announcement.family.publishes_market_pricing() {
            return BadgeEvaluation::unknown(UnknownReason::NoMarketPricing);
        }
        let Some(management_no) = announcement
            .management_no
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        else {
            return BadgeEvaluation::unknown(UnknownReason::MissingManagementNo);
        };
        let Some(address) = announcement.address.as_deref().filter(|_| announcement.has_address())
        else {
            return BadgeEvaluation::unknown(UnknownReason::MissingAddress);
        };

        let unit_types = match self.store.unit_types_for(management_no).await {
            Ok(units) => units,
            Err(err) => {
                warn!(%management_no, error = %err, "unit types unavailable; badge unknown");
                return BadgeEvaluation::unknown(UnknownReason::StoreUnavailable);
            }
        };
        let Some(representative) = select_representative(&unit_types) else {
            return BadgeEvaluation::unknown(UnknownReason::NoUnitTypes);
        };
        let Some(top_price) = representative.top_price else {
            return BadgeEvaluation::unknown(UnknownReason::NoTopPrice);
        };
        let Some(area) = representative.decoded_area() else {
            return BadgeEvaluation::unknown(UnknownReason::NoDecodableArea);
        };
        let partial = |reason: UnknownReason, comparables: usize, market_median: Option<f64>| {
            BadgeEvaluation {
                badge: PriceBadge::Unknown,
                house_type: Some(representative.house_type.clone()),
                top_price: Some(top_price),
                market_median,
                comparables,
                unknown_reason: Some(reason),
            }
        };

        let Some(code) = self.resolver.resolve_administrative_code(address).await else {
            return partial(UnknownReason::UnresolvedAddress, 0, None);
        };
        let transactions = match self.store.transactions_for_code(&code).await {
            Ok(transactions) => transactions,
            Err(err) => {
                warn!(%code, error = %err, "transactions unavailable; badge unknown");
                return partial(UnknownReason::StoreUnavailable, 0, None);
            }
        };
        let transactions = match self.resolver.resolve_neighborhood(address).await {
            Some(neighborhood) => self.resolver.filter_by_neighborhood(transactions, &neighborhood),
            None => transactions,
        };

        let recent = recent_builds(transactions, self.reference_year());
        if recent.is_empty() {
            return partial(UnknownReason::NoRecentTransactions, 0, None);
        }
        let prices = recent
            .iter()
            .filter(|t| within_area_tolerance(t.exclusive_area, area))
            .map(|t| t.price)
            .collect::<Vec<_>>();
        let Some(market_median) = median(&prices) else {
            return partial(UnknownReason::NoComparableArea, 0, None);
        };

        let badge = classify(top_price, market_median);
        BadgeEvaluation {
            badge,
            house_type: Some(representative.house_type.clone()),
            top_price: Some(top_price),
            market_median: Some(market_median),
            comparables: prices.len(),
            unknown_reason: (badge == PriceBadge::Unknown).then_some(UnknownReason::WithinBand),
        }
    }
}

fn recent_builds(transactions: Vec<Transaction>, reference_year: i32) -> Vec<Transaction> {
    let oldest = reference_year - NEW_BUILD_YEARS;
    transactions
        .into_iter()
        .filter(|t| t.build_year.is_some_and(|year| year >= oldest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptwatch_core::{LegalCodeEntry, LegalCodeTable, PricedUnitType, SourceFamily};
    use aptwatch_storage::{MemoryStore, UnitTypeStore};

    const ADDRESS: &str = "서울특별시 강동구 둔촌동 170-1";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn resolver() -> Arc<dyn AddressResolver> {
        Arc::new(LegalCodeTable::new(vec![LegalCodeEntry {
            region: "서울특별시".into(),
            district: "강동구".into(),
            code: "11740".into(),
        }]))
    }

    fn sale(price: i64, area: f64, build_year: i32, neighborhood: &str) -> Transaction {
        Transaction {
            admin_code: "11740".into(),
            deal_year_month: "202404".into(),
            building_name: "둔촌 신축".into(),
            price,
            exclusive_area: area,
            floor: Some(12),
            build_year: Some(build_year),
            deal_date: Some(date(2024, 4, 10)),
            neighborhood: neighborhood.into(),
        }
    }

    fn announcement() -> Announcement {
        let mut a = Announcement::new(SourceFamily::ApplyHome, "둔촌 레이크", "서울", date(2024, 5, 13));
        a.management_no = Some("2024000123".into());
        a.address = Some(ADDRESS.into());
        a
    }

    async fn store_with(top_price: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_unit_types(&[
                PricedUnitType {
                    management_no: "2024000123".into(),
                    house_type: "059.9812A".into(),
                    supply_area: Some(84.0),
                    general_supply: 300,
                    special_supply: 100,
                    top_price: Some(1),
                },
                PricedUnitType {
                    management_no: "2024000123".into(),
                    house_type: "084.9543T".into(),
                    supply_area: Some(112.0),
                    general_supply: 100,
                    special_supply: 50,
                    top_price: Some(top_price),
                },
            ])
            .await
            .unwrap();
        store
            .seed_transactions([
                sale(90_000, 84.9, 2022, "둔촌동"),
                sale(100_000, 84.5, 2023, "둔촌동"),
                sale(110_000, 83.0, 2021, "둔촌동"),
                // outside the area window
                sale(300_000, 120.0, 2023, "둔촌동"),
                // too old
                sale(10_000, 84.9, 2005, "둔촌동"),
                // other neighborhood
                sale(1_000, 84.9, 2023, "성내동"),
            ])
            .await;
        store
    }

    async fn badge_for(top_price: i64) -> BadgeEvaluation {
        let calculator = PriceBadgeCalculator::new(store_with(top_price).await, resolver())
            .with_reference_date(date(2024, 5, 1));
        calculator.evaluate(&announcement()).await
    }

    #[tokio::test]
    async fn prices_below_band_are_cheap() {
        let evaluation = badge_for(94_000).await;
        assert_eq!(evaluation.badge, PriceBadge::Cheap);
        assert_eq!(evaluation.market_median, Some(100_000.0));
        assert_eq!(evaluation.comparables, 3);
        assert_eq!(evaluation.house_type.as_deref(), Some("084.9543T"));
    }

    #[tokio::test]
    async fn prices_above_band_are_expensive() {
        assert_eq!(badge_for(106_000).await.badge, PriceBadge::Expensive);
    }

    #[tokio::test]
    async fn prices_inside_band_carry_no_signal() {
        let evaluation = badge_for(100_000).await;
        assert_eq!(evaluation.badge, PriceBadge::Unknown);
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::WithinBand));
    }

    #[tokio::test]
    async fn missing_identity_or_address_is_unknown() {
        let calculator = PriceBadgeCalculator::new(store_with(94_000).await, resolver())
            .with_reference_date(date(2024, 5, 1));

        let mut no_address = announcement();
        no_address.address = Some("  ".into());
        let evaluation = calculator.evaluate(&no_address).await;
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::MissingAddress));

        let mut no_management_no = announcement();
        no_management_no.management_no = None;
        assert_eq!(calculator.compute_badge(&no_management_no).await, PriceBadge::Unknown);

        let mut public = announcement();
        public.family = SourceFamily::Lh;
        let evaluation = calculator.evaluate(&public).await;
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::NoMarketPricing));
    }

    #[tokio::test]
    async fn unresolvable_address_and_stale_market_are_unknown() {
        let calculator = PriceBadgeCalculator::new(store_with(94_000).await, resolver())
            .with_reference_date(date(2024, 5, 1));
        let mut elsewhere = announcement();
        elsewhere.address = Some("부산광역시 해운대구 우동 1".into());
        assert_eq!(
            calculator.evaluate(&elsewhere).await.unknown_reason,
            Some(UnknownReason::UnresolvedAddress)
        );

        let far_future = PriceBadgeCalculator::new(store_with(94_000).await, resolver())
            .with_reference_date(date(2040, 1, 1));
        assert_eq!(
            far_future.evaluate(&announcement()).await.unknown_reason,
            Some(UnknownReason::NoRecentTransactions)
        );
    }

    async fn single_unit_store(top_price: Option<i64>, sales: Vec<Transaction>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_unit_types(&[PricedUnitType {
                management_no: "2024000123".into(),
                house_type: "084.9543T".into(),
                supply_area: Some(112.0),
                general_supply: 100,
                special_supply: 50,
                top_price,
            }])
            .await
            .unwrap();
        store.seed_transactions(sales).await;
        store
    }

    #[tokio::test]
    async fn representative_without_top_price_is_unknown() {
        let store = single_unit_store(None, vec![sale(100_000, 84.5, 2023, "둔촌동")]).await;
        let calculator =
            PriceBadgeCalculator::new(store, resolver()).with_reference_date(date(2024, 5, 1));
        let evaluation = calculator.evaluate(&announcement()).await;
        assert_eq!(evaluation.badge, PriceBadge::Unknown);
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::NoTopPrice));
    }

    #[tokio::test]
    async fn no_sale_near_the_representative_area_is_unknown() {
        let store = single_unit_store(
            Some(94_000),
            vec![
                sale(300_000, 120.0, 2023, "둔촌동"),
                sale(250_000, 114.0, 2022, "둔촌동"),
            ],
        )
        .await;
        let calculator =
            PriceBadgeCalculator::new(store, resolver()).with_reference_date(date(2024, 5, 1));
        let evaluation = calculator.evaluate(&announcement()).await;
        assert_eq!(evaluation.badge, PriceBadge::Unknown);
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::NoComparableArea));
        assert_eq!(evaluation.market_median, None);
    }

    #[tokio::test]
    async fn address_without_neighborhood_compares_the_whole_district() {
        let calculator = PriceBadgeCalculator::new(store_with(94_000).await, resolver())
            .with_reference_date(date(2024, 5, 1));
        let mut street_only = announcement();
        street_only.address = Some("서울특별시 강동구 양재대로 1234".into());

        let evaluation = calculator.evaluate(&street_only).await;
        // 성내동's 1,000 sale now counts: median of 1k, 90k, 100k, 110k
        assert_eq!(evaluation.comparables, 4);
        assert_eq!(evaluation.market_median, Some(95_000.0));
        assert_eq!(evaluation.badge, PriceBadge::Unknown);
        assert_eq!(evaluation.unknown_reason, Some(UnknownReason::WithinBand));
    }

    #[tokio::test]
    async fn batch_form_matches_single_calls() {
        let calculator = PriceBadgeCalculator::new(store_with(106_000).await, resolver())
            .with_reference_date(date(2024, 5, 1));
        let mut unknown = announcement();
        unknown.management_no = Some("없는 번호".into());
        let badges = calculator.compute_badges(&[announcement(), unknown]).await;
        assert_eq!(badges, vec![PriceBadge::Expensive, PriceBadge::Unknown]);
    }
}
