use aptwatch_core::{PriceBadge, PricedUnitType, Transaction};
use serde::Serialize;

use crate::{classify, median, within_area_tolerance};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStats {
    pub count: usize,
    pub avg_price: f64,
    /// Mean over transactions with a usable area only.
    pub avg_price_per_pyeong: Option<f64>,
    pub min_price: i64,
    pub max_price: i64,
}

/// Aggregate statistics over a set of sale transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketAnalyzer;

impl MarketAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, transactions: &[Transaction]) -> Option<MarketStats> {
        let first = transactions.first()?;
        let mut sum = 0f64;
        let mut min_price = first.price;
        let mut max_price = first.price;
        let mut per_pyeong_sum = 0f64;
        let mut per_pyeong_count = 0usize;

        for tx in transactions {
            sum += tx.price as f64;
            min_price = min_price.min(tx.price);
            max_price = max_price.max(tx.price);
            if let Some(per) = tx.price_per_pyeong() {
                per_pyeong_sum += per;
                per_pyeong_count += 1;
            }
        }

        Some(MarketStats {
            count: transactions.len(),
            avg_price: sum / transactions.len() as f64,
            avg_price_per_pyeong: (per_pyeong_count > 0)
                .then(|| per_pyeong_sum / per_pyeong_count as f64),
            min_price,
            max_price,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfitIndicator {
    /// Offered well below comparable sales.
    Gain,
    Loss,
    Even,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseTypeComparison {
    pub unit_type: PricedUnitType,
    pub matched: Vec<Transaction>,
    pub median_price: Option<f64>,
    /// Median comparable price minus the offered top price.
    pub estimated_margin: Option<i64>,
    pub indicator: ProfitIndicator,
}

/// Per-floor-plan counterpart of the price badge.
#[derive(Debug, Clone, Copy, Default)]
pub struct HouseTypeComparisonBuilder;

impl HouseTypeComparisonBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        unit_types: &[PricedUnitType],
        transactions: &[Transaction],
    ) -> Vec<HouseTypeComparison> {
        unit_types
            .iter()
            .map(|unit| self.compare(unit, transactions))
            .collect()
    }

    fn compare(&self, unit: &PricedUnitType, transactions: &[Transaction]) -> HouseTypeComparison {
        let matched: Vec<Transaction> = match unit.decoded_area() {
            Some(area) => transactions
                .iter()
                .filter(|t| within_area_tolerance(t.exclusive_area, area))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let prices = matched.iter().map(|t| t.price).collect::<Vec<_>>();
        let median_price = median(&prices);

        let (estimated_margin, indicator) = match (median_price, unit.top_price) {
            (Some(median), Some(top)) => {
                let margin = median.round() as i64 - top;
                let indicator = match classify(top, median) {
                    PriceBadge::Cheap => ProfitIndicator::Gain,
                    PriceBadge::Expensive => ProfitIndicator::Loss,
                    PriceBadge::Unknown => ProfitIndicator::Even,
                };
                (Some(margin), indicator)
            }
            _ => (None, ProfitIndicator::Unknown),
        };

        HouseTypeComparison {
            unit_type: unit.clone(),
            matched,
            median_price,
            estimated_margin,
            indicator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(price: i64, area: f64) -> Transaction {
        Transaction {
            admin_code: "11740".into(),
            deal_year_month: "202404".into(),
            building_name: "둔촌 신축".into(),
            price,
            exclusive_area: area,
            floor: None,
            build_year: Some(2023),
            deal_date: None,
            neighborhood: "둔촌동".into(),
        }
    }

    fn unit(house_type: &str, top_price: Option<i64>) -> PricedUnitType {
        PricedUnitType {
            management_no: "2024000123".into(),
            house_type: house_type.into(),
            supply_area: None,
            general_supply: 10,
            special_supply: 0,
            top_price,
        }
    }

    #[test]
    fn empty_market_has_no_stats() {
        assert_eq!(MarketAnalyzer::new().analyze(&[]), None);
    }

    #[test]
    fn stats_skip_missing_per_pyeong_values() {
        let stats = MarketAnalyzer::new()
            .analyze(&[sale(100, 33.058), sale(300, 0.0), sale(200, 66.116)])
            .unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.avg_price - 200.0).abs() < 1e-9);
        assert_eq!(stats.min_price, 100);
        assert_eq!(stats.max_price, 300);
        // 100/10 and 200/20 pyeong -> 10 each
        assert!((stats.avg_price_per_pyeong.unwrap() - 10.0).abs() < 1e-9);

        let only_zero_area = MarketAnalyzer::new().analyze(&[sale(5, 0.0)]).unwrap();
        assert_eq!(only_zero_area.avg_price_per_pyeong, None);
    }

    #[test]
    fn comparison_matches_by_area_window() {
        let transactions = [
            sale(100_000, 84.9),
            sale(120_000, 82.0),
            sale(60_000, 59.9),
            sale(200_000, 114.0),
        ];
        let rows = HouseTypeComparisonBuilder::new().build(
            &[
                unit("084.9543T", Some(90_000)),
                unit("059.9812A", Some(70_000)),
                unit("112A", None),
                unit("TYPE-X", Some(1)),
            ],
            &transactions,
        );
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].matched.len(), 2);
        assert_eq!(rows[0].median_price, Some(110_000.0));
        assert_eq!(rows[0].estimated_margin, Some(20_000));
        assert_eq!(rows[0].indicator, ProfitIndicator::Gain);

        assert_eq!(rows[1].estimated_margin, Some(-10_000));
        assert_eq!(rows[1].indicator, ProfitIndicator::Loss);

        assert_eq!(rows[2].matched.len(), 1);
        assert_eq!(rows[2].indicator, ProfitIndicator::Unknown);

        assert!(rows[3].matched.is_empty());
        assert_eq!(rows[3].indicator, ProfitIndicator::Unknown);
    }

    #[test]
    fn indicator_follows_the_badge_band() {
        let transactions = [sale(100_000, 84.0)];
        let indicators = [94_000, 95_000, 100_000, 105_000, 106_000].map(|top| {
            HouseTypeComparisonBuilder::new().build(&[unit("084A", Some(top))], &transactions)[0]
                .indicator
        });
        assert_eq!(
            indicators,
            [
                ProfitIndicator::Gain,
                ProfitIndicator::Even,
                ProfitIndicator::Even,
                ProfitIndicator::Even,
                ProfitIndicator::Loss,
            ]
        );
    }
}
