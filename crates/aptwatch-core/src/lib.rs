//! Core domain model for aptwatch: announcements, unit pricing, market transactions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod region;

pub use region::{
    canonical_area, normalize_area_name, AddressResolver, LegalCodeEntry, LegalCodeTable,
};

pub const CRATE_NAME: &str = "aptwatch-core";

/// Square metres in one pyeong, the traditional unit used for per-area pricing.
pub const PYEONG_M2: f64 = 3.3058;

/// Calendar date in Korea Standard Time; upstream dates are all KST.
pub fn today_kst() -> NaiveDate {
    (Utc::now() + chrono::Duration::hours(9)).date_naive()
}

/// Logical upstream origin sharing one natural-key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFamily {
    /// National subscription portal, private-market listings.
    ApplyHome,
    /// Public housing authority listings.
    Lh,
}

impl SourceFamily {
    pub const ALL: [SourceFamily; 2] = [SourceFamily::ApplyHome, SourceFamily::Lh];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFamily::ApplyHome => "applyhome",
            SourceFamily::Lh => "lh",
        }
    }

    /// Public-housing listings are priced administratively and never compare to the market.
    pub fn publishes_market_pricing(&self) -> bool {
        matches!(self, SourceFamily::ApplyHome)
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source family: {0}")]
pub struct UnknownSourceFamily(pub String);

impl FromStr for SourceFamily {
    type Err = UnknownSourceFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "applyhome" => Ok(SourceFamily::ApplyHome),
            "lh" => Ok(SourceFamily::Lh),
            other => Err(UnknownSourceFamily(other.to_string())),
        }
    }
}

/// De-duplication identity of an announcement within its source family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub family: SourceFamily,
    pub name: String,
    pub receipt_start: NaiveDate,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.family, self.name, self.receipt_start)
    }
}

/// One housing-subscription listing as collected from an upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub family: SourceFamily,
    pub management_no: Option<String>,
    pub notice_no: Option<String>,
    pub name: String,
    pub house_section: Option<String>,
    pub area: String,
    pub announce_date: Option<NaiveDate>,
    pub receipt_start: NaiveDate,
    pub receipt_end: Option<NaiveDate>,
    pub winner_date: Option<NaiveDate>,
    pub contact: Option<String>,
    pub homepage_url: Option<String>,
    pub notice_url: Option<String>,
    pub total_supply: Option<u32>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl Announcement {
    pub fn new(
        family: SourceFamily,
        name: impl Into<String>,
        area: impl Into<String>,
        receipt_start: NaiveDate,
    ) -> Self {
        Self {
            family,
            management_no: None,
            notice_no: None,
            name: name.into(),
            house_section: None,
            area: area.into(),
            announce_date: None,
            receipt_start,
            receipt_end: None,
            winner_date: None,
            contact: None,
            homepage_url: None,
            notice_url: None,
            total_supply: None,
            address: None,
            postal_code: None,
            collected_at: Utc::now(),
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            family: self.family,
            name: self.name.clone(),
            receipt_start: self.receipt_start,
        }
    }

    /// Names of the tracked fields whose values differ between `self` and `incoming`.
    pub fn changed_fields(&self, incoming: &Announcement) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.management_no != incoming.management_no {
            changed.push("management_no");
        }
        if self.notice_no != incoming.notice_no {
            changed.push("notice_no");
        }
        if self.house_section != incoming.house_section {
            changed.push("house_section");
        }
        if self.area != incoming.area {
            changed.push("area");
        }
        if self.announce_date != incoming.announce_date {
            changed.push("announce_date");
        }
        if self.receipt_start != incoming.receipt_start {
            changed.push("receipt_start");
        }
        if self.receipt_end != incoming.receipt_end {
            changed.push("receipt_end");
        }
        if self.winner_date != incoming.winner_date {
            changed.push("winner_date");
        }
        if self.homepage_url != incoming.homepage_url {
            changed.push("homepage_url");
        }
        if self.notice_url != incoming.notice_url {
            changed.push("notice_url");
        }
        if self.total_supply != incoming.total_supply {
            changed.push("total_supply");
        }
        if self.address != incoming.address {
            changed.push("address");
        }
        if self.postal_code != incoming.postal_code {
            changed.push("postal_code");
        }
        changed
    }

    /// Overwrite the tracked fields from `incoming`, keeping identity untouched.
    pub fn apply_tracked_fields(&mut self, incoming: &Announcement) {
        self.management_no = incoming.management_no.clone();
        self.notice_no = incoming.notice_no.clone();
        self.house_section = incoming.house_section.clone();
        self.area = incoming.area.clone();
        self.announce_date = incoming.announce_date;
        self.receipt_start = incoming.receipt_start;
        self.receipt_end = incoming.receipt_end;
        self.winner_date = incoming.winner_date;
        self.homepage_url = incoming.homepage_url.clone();
        self.notice_url = incoming.notice_url.clone();
        self.total_supply = incoming.total_supply;
        self.address = incoming.address.clone();
        self.postal_code = incoming.postal_code.clone();
        self.collected_at = incoming.collected_at;
    }

    pub fn has_address(&self) -> bool {
        self.address.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// Persisted announcement row with its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnnouncement {
    pub id: Uuid,
    pub announcement: Announcement,
}

/// Priced floor plan of an announcement, joined by upstream management number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedUnitType {
    pub management_no: String,
    pub house_type: String,
    pub supply_area: Option<f64>,
    pub general_supply: u32,
    pub special_supply: u32,
    pub top_price: Option<i64>,
}

impl PricedUnitType {
    /// Area in ㎡ encoded in the house-type label, e.g. `084.9543T` -> 84.9543.
    pub fn decoded_area(&self) -> Option<f64> {
        decode_house_type_area(&self.house_type)
    }

    pub fn total_supply(&self) -> u32 {
        self.general_supply.saturating_add(self.special_supply)
    }

    pub fn price_per_pyeong(&self) -> Option<f64> {
        let price = self.top_price?;
        let area = self.supply_area.filter(|a| *a > 0.0)?;
        Some(price as f64 / (area / PYEONG_M2))
    }
}

pub fn decode_house_type_area(label: &str) -> Option<f64> {
    let numeric = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect::<String>();
    numeric.parse::<f64>().ok().filter(|v| *v > 0.0)
}

/// Comparable market sale from the public transaction registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub admin_code: String,
    pub deal_year_month: String,
    pub building_name: String,
    pub price: i64,
    pub exclusive_area: f64,
    pub floor: Option<i32>,
    pub build_year: Option<i32>,
    pub deal_date: Option<NaiveDate>,
    pub neighborhood: String,
}

impl Transaction {
    pub fn price_per_pyeong(&self) -> Option<f64> {
        if self.exclusive_area > 0.0 {
            Some(self.price as f64 / (self.exclusive_area / PYEONG_M2))
        } else {
            None
        }
    }
}

/// Per-run reconciliation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncResult {
    pub fn inserted() -> Self {
        Self {
            inserted: 1,
            ..Self::default()
        }
    }

    pub fn updated() -> Self {
        Self {
            updated: 1,
            ..Self::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            failed: 1,
            ..Self::default()
        }
    }

    pub fn merge(self, other: SyncResult) -> SyncResult {
        SyncResult {
            inserted: self.inserted + other.inserted,
            updated: self.updated + other.updated,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped + self.failed
    }
}

impl std::iter::Sum for SyncResult {
    fn sum<I: Iterator<Item = SyncResult>>(iter: I) -> Self {
        iter.fold(SyncResult::default(), SyncResult::merge)
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} skipped={} failed={}",
            self.inserted, self.updated, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceBadge {
    Cheap,
    Expensive,
    Unknown,
}

impl PriceBadge {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceBadge::Cheap => "CHEAP",
            PriceBadge::Expensive => "EXPENSIVE",
            PriceBadge::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PriceBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample(inserted: usize, updated: usize, skipped: usize, failed: usize) -> SyncResult {
        SyncResult {
            inserted,
            updated,
            skipped,
            failed,
        }
    }

    #[test]
    fn sync_result_merge_is_associative_and_commutative() {
        let a = sample(1, 2, 3, 0);
        let b = sample(4, 0, 1, 1);
        let c = sample(0, 7, 0, 2);

        assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        assert_eq!(a.merge(b), b.merge(a));
        assert_eq!(SyncResult::default().merge(a), a);
        assert_eq!(a.merge(SyncResult::default()), a);
        assert_eq!([a, b, c].into_iter().sum::<SyncResult>(), sample(5, 9, 4, 3));
    }

    #[test]
    fn house_type_label_decodes_leading_area() {
        assert_eq!(decode_house_type_area("084.9543T"), Some(84.9543));
        assert_eq!(decode_house_type_area(" 059A"), Some(59.0));
        assert_eq!(decode_house_type_area("T84"), None);
        assert_eq!(decode_house_type_area(""), None);
    }

    #[test]
    fn changed_fields_uses_null_safe_equality() {
        let mut existing = Announcement::new(SourceFamily::ApplyHome, "둔촌 레이크", "서울", date(2024, 5, 1));
        existing.total_supply = Some(100);
        let mut incoming = existing.clone();
        incoming.collected_at = existing.collected_at + chrono::Duration::hours(3);
        incoming.contact = Some("02-000-0000".into());
        assert!(existing.changed_fields(&incoming).is_empty());

        incoming.total_supply = Some(120);
        incoming.postal_code = Some("05320".into());
        assert_eq!(
            existing.changed_fields(&incoming),
            vec!["total_supply", "postal_code"]
        );

        existing.apply_tracked_fields(&incoming);
        assert!(existing.changed_fields(&incoming).is_empty());
    }

    #[test]
    fn source_family_round_trips_through_str() {
        for family in SourceFamily::ALL {
            assert_eq!(family.as_str().parse::<SourceFamily>(), Ok(family));
        }
        let err = "sh".parse::<SourceFamily>().unwrap_err();
        assert_eq!(err, UnknownSourceFamily("sh".into()));
        assert_eq!(err.to_string(), "unknown source family: sh");
        assert!(!SourceFamily::Lh.publishes_market_pricing());
    }

    #[test]
    fn price_per_pyeong_requires_positive_area() {
        let tx = Transaction {
            admin_code: "11740".into(),
            deal_year_month: "202405".into(),
            building_name: "올림픽파크포레온".into(),
            price: 33_058,
            exclusive_area: 33.058,
            floor: Some(10),
            build_year: Some(2024),
            deal_date: Some(date(2024, 5, 3)),
            neighborhood: "둔촌동".into(),
        };
        let per = tx.price_per_pyeong().unwrap();
        assert!((per - 3_305.8).abs() < 1e-6);

        let zero = Transaction {
            exclusive_area: 0.0,
            ..tx
        };
        assert_eq!(zero.price_per_pyeong(), None);
    }
}
