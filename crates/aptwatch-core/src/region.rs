//! Region-name normalization and address -> administrative code resolution.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Transaction;

const REGION_ALIASES: &[(&str, &[&str])] = &[
    ("서울", &["서울특별시", "서울시"]),
    ("부산", &["부산광역시", "부산시"]),
    ("대구", &["대구광역시", "대구시"]),
    ("인천", &["인천광역시", "인천시"]),
    ("광주", &["광주광역시", "광주시"]),
    ("대전", &["대전광역시", "대전시"]),
    ("울산", &["울산광역시", "울산시"]),
    ("세종", &["세종특별자치시", "세종시"]),
    ("경기", &["경기도"]),
    ("강원", &["강원특별자치도", "강원도"]),
    ("충북", &["충청북도"]),
    ("충남", &["충청남도"]),
    ("전북", &["전북특별자치도", "전라북도"]),
    ("전남", &["전라남도"]),
    ("경북", &["경상북도"]),
    ("경남", &["경상남도"]),
    ("제주", &["제주특별자치도", "제주도"]),
];

const NEIGHBORHOOD_SUFFIXES: &[char] = &['동', '읍', '면', '가', '리'];

/// Canonical short region name for a known variant, e.g. `서울특별시` -> `서울`.
pub fn canonical_area(input: &str) -> Option<&'static str> {
    let trimmed = input.trim();
    REGION_ALIASES
        .iter()
        .find(|(canonical, aliases)| *canonical == trimmed || aliases.contains(&trimmed))
        .map(|(canonical, _)| *canonical)
}

/// Like [`canonical_area`] but passes unknown names through trimmed.
pub fn normalize_area_name(input: &str) -> String {
    canonical_area(input)
        .map(ToString::to_string)
        .unwrap_or_else(|| input.trim().to_string())
}

/// Turns free-text addresses into an administrative code and neighborhood name.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve_administrative_code(&self, address: &str) -> Option<String>;

    async fn resolve_neighborhood(&self, address: &str) -> Option<String>;

    fn filter_by_neighborhood(
        &self,
        transactions: Vec<Transaction>,
        neighborhood: &str,
    ) -> Vec<Transaction> {
        let wanted = neighborhood.trim();
        transactions
            .into_iter()
            .filter(|t| t.neighborhood.trim() == wanted)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalCodeEntry {
    pub region: String,
    /// District as written in addresses; may span two tokens (`성남시 분당구`).
    pub district: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct LegalCodeFile {
    entries: Vec<LegalCodeEntry>,
}

/// Table-backed resolver over 5-digit district legal codes.
#[derive(Debug, Clone, Default)]
pub struct LegalCodeTable {
    entries: Vec<LegalCodeEntry>,
}

struct AddressMatch<'a> {
    entry: &'a LegalCodeEntry,
    end_token: usize,
}

impl LegalCodeTable {
    pub fn new(entries: Vec<LegalCodeEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| LegalCodeEntry {
                region: normalize_area_name(&e.region),
                district: e.district.split_whitespace().collect::<Vec<_>>().join(" "),
                code: e.code.trim().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: LegalCodeFile = serde_yaml::from_str(text).context("parsing legal code table")?;
        Ok(Self::new(file.entries))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<&LegalCodeEntry> {
        self.match_address(&address_tokens(address)).map(|m| m.entry)
    }

    pub fn neighborhood_of(&self, address: &str) -> Option<String> {
        let tokens = address_tokens(address);
        let start = match self.match_address(&tokens) {
            Some(m) => m.end_token,
            None if canonical_area(tokens.first()?).is_some() => 1,
            None => 0,
        };
        tokens[start..].iter().find_map(|token| neighborhood_token(token))
    }

    fn match_address(&self, tokens: &[String]) -> Option<AddressMatch<'_>> {
        let region = tokens.first().and_then(|t| canonical_area(t));
        let mut candidates = Vec::new();
        for entry in &self.entries {
            if let Some(region) = region {
                if entry.region != region {
                    continue;
                }
            }
            let district = entry.district.split(' ').collect::<Vec<_>>();
            if let Some(pos) = find_window(tokens, &district) {
                candidates.push((entry, pos + district.len(), district.len()));
            }
        }
        // Without a region token, "중구" and friends are ambiguous across cities.
        if region.is_none() {
            let codes = candidates
                .iter()
                .map(|(entry, _, _)| entry.code.as_str())
                .collect::<std::collections::BTreeSet<_>>();
            if codes.len() > 1 {
                let longest = candidates.iter().map(|(_, _, len)| *len).max()?;
                candidates.retain(|(_, _, len)| *len == longest);
                if candidates.len() > 1 {
                    return None;
                }
            }
        }
        candidates
            .into_iter()
            .max_by_key(|(entry, _, len)| (*len, entry.district.chars().count()))
            .map(|(entry, end_token, _)| AddressMatch { entry, end_token })
    }
}

#[async_trait]
impl AddressResolver for LegalCodeTable {
    async fn resolve_administrative_code(&self, address: &str) -> Option<String> {
        self.lookup(address).map(|e| e.code.clone())
    }

    async fn resolve_neighborhood(&self, address: &str) -> Option<String> {
        self.neighborhood_of(address)
    }
}

fn address_tokens(address: &str) -> Vec<String> {
    let mut tokens = address
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if let Some(first) = tokens.first_mut() {
        if let Some(canonical) = canonical_area(first) {
            *first = canonical.to_string();
        }
    }
    tokens
}

fn find_window(tokens: &[String], window: &[&str]) -> Option<usize> {
    if window.is_empty() || window.len() > tokens.len() {
        return None;
    }
    tokens
        .windows(window.len())
        .position(|w| w.iter().zip(window).all(|(a, b)| a == b))
}

fn neighborhood_token(token: &str) -> Option<String> {
    let cleaned = token.trim_matches(|c: char| matches!(c, '(' | ')' | ',' | '[' | ']'));
    let first = cleaned.chars().next()?;
    let last = cleaned.chars().last()?;
    if first.is_ascii_digit() || cleaned.chars().count() < 2 {
        return None;
    }
    if NEIGHBORHOOD_SUFFIXES.contains(&last) {
        Some(cleaned.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table() -> LegalCodeTable {
        LegalCodeTable::new(vec![
            LegalCodeEntry {
                region: "서울특별시".into(),
                district: "강동구".into(),
                code: "11740".into(),
            },
            LegalCodeEntry {
                region: "서울".into(),
                district: "중구".into(),
                code: "11140".into(),
            },
            LegalCodeEntry {
                region: "부산".into(),
                district: "중구".into(),
                code: "26110".into(),
            },
            LegalCodeEntry {
                region: "경기".into(),
                district: "성남시".into(),
                code: "41130".into(),
            },
            LegalCodeEntry {
                region: "경기".into(),
                district: "성남시 분당구".into(),
                code: "41135".into(),
            },
        ])
    }

    #[test]
    fn region_variants_normalize_to_short_name() {
        assert_eq!(normalize_area_name("서울특별시"), "서울");
        assert_eq!(normalize_area_name(" 경기도 "), "경기");
        assert_eq!(normalize_area_name("서울"), "서울");
        assert_eq!(normalize_area_name("강원특별자치도"), "강원");
        assert_eq!(normalize_area_name("기타"), "기타");
        assert_eq!(canonical_area("기타"), None);
    }

    #[tokio::test]
    async fn resolves_code_and_neighborhood_from_lot_address() {
        let table = table();
        let address = "서울특별시 강동구 둔촌동 170-1";
        assert_eq!(
            table.resolve_administrative_code(address).await.as_deref(),
            Some("11740")
        );
        assert_eq!(table.resolve_neighborhood(address).await.as_deref(), Some("둔촌동"));
    }

    #[tokio::test]
    async fn road_address_uses_parenthesized_neighborhood() {
        let table = table();
        let address = "서울 강동구 양재대로 1218 (둔촌동)";
        assert_eq!(table.resolve_neighborhood(address).await.as_deref(), Some("둔촌동"));
    }

    #[test]
    fn longest_district_match_wins() {
        let table = table();
        let entry = table.lookup("경기도 성남시 분당구 정자동 1").unwrap();
        assert_eq!(entry.code, "41135");
        assert_eq!(table.neighborhood_of("경기도 성남시 분당구 정자동 1").as_deref(), Some("정자동"));
    }

    #[test]
    fn region_disambiguates_shared_district_names() {
        let table = table();
        assert_eq!(table.lookup("부산광역시 중구 중앙동").unwrap().code, "26110");
        assert_eq!(table.lookup("서울 중구 명동").unwrap().code, "11140");
        assert!(table.lookup("중구 명동").is_none());
        assert!(table.lookup("대전 유성구 봉명동").is_none());
    }

    #[test]
    fn loads_table_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "entries:\n  - region: 서울특별시\n    district: 강동구\n    code: \"11740\""
        )
        .unwrap();
        let table = LegalCodeTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("서울 강동구 둔촌동").unwrap().region, "서울");
    }

    #[test]
    fn filter_keeps_only_matching_neighborhood() {
        let table = table();
        let mk = |n: &str| Transaction {
            admin_code: "11740".into(),
            deal_year_month: "202405".into(),
            building_name: "x".into(),
            price: 1,
            exclusive_area: 84.0,
            floor: None,
            build_year: None,
            deal_date: None,
            neighborhood: n.into(),
        };
        let kept = table.filter_by_neighborhood(vec![mk("둔촌동"), mk(" 둔촌동"), mk("길동")], "둔촌동");
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn shipped_table_resolves_split_city_districts() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../legal_codes.yaml");
        let table = LegalCodeTable::load(path).unwrap();
        assert!(!table.is_empty());
        assert_eq!(table.lookup("경기도 수원시 영통구 이의동 1").unwrap().code, "41117");
        assert_eq!(table.lookup("부산광역시 중구 중앙동 1").unwrap().code, "26110");
    }
}
