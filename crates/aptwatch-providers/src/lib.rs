//! Upstream provider contracts, concrete providers per source family, and the fallback chain.

use std::sync::Arc;
use std::time::Duration;

use aptwatch_core::{Announcement, PricedUnitType, SourceFamily};
use aptwatch_storage::{AnnouncementStore, FetchError, HttpFetcher, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod applyhome;
mod chain;
mod lh;
mod mirror;
mod paging;

pub use applyhome::{
    parse_calendar_html, parse_detail_page, parse_unit_type_page, ApplyHomeApiProvider,
    ApplyHomeCalendarProvider, APPLYHOME_API_BASE, APPLYHOME_CALENDAR_URL,
};
pub use chain::{AttemptOutcome, ChainReport, FallbackChain, ProviderAttempt};
pub use lh::{
    lh_region_code, parse_lh_list, parse_notice_board_html, LhApiProvider, LhNoticeBoardProvider,
    LH_API_BASE, LH_NOTICE_BOARD_URL,
};
pub use mirror::StoreMirrorProvider;
pub use paging::{paginate, Page, PagingConfig};

pub const CRATE_NAME: &str = "aptwatch-providers";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("unparseable response from {provider}: {message}")]
    Parse { provider: String, message: String },
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },
    #[error("{provider} is missing configuration: {message}")]
    Config { provider: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProviderError {
    pub(crate) fn parse(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Parse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// One upstream source of announcements for a single source family.
#[async_trait]
pub trait Provider: Send + Sync {
    fn source_name(&self) -> &str;

    fn family(&self) -> SourceFamily;

    /// False for local mirrors that would only echo back what reconciliation writes.
    fn is_external_source(&self) -> bool {
        true
    }

    /// Announcements published on `date` for `area`.
    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError>;

    /// Every currently listed announcement for `area`.
    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError>;
}

/// Upstream that publishes per-floor-plan prices keyed by management number.
#[async_trait]
pub trait UnitTypeSource: Send + Sync {
    async fn fetch_unit_types(
        &self,
        management_no: &str,
    ) -> Result<Vec<PricedUnitType>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    ApplyhomeApi,
    ApplyhomeCalendar,
    LhApi,
    LhNoticeBoard,
    StoreMirror,
}

impl ProviderKind {
    /// Family a provider kind is bound to; the store mirror serves any family.
    pub fn family(&self) -> Option<SourceFamily> {
        match self {
            ProviderKind::ApplyhomeApi | ProviderKind::ApplyhomeCalendar => {
                Some(SourceFamily::ApplyHome)
            }
            ProviderKind::LhApi | ProviderKind::LhNoticeBoard => Some(SourceFamily::Lh),
            ProviderKind::StoreMirror => None,
        }
    }
}

/// Shared collaborators handed to every provider at construction.
#[derive(Clone)]
pub struct ProviderContext {
    pub http: HttpFetcher,
    pub service_key: Option<String>,
    pub paging: PagingConfig,
    pub store: Arc<dyn AnnouncementStore>,
}

impl ProviderContext {
    pub fn new(http: HttpFetcher, store: Arc<dyn AnnouncementStore>) -> Self {
        Self {
            http,
            service_key: None,
            paging: PagingConfig::default(),
            store,
        }
    }

    pub fn with_service_key(mut self, key: Option<String>) -> Self {
        self.service_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.paging.page_delay = delay;
        self
    }
}

/// Build the named provider implementation for `family`.
pub fn provider_for(
    family: SourceFamily,
    kind: ProviderKind,
    base_url: Option<&str>,
    ctx: &ProviderContext,
) -> Result<Box<dyn Provider>, ProviderError> {
    if let Some(bound) = kind.family() {
        if bound != family {
            return Err(ProviderError::Config {
                provider: format!("{kind:?}"),
                message: format!("bound to family {bound}, configured under {family}"),
            });
        }
    }

    let provider: Box<dyn Provider> = match kind {
        ProviderKind::ApplyhomeApi => Box::new(ApplyHomeApiProvider::new(
            ctx.http.clone(),
            base_url.unwrap_or(APPLYHOME_API_BASE),
            ctx.service_key.clone(),
            ctx.paging,
        )),
        ProviderKind::ApplyhomeCalendar => Box::new(ApplyHomeCalendarProvider::new(
            ctx.http.clone(),
            base_url.unwrap_or(APPLYHOME_CALENDAR_URL),
        )),
        ProviderKind::LhApi => Box::new(LhApiProvider::new(
            ctx.http.clone(),
            base_url.unwrap_or(LH_API_BASE),
            ctx.service_key.clone(),
            ctx.paging,
        )),
        ProviderKind::LhNoticeBoard => Box::new(LhNoticeBoardProvider::new(
            ctx.http.clone(),
            base_url.unwrap_or(LH_NOTICE_BOARD_URL),
            ctx.paging,
        )),
        ProviderKind::StoreMirror => Box::new(StoreMirrorProvider::new(family, ctx.store.clone())),
    };
    Ok(provider)
}

pub(crate) fn json_text(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_f64(value: &JsonValue, key: &str) -> Option<f64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_i64(value: &JsonValue, key: &str) -> Option<i64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_u32(value: &JsonValue, key: &str) -> Option<u32> {
    json_i64(value, key).and_then(|v| u32::try_from(v).ok())
}

/// Absolute form of an `href` scraped from `page_url`; script and in-page anchors have none.
pub(crate) fn resolve_link(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:")
    {
        return None;
    }
    let base = Url::parse(page_url).ok()?;
    base.join(href).ok().map(|url| url.to_string())
}

/// Parses the date spellings upstreams use: `2024-05-01`, `2024.05.01`, `2024/05/01`, `20240501`.
pub fn parse_upstream_date(input: &str) -> Option<NaiveDate> {
    let digits = input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptwatch_storage::{HttpClientConfig, MemoryStore};

    #[test]
    fn upstream_dates_accept_common_spellings() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(parse_upstream_date("2024-05-01"), expected);
        assert_eq!(parse_upstream_date("2024.05.01"), expected);
        assert_eq!(parse_upstream_date(" 20240501 "), expected);
        assert_eq!(parse_upstream_date("2024-5-1"), None);
        assert_eq!(parse_upstream_date("2024-02-30"), None);
    }

    #[test]
    fn json_helpers_accept_strings_and_numbers() {
        let v: JsonValue = serde_json::json!({
            "a": "1,234",
            "b": 56,
            "c": "  ",
            "d": 84.97,
        });
        assert_eq!(json_i64(&v, "a"), Some(1234));
        assert_eq!(json_text(&v, "b").as_deref(), Some("56"));
        assert_eq!(json_text(&v, "c"), None);
        assert_eq!(json_f64(&v, "d"), Some(84.97));
        assert_eq!(json_u32(&v, "missing"), None);
    }

    #[test]
    fn scraped_links_resolve_relative_to_the_page() {
        let page = "https://www.applyhome.co.kr/ai/aib/selectSubscrptCalenderView.do";
        assert_eq!(
            resolve_link("selectDetail.do?id=1", page).as_deref(),
            Some("https://www.applyhome.co.kr/ai/aib/selectDetail.do?id=1")
        );
        assert_eq!(
            resolve_link("/ai/aia/detail.do", page).as_deref(),
            Some("https://www.applyhome.co.kr/ai/aia/detail.do")
        );
        assert_eq!(
            resolve_link("//cdn.example/x.do", page).as_deref(),
            Some("https://cdn.example/x.do")
        );
        assert_eq!(
            resolve_link("https://b.example/", page).as_deref(),
            Some("https://b.example/")
        );
        assert_eq!(resolve_link("javascript:void(0);", page), None);
        assert_eq!(resolve_link("#", page), None);
        assert_eq!(resolve_link("detail.do", "not a url"), None);
    }

    #[test]
    fn registry_rejects_kind_from_another_family() {
        let ctx = ProviderContext::new(
            HttpFetcher::new(HttpClientConfig::default()).unwrap(),
            Arc::new(MemoryStore::new()),
        );
        assert!(provider_for(SourceFamily::Lh, ProviderKind::ApplyhomeApi, None, &ctx).is_err());

        let mirror = provider_for(SourceFamily::Lh, ProviderKind::StoreMirror, None, &ctx).unwrap();
        assert_eq!(mirror.family(), SourceFamily::Lh);
        assert!(!mirror.is_external_source());

        let api = provider_for(SourceFamily::ApplyHome, ProviderKind::ApplyhomeApi, None, &ctx).unwrap();
        assert!(api.is_external_source());
        assert_eq!(api.source_name(), "applyhome-api");
    }
}
