use std::collections::HashSet;

use aptwatch_core::{normalize_area_name, today_kst, Announcement, PricedUnitType, SourceFamily};
use aptwatch_storage::HttpFetcher;
use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::paging::{paginate, Page, PagingConfig};
use crate::{
    json_f64, json_i64, json_text, json_u32, parse_upstream_date, resolve_link, Provider,
    ProviderError, UnitTypeSource,
};

pub const APPLYHOME_API_BASE: &str = "https://api.odcloud.kr/api/ApplyhomeInfoDetailSvc/v1";
pub const APPLYHOME_CALENDAR_URL: &str =
    "https://www.applyhome.co.kr/ai/aib/selectSubscrptCalenderView.do";

const API_SOURCE: &str = "applyhome-api";
const CALENDAR_SOURCE: &str = "applyhome-calendar";

/// Subscription-portal open API (odcloud paging envelope).
#[derive(Debug, Clone)]
pub struct ApplyHomeApiProvider {
    http: HttpFetcher,
    base_url: String,
    service_key: Option<String>,
    paging: PagingConfig,
}

impl ApplyHomeApiProvider {
    pub fn new(
        http: HttpFetcher,
        base_url: impl Into<String>,
        service_key: Option<String>,
        paging: PagingConfig,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key,
            paging,
        }
    }

    fn service_key(&self) -> Result<&str, ProviderError> {
        self.service_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config {
                provider: API_SOURCE.to_string(),
                message: "DATA_GO_KR_SERVICE_KEY is not set".to_string(),
            })
    }

    async fn fetch_details(
        &self,
        area: &str,
        conditions: Vec<(&'static str, String)>,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let key = self.service_key()?;
        let url = format!("{}/getAPTLttotPblancDetail", self.base_url);
        let url = url.as_str();
        let page_size = self.paging.page_size;

        paginate(self.paging, |page_no| {
            let mut query = vec![
                ("page", page_no.to_string()),
                ("perPage", page_size.to_string()),
                ("serviceKey", key.to_string()),
                ("cond[SUBSCRPT_AREA_CODE_NM::EQ]", area.to_string()),
            ];
            query.extend(conditions.iter().cloned());
            async move {
                let resp = self.http.fetch(API_SOURCE, url, &query).await?;
                parse_detail_page(&resp.text(), area)
            }
        })
        .await
    }
}

#[async_trait]
impl Provider for ApplyHomeApiProvider {
    fn source_name(&self) -> &str {
        API_SOURCE
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::ApplyHome
    }

    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let conditions = vec![(
            "cond[RCRIT_PBLANC_DE::EQ]",
            date.format("%Y-%m-%d").to_string(),
        )];
        let mut found = self.fetch_details(area, conditions).await?;
        found.retain(|a| a.announce_date == Some(date));
        Ok(found)
    }

    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError> {
        let conditions = vec![(
            "cond[RCEPT_ENDDE::GTE]",
            today_kst().format("%Y-%m-%d").to_string(),
        )];
        self.fetch_details(area, conditions).await
    }
}

#[async_trait]
impl UnitTypeSource for ApplyHomeApiProvider {
    async fn fetch_unit_types(
        &self,
        management_no: &str,
    ) -> Result<Vec<PricedUnitType>, ProviderError> {
        let key = self.service_key()?;
        let url = format!("{}/getAPTLttotPblancMdl", self.base_url);
        let url = url.as_str();
        let page_size = self.paging.page_size;

        paginate(self.paging, |page_no| {
            let query = vec![
                ("page", page_no.to_string()),
                ("perPage", page_size.to_string()),
                ("serviceKey", key.to_string()),
                ("cond[HOUSE_MANAGE_NO::EQ]", management_no.to_string()),
            ];
            async move {
                let resp = self.http.fetch(API_SOURCE, url, &query).await?;
                parse_unit_type_page(&resp.text())
            }
        })
        .await
    }
}

fn odcloud_envelope(body: &str) -> Result<(Vec<JsonValue>, Option<usize>), ProviderError> {
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| ProviderError::parse(API_SOURCE, format!("invalid JSON: {e}")))?;
    let Some(data) = value.get("data").and_then(|d| d.as_array()) else {
        let message = json_text(&value, "msg")
            .or_else(|| json_text(&value, "message"))
            .unwrap_or_else(|| "response has no data array".to_string());
        return Err(ProviderError::parse(API_SOURCE, message));
    };
    let total = json_i64(&value, "matchCount")
        .or_else(|| json_i64(&value, "totalCount"))
        .and_then(|t| usize::try_from(t).ok());
    Ok((data.clone(), total))
}

/// Parse one page of the announcement-detail endpoint, dropping unmappable records.
pub fn parse_detail_page(
    body: &str,
    requested_area: &str,
) -> Result<Page<Announcement>, ProviderError> {
    let (records, total) = odcloud_envelope(body)?;
    let collected_at = Utc::now();
    let mut items = Vec::with_capacity(records.len());
    for record in &records {
        match map_detail_record(record, requested_area) {
            Ok(mut announcement) => {
                announcement.collected_at = collected_at;
                items.push(announcement);
            }
            Err(reason) => warn!(
                provider = API_SOURCE,
                %reason,
                management_no = %json_text(record, "HOUSE_MANAGE_NO").unwrap_or_default(),
                "dropping unmappable record"
            ),
        }
    }
    Ok(Page {
        items,
        raw_count: records.len(),
        total,
    })
}

fn map_detail_record(record: &JsonValue, requested_area: &str) -> Result<Announcement, String> {
    let name = json_text(record, "HOUSE_NM").ok_or("missing HOUSE_NM")?;
    let receipt_start = json_text(record, "RCEPT_BGNDE")
        .as_deref()
        .and_then(parse_upstream_date)
        .ok_or("missing or malformed RCEPT_BGNDE")?;
    let area = json_text(record, "SUBSCRPT_AREA_CODE_NM")
        .map(|a| normalize_area_name(&a))
        .unwrap_or_else(|| normalize_area_name(requested_area));
    let date = |key: &str| json_text(record, key).as_deref().and_then(parse_upstream_date);

    let mut announcement = Announcement::new(SourceFamily::ApplyHome, name, area, receipt_start);
    announcement.management_no = json_text(record, "HOUSE_MANAGE_NO");
    announcement.notice_no = json_text(record, "PBLANC_NO");
    announcement.house_section =
        json_text(record, "HOUSE_DTL_SECD_NM").or_else(|| json_text(record, "HOUSE_SECD_NM"));
    announcement.announce_date = date("RCRIT_PBLANC_DE");
    announcement.receipt_end = date("RCEPT_ENDDE");
    announcement.winner_date = date("PRZWNER_PRESNATN_DE");
    announcement.contact = json_text(record, "MDHS_TELNO");
    announcement.homepage_url = json_text(record, "HMPG_ADRES");
    announcement.notice_url = json_text(record, "PBLANC_URL");
    announcement.total_supply = json_u32(record, "TOT_SUPLY_HSHLDCO");
    announcement.address = json_text(record, "HSSPLY_ADRES");
    announcement.postal_code = json_text(record, "HSSPLY_ZIP");
    Ok(announcement)
}

/// Parse one page of the per-floor-plan price endpoint.
pub fn parse_unit_type_page(body: &str) -> Result<Page<PricedUnitType>, ProviderError> {
    let (records, total) = odcloud_envelope(body)?;
    let mut items = Vec::with_capacity(records.len());
    for record in &records {
        let (Some(management_no), Some(house_type)) = (
            json_text(record, "HOUSE_MANAGE_NO"),
            json_text(record, "HOUSE_TY"),
        ) else {
            warn!(provider = API_SOURCE, "dropping unit type without management number or type");
            continue;
        };
        items.push(PricedUnitType {
            management_no,
            house_type,
            supply_area: json_f64(record, "SUPLY_AR"),
            general_supply: json_u32(record, "SUPLY_HSHLDCO").unwrap_or(0),
            special_supply: json_u32(record, "SPSPLY_HSHLDCO").unwrap_or(0),
            top_price: json_i64(record, "LTTOT_TOP_AMOUNT").filter(|p| *p > 0),
        });
    }
    Ok(Page {
        items,
        raw_count: records.len(),
        total,
    })
}

/// Scraped monthly subscription calendar of the portal.
#[derive(Debug, Clone)]
pub struct ApplyHomeCalendarProvider {
    http: HttpFetcher,
    calendar_url: String,
}

impl ApplyHomeCalendarProvider {
    pub fn new(http: HttpFetcher, calendar_url: impl Into<String>) -> Self {
        Self {
            http,
            calendar_url: calendar_url.into(),
        }
    }

    async fn fetch_month(&self, month: NaiveDate) -> Result<Vec<Announcement>, ProviderError> {
        let query = [("beginPd", format!("{:04}{:02}", month.year(), month.month()))];
        let resp = self
            .http
            .fetch(CALENDAR_SOURCE, &self.calendar_url, &query)
            .await?;
        parse_calendar_html(&resp.text(), &self.calendar_url)
    }
}

#[async_trait]
impl Provider for ApplyHomeCalendarProvider {
    fn source_name(&self) -> &str {
        CALENDAR_SOURCE
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::ApplyHome
    }

    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let wanted = normalize_area_name(area);
        let mut found = self.fetch_month(date).await?;
        found.retain(|a| a.area == wanted && a.announce_date == Some(date));
        Ok(found)
    }

    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError> {
        let wanted = normalize_area_name(area);
        let this_month = today_kst().with_day(1).unwrap_or_else(today_kst);
        let next_month = this_month
            .checked_add_months(Months::new(1))
            .unwrap_or(this_month);

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for month in [this_month, next_month] {
            for announcement in self.fetch_month(month).await? {
                if announcement.area == wanted && seen.insert(announcement.natural_key()) {
                    found.push(announcement);
                }
            }
        }
        Ok(found)
    }
}

fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css).map_err(|e| ProviderError::parse(CALENDAR_SOURCE, e.to_string()))
}

fn cell_text(row: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    row.select(sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse the calendar table; rows without a name or receipt period are dropped.
pub fn parse_calendar_html(
    html: &str,
    page_url: &str,
) -> Result<Vec<Announcement>, ProviderError> {
    let document = Html::parse_document(html);
    let row_sel = selector("table.calendar_list tbody tr")?;
    let region_sel = selector("td.region")?;
    let section_sel = selector("td.section")?;
    let name_sel = selector("td.name")?;
    let link_sel = selector("td.name a[href]")?;
    let announce_sel = selector("td.announce")?;
    let period_sel = selector("td.period")?;
    let winner_sel = selector("td.winner")?;
    let supply_sel = selector("td.supply")?;

    let collected_at = Utc::now();
    let mut out = Vec::new();
    for row in document.select(&row_sel) {
        let Some(name) = cell_text(&row, &name_sel) else {
            warn!(provider = CALENDAR_SOURCE, "dropping calendar row without a name");
            continue;
        };
        let period = cell_text(&row, &period_sel).unwrap_or_default();
        let mut bounds = period.split('~').map(str::trim);
        let Some(receipt_start) = bounds.next().and_then(parse_upstream_date) else {
            warn!(provider = CALENDAR_SOURCE, %name, "dropping calendar row without receipt period");
            continue;
        };
        let receipt_end = bounds.next().and_then(parse_upstream_date);
        let area = cell_text(&row, &region_sel)
            .map(|r| normalize_area_name(&r))
            .unwrap_or_default();

        let mut announcement = Announcement::new(SourceFamily::ApplyHome, name, area, receipt_start);
        announcement.management_no = row.value().attr("data-hmno").map(ToString::to_string);
        announcement.notice_no = row.value().attr("data-pbno").map(ToString::to_string);
        announcement.house_section = cell_text(&row, &section_sel);
        announcement.announce_date = cell_text(&row, &announce_sel)
            .as_deref()
            .and_then(parse_upstream_date);
        announcement.receipt_end = receipt_end;
        announcement.winner_date = cell_text(&row, &winner_sel)
            .as_deref()
            .and_then(parse_upstream_date);
        announcement.notice_url = row
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_link(href, page_url));
        announcement.total_supply = cell_text(&row, &supply_sel)
            .and_then(|s| s.replace(',', "").parse::<u32>().ok());
        announcement.collected_at = collected_at;
        out.push(announcement);
    }
    Ok(out)
}
