use aptwatch_core::{canonical_area, normalize_area_name, today_kst, Announcement, SourceFamily};
use aptwatch_storage::HttpFetcher;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::paging::{paginate, Page, PagingConfig};
use crate::{
    json_i64, json_text, json_u32, parse_upstream_date, resolve_link, Provider, ProviderError,
};

pub const LH_API_BASE: &str = "https://apis.data.go.kr/B552555/lhLeaseNoticeInfo1/lhLeaseNoticeInfo1";
pub const LH_NOTICE_BOARD_URL: &str =
    "https://apply.lh.or.kr/lhapply/apply/wt/wrtanc/selectWrtancList.do";

const API_SOURCE: &str = "lh-api";
const BOARD_SOURCE: &str = "lh-notice-board";
const BOARD_ROWS_PER_PAGE: usize = 10;
const OPEN_STATUS: &str = "공고중";
const NOTICE_DETAIL_PATH: &str = "/lhapply/apply/wt/wrtanc/selectWrtancInfo.do";

/// Region code the housing authority uses for its `CNP_CD` filter.
pub fn lh_region_code(area: &str) -> Option<&'static str> {
    let code = match canonical_area(area)? {
        "서울" => "11",
        "부산" => "26",
        "대구" => "27",
        "인천" => "28",
        "광주" => "29",
        "대전" => "30",
        "울산" => "31",
        "세종" => "36110",
        "경기" => "41",
        "강원" => "42",
        "충북" => "43",
        "충남" => "44",
        "전북" => "45",
        "전남" => "46",
        "경북" => "47",
        "경남" => "48",
        "제주" => "50",
        _ => return None,
    };
    Some(code)
}

/// Notices whose closing date is `today` or later, or unknown.
fn still_open(mut found: Vec<Announcement>, today: NaiveDate) -> Vec<Announcement> {
    found.retain(|a| a.receipt_end.map_or(true, |end| end >= today));
    found
}

fn region_code_or_config_error(provider: &str, area: &str) -> Result<&'static str, ProviderError> {
    lh_region_code(area).ok_or_else(|| ProviderError::Config {
        provider: provider.to_string(),
        message: format!("no region code for area {area:?}"),
    })
}

/// Public-housing notice list on the open data portal.
#[derive(Debug, Clone)]
pub struct LhApiProvider {
    http: HttpFetcher,
    endpoint: String,
    service_key: Option<String>,
    paging: PagingConfig,
}

impl LhApiProvider {
    pub fn new(
        http: HttpFetcher,
        endpoint: impl Into<String>,
        service_key: Option<String>,
        paging: PagingConfig,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            service_key,
            paging,
        }
    }

    async fn fetch_notices(
        &self,
        area: &str,
        filters: Vec<(&'static str, String)>,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let key = self
            .service_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config {
                provider: API_SOURCE.to_string(),
                message: "DATA_GO_KR_SERVICE_KEY is not set".to_string(),
            })?;
        let region = region_code_or_config_error(API_SOURCE, area)?;
        let endpoint = self.endpoint.as_str();
        let page_size = self.paging.page_size;

        paginate(self.paging, |page_no| {
            let mut query = vec![
                ("serviceKey", key.to_string()),
                ("PG_SZ", page_size.to_string()),
                ("PAGE", page_no.to_string()),
                ("CNP_CD", region.to_string()),
            ];
            query.extend(filters.iter().cloned());
            async move {
                let resp = self.http.fetch(API_SOURCE, endpoint, &query).await?;
                parse_lh_list(&resp.text(), area)
            }
        })
        .await
    }
}

#[async_trait]
impl Provider for LhApiProvider {
    fn source_name(&self) -> &str {
        API_SOURCE
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::Lh
    }

    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let day = date.format("%Y%m%d").to_string();
        let filters = vec![("PAN_ST_DT", day.clone()), ("PAN_ED_DT", day)];
        let mut found = self.fetch_notices(area, filters).await?;
        found.retain(|a| a.announce_date == Some(date));
        Ok(found)
    }

    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError> {
        let found = self
            .fetch_notices(area, vec![("PAN_SS", OPEN_STATUS.to_string())])
            .await?;
        Ok(still_open(found, today_kst()))
    }
}

/// Parse one page of the notice-list API.
///
/// The body is a JSON array of blocks; the block holding `dsList` carries the records
/// and each record repeats the overall count in `ALL_CNT`.
pub fn parse_lh_list(body: &str, requested_area: &str) -> Result<Page<Announcement>, ProviderError> {
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| ProviderError::parse(API_SOURCE, format!("invalid JSON: {e}")))?;
    let blocks = value
        .as_array()
        .ok_or_else(|| ProviderError::parse(API_SOURCE, "expected a top-level array"))?;
    let Some(records) = blocks
        .iter()
        .find_map(|block| block.get("dsList").and_then(|d| d.as_array()))
    else {
        let message = blocks
            .iter()
            .find_map(|block| block.get("resHeader").and_then(|h| h.as_array()))
            .and_then(|h| h.first())
            .and_then(|h| json_text(h, "SS_CODE").or_else(|| json_text(h, "RS_DTTM")))
            .unwrap_or_else(|| "response has no dsList block".to_string());
        return Err(ProviderError::parse(API_SOURCE, message));
    };

    let total = records
        .first()
        .and_then(|r| json_i64(r, "ALL_CNT"))
        .and_then(|t| usize::try_from(t).ok());
    let collected_at = Utc::now();
    let mut items = Vec::with_capacity(records.len());
    for record in records {
        match map_notice(record, requested_area) {
            Some(mut announcement) => {
                announcement.collected_at = collected_at;
                items.push(announcement);
            }
            None => warn!(
                provider = API_SOURCE,
                pan_id = %json_text(record, "PAN_ID").unwrap_or_default(),
                "dropping notice without name or posting date"
            ),
        }
    }
    Ok(Page {
        items,
        raw_count: records.len(),
        total,
    })
}

fn lh_area(listed: Option<&str>, requested_area: &str) -> String {
    listed
        .and_then(canonical_area)
        .map(ToString::to_string)
        .unwrap_or_else(|| normalize_area_name(requested_area))
}

fn map_notice(record: &JsonValue, requested_area: &str) -> Option<Announcement> {
    let name = json_text(record, "PAN_NM")?;
    let posted = json_text(record, "PAN_NT_ST_DT")
        .as_deref()
        .and_then(parse_upstream_date)?;
    let area = lh_area(json_text(record, "CNP_CD_NM").as_deref(), requested_area);

    let mut announcement = Announcement::new(SourceFamily::Lh, name, area, posted);
    announcement.management_no = json_text(record, "PAN_ID");
    announcement.house_section =
        json_text(record, "UPP_AIS_TP_NM").or_else(|| json_text(record, "AIS_TP_CD_NM"));
    announcement.announce_date = Some(posted);
    announcement.receipt_end = json_text(record, "CLSG_DT")
        .as_deref()
        .and_then(parse_upstream_date);
    announcement.notice_url = json_text(record, "DTL_URL");
    announcement.total_supply = json_u32(record, "HSH_CNT");
    Some(announcement)
}

/// Scraped notice board of the housing authority's application site.
#[derive(Debug, Clone)]
pub struct LhNoticeBoardProvider {
    http: HttpFetcher,
    board_url: String,
    paging: PagingConfig,
}

impl LhNoticeBoardProvider {
    pub fn new(http: HttpFetcher, board_url: impl Into<String>, paging: PagingConfig) -> Self {
        Self {
            http,
            board_url: board_url.into(),
            paging: PagingConfig {
                page_size: BOARD_ROWS_PER_PAGE,
                ..paging
            },
        }
    }

    async fn fetch_board(
        &self,
        area: &str,
        filters: Vec<(&'static str, String)>,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let region = region_code_or_config_error(BOARD_SOURCE, area)?;
        let board_url = self.board_url.as_str();
        let page_size = self.paging.page_size;

        paginate(self.paging, |page_no| {
            let mut query = vec![
                ("currPage", page_no.to_string()),
                ("listCo", page_size.to_string()),
                ("srchCnpCd", region.to_string()),
            ];
            query.extend(filters.iter().cloned());
            async move {
                let resp = self.http.fetch(BOARD_SOURCE, board_url, &query).await?;
                parse_notice_board_html(&resp.text(), board_url, area)
            }
        })
        .await
    }
}

#[async_trait]
impl Provider for LhNoticeBoardProvider {
    fn source_name(&self) -> &str {
        BOARD_SOURCE
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::Lh
    }

    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let day = date.format("%Y.%m.%d").to_string();
        let filters = vec![("startDt", day.clone()), ("endDt", day)];
        let mut found = self.fetch_board(area, filters).await?;
        found.retain(|a| a.announce_date == Some(date));
        Ok(found)
    }

    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError> {
        let found = self
            .fetch_board(area, vec![("panSs", OPEN_STATUS.to_string())])
            .await?;
        Ok(still_open(found, today_kst()))
    }
}

fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css).map_err(|e| ProviderError::parse(BOARD_SOURCE, e.to_string()))
}

fn text_of(cell: &ElementRef<'_>) -> String {
    cell.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one board page.
///
/// Columns: number, type, title, region, attachments, posted, closing, status.
pub fn parse_notice_board_html(
    html: &str,
    page_url: &str,
    requested_area: &str,
) -> Result<Page<Announcement>, ProviderError> {
    let document = Html::parse_document(html);
    let row_sel = selector("table tbody tr")?;
    let cell_sel = selector("td")?;
    let link_sel = selector("a")?;
    let total_sel = selector(".bbs_total strong")?;

    let total = document
        .select(&total_sel)
        .next()
        .and_then(|n| text_of(&n).replace(',', "").parse::<usize>().ok());

    let collected_at = Utc::now();
    let mut items = Vec::new();
    let mut raw_count = 0usize;
    for row in document.select(&row_sel) {
        let cells = row.select(&cell_sel).collect::<Vec<_>>();
        if cells.len() < 8 {
            debug!(provider = BOARD_SOURCE, cells = cells.len(), "skipping placeholder row");
            continue;
        }
        raw_count += 1;

        let name = text_of(&cells[2]);
        let Some(posted) = parse_upstream_date(&text_of(&cells[5])) else {
            warn!(provider = BOARD_SOURCE, %name, "dropping board row without posting date");
            continue;
        };
        if name.is_empty() {
            warn!(provider = BOARD_SOURCE, "dropping board row without title");
            continue;
        }
        let region = text_of(&cells[3]);
        let area = lh_area(Some(region.as_str()), requested_area);

        let link = cells[2].select(&link_sel).next();
        let pan_id = link
            .and_then(|a| a.value().attr("data-id1"))
            .map(ToString::to_string);
        let notice_url = link
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_link(href, page_url))
            .or_else(|| {
                let id = pan_id.as_deref()?;
                resolve_link(&format!("{NOTICE_DETAIL_PATH}?panId={id}"), page_url)
            });

        let mut announcement = Announcement::new(SourceFamily::Lh, name, area, posted);
        announcement.management_no = pan_id;
        announcement.house_section = Some(text_of(&cells[1])).filter(|s| !s.is_empty());
        announcement.announce_date = Some(posted);
        announcement.receipt_end = parse_upstream_date(&text_of(&cells[6]));
        announcement.notice_url = notice_url;
        announcement.collected_at = collected_at;
        items.push(announcement);
    }

    Ok(Page {
        items,
        raw_count,
        total,
    })
}
