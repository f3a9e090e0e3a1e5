//! Congress.gov endpoint adapters: request shaping, pagination, the uniform
//! source-error taxonomy, and the pure raw-to-canonical normalizers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use legis_core::{
    congress_for_year, BillAction, BillCosponsor, BillDetail, BillKey, BillStatus, BillTextFormat,
    BillTextVersion, CanonicalBill, CanonicalCommittee, CanonicalMember, CommitteeAssignment,
    MemberDetail, MemberTerm,
};
use legis_storage::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "legis-adapters";

pub const DEFAULT_BASE_URL: &str = "https://api.congress.gov/v3";
pub const DEFAULT_BIOGUIDE_URL: &str = "https://bioguide.congress.gov/search/bio";
pub const DEFAULT_PAGE_SIZE: u32 = 250;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Uniform error surface every adapter translates its failures into.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transient source failure: {0}")]
    Transient(String),
    #[error("rate limited by source: {0}")]
    RateLimited(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        match err.http_status() {
            Some(401) | Some(403) => SourceError::AuthFailed(err.to_string()),
            Some(404) => SourceError::NotFound(err.to_string()),
            Some(429) => SourceError::RateLimited(err.to_string()),
            _ => SourceError::Transient(err.to_string()),
        }
    }
}

impl SourceError {
    /// Auth failures are never worth another attempt without operator
    /// intervention.
    pub fn is_auth(&self) -> bool {
        matches!(self, SourceError::AuthFailed(_))
    }
}

/// A single record that cannot be mapped into canonical form. Never fatal:
/// the caller skips the record and carries on.
#[derive(Debug, Error)]
#[error("unmappable field {field}: {reason}")]
pub struct NormalizeError {
    pub field: &'static str,
    pub reason: String,
}

fn unmappable(field: &'static str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Pagination contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageCursor {
    pub offset: i64,
    /// Incremental lower bound applied by list endpoints (`fromDateTime`).
    pub since: Option<DateTime<Utc>>,
}

impl PageCursor {
    pub fn at(offset: i64) -> Self {
        Self {
            offset,
            since: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage<T> {
    pub records: Vec<T>,
    pub next_offset: Option<i64>,
    pub raw_body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// A lazily paged endpoint. One implementation per list-shaped source.
#[async_trait]
pub trait PagedSource: Send + Sync {
    type Record: Send;

    fn endpoint_id(&self) -> &'static str;

    async fn fetch_page(
        &self,
        cursor: &PageCursor,
    ) -> Result<FetchedPage<Self::Record>, SourceError>;
}

// ---------------------------------------------------------------------------
// Congress.gov client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CongressClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub user_agent: String,
    pub timeout: Duration,
    /// Fixed spacing between consecutive requests to the API.
    pub min_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for CongressClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            user_agent: "legis-pipeline/0.1".to_string(),
            timeout: Duration::from_secs(30),
            min_interval: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Shared HTTP plumbing for the Congress.gov endpoints. Each adapter wraps
/// one of these; pacing and retry budgets apply per source.
#[derive(Debug)]
pub struct CongressClient {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl CongressClient {
    pub fn new(config: CongressClientConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: config.timeout,
            user_agent: Some(config.user_agent.clone()),
            backoff: config.backoff,
            token_bucket: None,
            min_interval: Some(config.min_interval),
        })?;
        Ok(Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            page_size: config.page_size,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn get_json(
        &self,
        source_id: &str,
        path_or_url: &str,
        extra: &[(&str, String)],
    ) -> Result<(JsonValue, Vec<u8>), SourceError> {
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}/{}", self.base_url, path_or_url.trim_start_matches('/'))
        };
        let mut query: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
        ];
        query.extend(extra.iter().cloned());

        let response = self.fetcher.get(source_id, &url, &query).await?;
        let value: JsonValue = serde_json::from_slice(&response.body)
            .map_err(|e| SourceError::MalformedResponse(format!("{url}: {e}")))?;
        Ok((value, response.body))
    }
}

// ---------------------------------------------------------------------------
// Raw payload shapes
// ---------------------------------------------------------------------------

fn de_stringlike<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// List items arrive either bare, wrapped in a `bill` object, or (for early
/// congresses) as a `bill` array of per-version entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBillEnvelope {
    Wrapped { bill: RawBillVersions },
    Bare(RawBillListItem),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBillVersions {
    One(Box<RawBillListItem>),
    Many(Vec<RawBillListItem>),
}

impl RawBillEnvelope {
    /// Collapse to a single entry; multi-version historical records keep the
    /// most recently updated one.
    pub fn into_latest(self) -> Option<RawBillListItem> {
        match self {
            RawBillEnvelope::Bare(item) => Some(item),
            RawBillEnvelope::Wrapped {
                bill: RawBillVersions::One(item),
            } => Some(*item),
            RawBillEnvelope::Wrapped {
                bill: RawBillVersions::Many(mut items),
            } => {
                if items.len() > 1 {
                    debug!(count = items.len(), "multiple bill entries; keeping most recent");
                }
                items.sort_by(|a, b| a.update_date.cmp(&b.update_date));
                items.pop()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBillListItem {
    #[serde(rename = "type")]
    pub bill_type: Option<String>,
    #[serde(default, deserialize_with = "de_stringlike")]
    pub number: Option<String>,
    pub congress: Option<u16>,
    pub title: Option<String>,
    #[serde(rename = "shortTitle")]
    pub short_title: Option<String>,
    #[serde(rename = "latestAction")]
    pub latest_action: Option<RawLatestAction>,
    #[serde(rename = "introducedDate")]
    pub introduced_date: Option<String>,
    #[serde(rename = "updateDate")]
    pub update_date: Option<String>,
    #[serde(default)]
    pub sponsors: Option<Vec<RawSponsor>>,
    #[serde(rename = "policyArea")]
    pub policy_area: Option<RawNamed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLatestAction {
    #[serde(rename = "actionDate")]
    pub action_date: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSponsor {
    #[serde(rename = "bioguideId")]
    pub bioguide_id: Option<String>,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub party: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNamed {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPagination {
    pub count: Option<i64>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBillListResponse {
    #[serde(default)]
    pub bills: Vec<RawBillEnvelope>,
    pub pagination: Option<RawPagination>,
}

/// Embedded relation lists come as `{"item": [...]}` objects or plain arrays
/// depending on payload vintage.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawItems<T> {
    Wrapped {
        #[serde(default = "Vec::new")]
        item: Vec<T>,
    },
    List(Vec<T>),
}

impl<T> RawItems<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            RawItems::Wrapped { item } => item,
            RawItems::List(items) => items,
        }
    }
}

impl<T> Default for RawItems<T> {
    fn default() -> Self {
        RawItems::List(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBillDetailResponse {
    pub bill: RawBillDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBillDetail {
    #[serde(rename = "type")]
    pub bill_type: Option<String>,
    #[serde(default, deserialize_with = "de_stringlike")]
    pub number: Option<String>,
    pub congress: Option<u16>,
    pub title: Option<String>,
    #[serde(rename = "introducedDate")]
    pub introduced_date: Option<String>,
    #[serde(default)]
    pub cosponsors: Option<RawItems<RawCosponsor>>,
    #[serde(default)]
    pub subjects: Option<RawItems<RawNamed>>,
    #[serde(default)]
    pub committees: Option<RawItems<RawCommittee>>,
    #[serde(rename = "relatedBills", default)]
    pub related_bills: Option<RawItems<RawRelatedBill>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCosponsor {
    #[serde(rename = "bioguideId")]
    pub bioguide_id: Option<String>,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub party: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCommittee {
    #[serde(rename = "systemCode")]
    pub system_code: Option<String>,
    pub name: Option<String>,
    pub chamber: Option<String>,
    #[serde(rename = "type")]
    pub committee_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRelatedBill {
    #[serde(rename = "type")]
    pub bill_type: Option<String>,
    #[serde(default, deserialize_with = "de_stringlike")]
    pub number: Option<String>,
    pub congress: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTextVersionsResponse {
    #[serde(rename = "textVersions", default)]
    pub text_versions: Vec<RawTextVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTextVersion {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub version_type: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawTextFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTextFormat {
    #[serde(rename = "type")]
    pub format_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActionsResponse {
    #[serde(default)]
    pub actions: Vec<RawAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(rename = "actionDate")]
    pub action_date: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMemberListResponse {
    #[serde(default)]
    pub members: Vec<RawMemberListItem>,
    pub pagination: Option<RawPagination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMemberListItem {
    #[serde(rename = "bioguideId")]
    pub bioguide_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "directOrderName")]
    pub direct_order_name: Option<String>,
    #[serde(rename = "partyName")]
    pub party_name: Option<String>,
    pub state: Option<String>,
    pub district: Option<i64>,
    #[serde(default)]
    pub terms: Option<RawItems<RawMemberTerm>>,
    pub depiction: Option<RawDepiction>,
    #[serde(rename = "updateDate")]
    pub update_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMemberTerm {
    pub chamber: Option<String>,
    pub congress: Option<i64>,
    #[serde(rename = "startYear")]
    pub start_year: Option<i64>,
    #[serde(rename = "endYear")]
    pub end_year: Option<i64>,
    #[serde(rename = "partyName")]
    pub party_name: Option<String>,
    #[serde(rename = "stateCode")]
    pub state_code: Option<String>,
    pub district: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDepiction {
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMemberDetailResponse {
    pub member: RawMemberDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMemberDetail {
    #[serde(rename = "bioguideId")]
    pub bioguide_id: Option<String>,
    #[serde(rename = "birthYear", default, deserialize_with = "de_stringlike")]
    pub birth_year: Option<String>,
    #[serde(rename = "directOrderName")]
    pub direct_order_name: Option<String>,
    #[serde(rename = "invertedOrderName")]
    pub inverted_order_name: Option<String>,
    #[serde(rename = "honorificName")]
    pub honorific_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Date handling
// ---------------------------------------------------------------------------

/// Parse a source timestamp into UTC. Strings without an offset are taken to
/// be UTC; plain dates map to midnight.
pub fn parse_utc_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = parsed.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc));
    }
    None
}

pub fn parse_source_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Normalizers (pure)
// ---------------------------------------------------------------------------

/// Bill-list item into canonical form. Deterministic; the only hard
/// requirement is a complete natural key.
pub fn normalize_bill(item: &RawBillListItem) -> Result<CanonicalBill, NormalizeError> {
    let congress = item
        .congress
        .ok_or_else(|| unmappable("congress", "missing"))?;
    let bill_type = item
        .bill_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| unmappable("type", "missing"))?;
    let number = item
        .number
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| unmappable("number", "missing"))?;
    let key = BillKey::new(congress, bill_type, number);

    let action_text = item
        .latest_action
        .as_ref()
        .and_then(|a| a.text.clone())
        .filter(|t| !t.is_empty());
    let action_date = item
        .latest_action
        .as_ref()
        .and_then(|a| a.action_date.as_deref())
        .and_then(parse_source_date);
    let normalized_status = action_text.as_deref().and_then(BillStatus::from_action_text);

    Ok(CanonicalBill {
        key,
        title: item.title.clone().filter(|t| !t.is_empty()),
        short_title: item.short_title.clone().filter(|t| !t.is_empty()),
        sponsor_id: item
            .sponsors
            .as_ref()
            .and_then(|s| s.first())
            .and_then(|s| s.bioguide_id.clone()),
        introduced_date: item.introduced_date.as_deref().and_then(parse_source_date),
        status: action_text.clone(),
        normalized_status,
        latest_action: action_text,
        latest_action_date: action_date,
        policy_area: item.policy_area.as_ref().and_then(|p| p.name.clone()),
        source_update_date: item.update_date.as_deref().and_then(parse_utc_timestamp),
    })
}

/// Split `"Last, First Middle"` into its parts.
pub fn parse_member_name(name: &str) -> (Option<String>, Option<String>, Option<String>) {
    let name = name.trim();
    if name.is_empty() {
        return (None, None, None);
    }
    match name.split_once(',') {
        Some((last, rest)) => {
            let mut given = rest.split_whitespace();
            let first = given.next().map(str::to_string);
            let middle = {
                let remainder = given.collect::<Vec<_>>().join(" ");
                if remainder.is_empty() {
                    None
                } else {
                    Some(remainder)
                }
            };
            (first, middle, Some(last.trim().to_string()))
        }
        None => (None, None, Some(name.to_string())),
    }
}

pub fn format_full_name(
    first: Option<&str>,
    middle: Option<&str>,
    last: Option<&str>,
) -> Option<String> {
    let joined = [first, middle, last]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Member-list item into canonical form. `current_year` is passed in so the
/// mapping stays deterministic.
pub fn normalize_member(
    item: &RawMemberListItem,
    current_year: i64,
) -> Result<CanonicalMember, NormalizeError> {
    let bioguide_id = item
        .bioguide_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| unmappable("bioguideId", "missing"))?;

    let (first_name, middle_name, last_name) = item
        .name
        .as_deref()
        .map(parse_member_name)
        .unwrap_or((None, None, None));
    let full_name = item.direct_order_name.clone().or_else(|| {
        format_full_name(
            first_name.as_deref(),
            middle_name.as_deref(),
            last_name.as_deref(),
        )
    });

    let terms: Vec<MemberTerm> = item
        .terms
        .clone()
        .map(|t| t.into_vec())
        .unwrap_or_default()
        .iter()
        .map(|term| MemberTerm {
            congress: term
                .congress
                .or_else(|| term.start_year.map(congress_for_year)),
            chamber: term.chamber.clone(),
            party: term.party_name.clone().or_else(|| item.party_name.clone()),
            state: term.state_code.clone().or_else(|| item.state.clone()),
            district: term.district.or(item.district),
            start_year: term.start_year,
            end_year: term.end_year,
        })
        .collect();

    let latest_term = terms.last();
    let chamber = latest_term.and_then(|t| t.chamber.clone());
    let current_member = latest_term
        .map(|t| t.end_year.is_none() || t.end_year.is_some_and(|y| y >= current_year))
        .unwrap_or(true);

    Ok(CanonicalMember {
        bioguide_id,
        first_name,
        last_name,
        full_name,
        state: item.state.clone(),
        district: item.district,
        party: item.party_name.clone(),
        chamber,
        photo_url: item.depiction.as_ref().and_then(|d| d.image_url.clone()),
        current_member,
        source_update_date: item.update_date.as_deref().and_then(parse_utc_timestamp),
        terms,
    })
}

pub fn normalize_member_detail(detail: &RawMemberDetail) -> MemberDetail {
    MemberDetail {
        birth_year: detail.birth_year.clone(),
        direct_order_name: detail.direct_order_name.clone(),
        inverted_order_name: detail.inverted_order_name.clone(),
        honorific_name: detail.honorific_name.clone(),
    }
}

const FORMAT_DISPLAY_NAMES: &[(&str, &str)] =
    &[("Formatted Text", "HTML"), ("Formatted XML", "XML"), ("PDF", "PDF")];

fn display_format(format_type: &str) -> String {
    FORMAT_DISPLAY_NAMES
        .iter()
        .find(|(raw, _)| *raw == format_type)
        .map(|(_, display)| display.to_string())
        .unwrap_or_else(|| format_type.to_string())
}

fn version_type_precedence(version_type: &str) -> u32 {
    match version_type {
        "Public Law" => 1,
        "Enrolled Bill" => 2,
        "Engrossed in Senate" | "Engrossed in House" => 3,
        "Placed on Calendar Senate" | "Placed on Calendar House" => 4,
        _ => 999,
    }
}

/// Order text versions newest-first (ties broken by version-type precedence)
/// and repair missing dates with the introduced date.
pub fn process_text_versions(
    raw: &[RawTextVersion],
    introduced_date: Option<NaiveDate>,
) -> Vec<BillTextVersion> {
    let mut versions: Vec<BillTextVersion> = raw
        .iter()
        .map(|version| {
            let repaired = version.date.is_none() && introduced_date.is_some();
            BillTextVersion {
                version_type: version.version_type.clone().unwrap_or_default(),
                date: version
                    .date
                    .as_deref()
                    .and_then(parse_source_date)
                    .or(introduced_date),
                formats: version
                    .formats
                    .iter()
                    .filter_map(|f| {
                        f.url.clone().map(|url| BillTextFormat {
                            format_type: display_format(f.format_type.as_deref().unwrap_or("")),
                            url,
                        })
                    })
                    .collect(),
                is_initial_version: repaired,
            }
        })
        .collect();

    versions.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| {
                version_type_precedence(&a.version_type)
                    .cmp(&version_type_precedence(&b.version_type))
            })
    });
    versions
}

fn format_url(version: &BillTextVersion, format_type: &str) -> Option<String> {
    version
        .formats
        .iter()
        .find(|f| f.format_type == format_type)
        .map(|f| f.url.clone())
}

/// Link to the most recent HTML rendition, falling back to any format.
pub fn extract_latest_text_url(versions: &[BillTextVersion]) -> Option<String> {
    let latest = versions.first()?;
    format_url(latest, "HTML").or_else(|| latest.formats.first().map(|f| f.url.clone()))
}

pub fn extract_law_url(versions: &[BillTextVersion]) -> Option<String> {
    let law = versions.iter().find(|v| v.version_type == "Public Law")?;
    format_url(law, "HTML").or_else(|| law.formats.first().map(|f| f.url.clone()))
}

/// Everything the bill-detail endpoint contributes for one bill.
#[derive(Debug, Clone, Default)]
pub struct BillDetailBundle {
    pub detail: BillDetail,
    pub cosponsors: Vec<BillCosponsor>,
    pub subjects: Vec<String>,
    pub committees: Vec<CanonicalCommittee>,
    pub assignments: Vec<CommitteeAssignment>,
    pub actions: Vec<BillAction>,
}

pub fn normalize_bill_detail(
    detail: &RawBillDetail,
    text_versions: &[RawTextVersion],
    actions: &[RawAction],
) -> BillDetailBundle {
    let related_bills = detail
        .related_bills
        .clone()
        .map(|r| r.into_vec())
        .unwrap_or_default()
        .iter()
        .filter_map(|related| {
            let ty = related.bill_type.as_deref()?;
            let number = related.number.as_deref()?;
            Some(match related.congress {
                Some(congress) => BillKey::new(congress, ty, number).to_string(),
                None => format!("{}{}", ty.to_ascii_lowercase(), number),
            })
        })
        .collect();

    let introduced = detail.introduced_date.as_deref().and_then(parse_source_date);
    let versions = process_text_versions(text_versions, introduced);
    let text_url = extract_latest_text_url(&versions);
    let law_url = extract_law_url(&versions);

    let cosponsors = detail
        .cosponsors
        .clone()
        .map(|c| c.into_vec())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| {
            c.bioguide_id.map(|bioguide_id| BillCosponsor {
                bioguide_id,
                full_name: c.full_name,
                party: c.party,
                state: c.state,
            })
        })
        .collect();

    let subjects = detail
        .subjects
        .clone()
        .map(|s| s.into_vec())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.name)
        .collect();

    let raw_committees: Vec<RawCommittee> = detail
        .committees
        .clone()
        .map(|c| c.into_vec())
        .unwrap_or_default();
    let committees = raw_committees
        .iter()
        .filter_map(|c| {
            c.system_code.clone().map(|committee_code| CanonicalCommittee {
                committee_code,
                name: c.name.clone(),
                chamber: c.chamber.clone(),
                committee_type: c.committee_type.clone(),
            })
        })
        .collect();
    let assignments = raw_committees
        .iter()
        .filter_map(|c| {
            c.system_code.clone().map(|committee_code| CommitteeAssignment {
                committee_code,
                name: c.name.clone(),
                chamber: c.chamber.clone(),
            })
        })
        .collect();

    let actions = actions
        .iter()
        .filter_map(|action| {
            action.text.clone().map(|text| BillAction {
                action_date: action.action_date.as_deref().and_then(parse_source_date),
                text,
                action_type: action.action_type.clone(),
            })
        })
        .collect();

    BillDetailBundle {
        detail: BillDetail {
            related_bills,
            text_versions: versions,
            text_url,
            law_url,
        },
        cosponsors,
        subjects,
        committees,
        assignments,
        actions,
    }
}

// ---------------------------------------------------------------------------
// HTML text extraction
// ---------------------------------------------------------------------------

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain text of an HTML bill text rendition, for the enrichment prompt.
pub fn extract_bill_text(html: &str) -> String {
    let document = Html::parse_document(html);
    collapse_whitespace(&document.root_element().text().collect::<String>())
}

const BIO_SELECTORS: &[&str] = &[
    ".c-tabs-container__page--active .u-inline-paragraphs",
    ".biography",
    ".bioguide-info",
    "#biography",
    "#bioguide-info",
];

/// Biography text from a bioguide profile page, trying the known container
/// first and older layouts as fallbacks.
pub fn extract_bio_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    for selector in BIO_SELECTORS.iter().copied() {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        if let Some(node) = document.select(&sel).next() {
            let text = collapse_whitespace(&node.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Page parsing (pure halves of the paged adapters)
// ---------------------------------------------------------------------------

pub fn parse_bill_list_page(
    body: &[u8],
    offset: i64,
) -> Result<(Vec<RawBillListItem>, Option<i64>), SourceError> {
    let response: RawBillListResponse = serde_json::from_slice(body)
        .map_err(|e| SourceError::MalformedResponse(format!("bill list page: {e}")))?;
    let records: Vec<RawBillListItem> = response
        .bills
        .into_iter()
        .filter_map(RawBillEnvelope::into_latest)
        .collect();
    let next_offset = next_offset_for(&response.pagination, offset, records.len());
    Ok((records, next_offset))
}

pub fn parse_member_list_page(
    body: &[u8],
    offset: i64,
) -> Result<(Vec<RawMemberListItem>, Option<i64>), SourceError> {
    let response: RawMemberListResponse = serde_json::from_slice(body)
        .map_err(|e| SourceError::MalformedResponse(format!("member list page: {e}")))?;
    let next_offset = next_offset_for(&response.pagination, offset, response.members.len());
    Ok((response.members, next_offset))
}

fn next_offset_for(
    pagination: &Option<RawPagination>,
    offset: i64,
    page_len: usize,
) -> Option<i64> {
    match pagination {
        Some(p) if p.next.is_some() && page_len > 0 => Some(offset + page_len as i64),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Paged adapters
// ---------------------------------------------------------------------------

pub struct BillListAdapter {
    client: CongressClient,
}

impl BillListAdapter {
    pub fn new(client: CongressClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PagedSource for BillListAdapter {
    type Record = RawBillListItem;

    fn endpoint_id(&self) -> &'static str {
        "bill-list"
    }

    async fn fetch_page(
        &self,
        cursor: &PageCursor,
    ) -> Result<FetchedPage<Self::Record>, SourceError> {
        let mut params = vec![
            ("limit", self.client.page_size().to_string()),
            ("offset", cursor.offset.to_string()),
            ("sort", "updateDate desc".to_string()),
        ];
        if let Some(since) = cursor.since {
            params.push(("fromDateTime", since.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        let (_, body) = self
            .client
            .get_json(self.endpoint_id(), "bill", &params)
            .await?;
        let fetched_at = Utc::now();
        let (records, next_offset) = parse_bill_list_page(&body, cursor.offset)?;
        Ok(FetchedPage {
            records,
            next_offset,
            raw_body: body,
            fetched_at,
        })
    }
}

pub struct MemberListAdapter {
    client: CongressClient,
}

impl MemberListAdapter {
    pub fn new(client: CongressClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PagedSource for MemberListAdapter {
    type Record = RawMemberListItem;

    fn endpoint_id(&self) -> &'static str {
        "member-list"
    }

    async fn fetch_page(
        &self,
        cursor: &PageCursor,
    ) -> Result<FetchedPage<Self::Record>, SourceError> {
        let mut params = vec![
            ("limit", self.client.page_size().to_string()),
            ("offset", cursor.offset.to_string()),
        ];
        if let Some(since) = cursor.since {
            params.push(("fromDateTime", since.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        let (_, body) = self
            .client
            .get_json(self.endpoint_id(), "member", &params)
            .await?;
        let fetched_at = Utc::now();
        let (records, next_offset) = parse_member_list_page(&body, cursor.offset)?;
        Ok(FetchedPage {
            records,
            next_offset,
            raw_body: body,
            fetched_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Detail adapters
// ---------------------------------------------------------------------------

pub struct BillDetailAdapter {
    client: CongressClient,
}

pub struct FetchedBillDetail {
    pub bundle: BillDetailBundle,
    pub raw_detail: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl BillDetailAdapter {
    pub fn new(client: CongressClient) -> Self {
        Self { client }
    }

    pub fn endpoint_id(&self) -> &'static str {
        "bill-detail"
    }

    pub async fn fetch_detail(&self, key: &BillKey) -> Result<FetchedBillDetail, SourceError> {
        let path = format!("bill/{}/{}/{}", key.congress, key.bill_type, key.number);
        let (value, raw_detail) = self.client.get_json(self.endpoint_id(), &path, &[]).await?;
        let detail: RawBillDetailResponse = serde_json::from_value(value)
            .map_err(|e| SourceError::MalformedResponse(format!("bill detail {key}: {e}")))?;
        let fetched_at = Utc::now();

        // Text and action listings are best-effort; an absent sub-resource
        // must not sink the whole detail fetch.
        let text_versions = match self
            .client
            .get_json(self.endpoint_id(), &format!("{path}/text"), &[])
            .await
        {
            Ok((value, _)) => serde_json::from_value::<RawTextVersionsResponse>(value)
                .map(|r| r.text_versions)
                .unwrap_or_default(),
            Err(SourceError::NotFound(_)) => Vec::new(),
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                warn!(bill = %key, error = %err, "text versions unavailable");
                Vec::new()
            }
        };

        let actions = match self
            .client
            .get_json(self.endpoint_id(), &format!("{path}/actions"), &[])
            .await
        {
            Ok((value, _)) => serde_json::from_value::<RawActionsResponse>(value)
                .map(|r| r.actions)
                .unwrap_or_default(),
            Err(SourceError::NotFound(_)) => Vec::new(),
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                warn!(bill = %key, error = %err, "actions unavailable");
                Vec::new()
            }
        };

        Ok(FetchedBillDetail {
            bundle: normalize_bill_detail(&detail.bill, &text_versions, &actions),
            raw_detail,
            fetched_at,
        })
    }

    /// Fetch and strip the HTML bill text rendition behind a text-version URL.
    pub async fn fetch_bill_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .fetcher
            .get(self.endpoint_id(), url, &[])
            .await
            .map_err(SourceError::from)?;
        Ok(extract_bill_text(&String::from_utf8_lossy(&response.body)))
    }
}

pub struct MemberDetailAdapter {
    client: CongressClient,
}

pub struct FetchedMemberDetail {
    pub detail: MemberDetail,
    pub raw_body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl MemberDetailAdapter {
    pub fn new(client: CongressClient) -> Self {
        Self { client }
    }

    pub fn endpoint_id(&self) -> &'static str {
        "member-detail"
    }

    pub async fn fetch_detail(
        &self,
        bioguide_id: &str,
    ) -> Result<FetchedMemberDetail, SourceError> {
        let path = format!("member/{bioguide_id}");
        let (value, raw_body) = self.client.get_json(self.endpoint_id(), &path, &[]).await?;
        let response: RawMemberDetailResponse = serde_json::from_value(value).map_err(|e| {
            SourceError::MalformedResponse(format!("member detail {bioguide_id}: {e}"))
        })?;
        Ok(FetchedMemberDetail {
            detail: normalize_member_detail(&response.member),
            raw_body,
            fetched_at: Utc::now(),
        })
    }
}

/// Bioguide profile scraper for biography text.
pub struct MemberBioAdapter {
    fetcher: HttpFetcher,
    base_url: String,
}

pub struct FetchedMemberBio {
    pub biography: Option<String>,
    pub raw_body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl MemberBioAdapter {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_id(&self) -> &'static str {
        "member-bio"
    }

    pub async fn fetch_bio(&self, bioguide_id: &str) -> Result<FetchedMemberBio, SourceError> {
        let url = format!("{}/{}", self.base_url, bioguide_id);
        let response = self
            .fetcher
            .get(self.endpoint_id(), &url, &[])
            .await
            .map_err(SourceError::from)?;
        let biography = extract_bio_text(&String::from_utf8_lossy(&response.body));
        Ok(FetchedMemberBio {
            biography,
            raw_body: response.body,
            fetched_at: Utc::now(),
        })
    }
}

/// Year component of a UTC instant, for the `current_member` cutoff.
pub fn utc_year(now: DateTime<Utc>) -> i64 {
    i64::from(now.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BILL_PAGE: &str = r#"{
        "bills": [
            {
                "congress": 118,
                "type": "HR",
                "number": "2670",
                "title": "National Defense Authorization Act for Fiscal Year 2024",
                "latestAction": {
                    "actionDate": "2023-07-14",
                    "text": "Passed the House by recorded vote."
                },
                "updateDate": "2023-07-15T06:30:00Z",
                "sponsors": [{"bioguideId": "R000575", "fullName": "Rep. Rogers, Mike"}],
                "policyArea": {"name": "Armed Forces and National Security"}
            },
            {
                "bill": [
                    {"congress": 12, "type": "HR", "number": "1", "updateDate": "2022-01-01"},
                    {"congress": 12, "type": "HR", "number": "1", "updateDate": "2023-01-01",
                     "latestAction": {"actionDate": "1812-06-01", "text": "Referred to committee."}}
                ]
            }
        ],
        "pagination": {"count": 500, "next": "https://api.congress.gov/v3/bill?offset=250"}
    }"#;

    #[test]
    fn bill_list_page_parses_both_envelope_shapes() {
        let (records, next) = parse_bill_list_page(BILL_PAGE.as_bytes(), 0).expect("parse page");
        assert_eq!(records.len(), 2);
        assert_eq!(next, Some(2));

        // The historical multi-version entry keeps the freshest version.
        assert_eq!(records[1].update_date.as_deref(), Some("2023-01-01"));
        assert_eq!(records[1].congress, Some(12));
    }

    #[test]
    fn bill_list_page_without_next_terminates() {
        let body = r#"{"bills": [], "pagination": {"count": 0}}"#;
        let (records, next) = parse_bill_list_page(body.as_bytes(), 250).expect("parse page");
        assert!(records.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn malformed_page_surfaces_as_malformed_response() {
        let err = parse_bill_list_page(b"<html>not json</html>", 0).unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse(_)));
    }

    #[test]
    fn normalize_bill_maps_fields_and_status() {
        let (records, _) = parse_bill_list_page(BILL_PAGE.as_bytes(), 0).expect("parse page");
        let bill = normalize_bill(&records[0]).expect("normalize");

        assert_eq!(bill.key.to_string(), "hr2670-118");
        assert_eq!(bill.sponsor_id.as_deref(), Some("R000575"));
        assert_eq!(bill.normalized_status, Some(BillStatus::PassedHouse));
        assert_eq!(
            bill.latest_action_date,
            NaiveDate::from_ymd_opt(2023, 7, 14)
        );
        assert_eq!(
            bill.policy_area.as_deref(),
            Some("Armed Forces and National Security")
        );
        assert_eq!(
            bill.source_update_date.map(|t| t.to_rfc3339()),
            Some("2023-07-15T06:30:00+00:00".to_string())
        );
    }

    #[test]
    fn normalize_bill_is_deterministic() {
        let (records, _) = parse_bill_list_page(BILL_PAGE.as_bytes(), 0).expect("parse page");
        let first = normalize_bill(&records[0]).expect("normalize");
        let second = normalize_bill(&records[0]).expect("normalize");
        assert_eq!(first, second);
    }

    #[test]
    fn unrecognized_status_passes_through_raw() {
        let item = RawBillListItem {
            congress: Some(118),
            bill_type: Some("S".to_string()),
            number: Some("100".to_string()),
            latest_action: Some(RawLatestAction {
                action_date: Some("2023-05-01".to_string()),
                text: Some("PASSED_SENATE_AMENDED".to_string()),
            }),
            ..Default::default()
        };
        let bill = normalize_bill(&item).expect("normalize");
        assert_eq!(bill.status.as_deref(), Some("PASSED_SENATE_AMENDED"));
        assert_eq!(bill.normalized_status, None);
    }

    #[test]
    fn missing_sponsor_is_none_not_an_error() {
        let item = RawBillListItem {
            congress: Some(118),
            bill_type: Some("hr".to_string()),
            number: Some("42".to_string()),
            ..Default::default()
        };
        let bill = normalize_bill(&item).expect("normalize");
        assert_eq!(bill.sponsor_id, None);
        assert_eq!(bill.title, None);
    }

    #[test]
    fn missing_natural_key_is_unmappable() {
        let item = RawBillListItem {
            congress: Some(118),
            bill_type: Some("hr".to_string()),
            ..Default::default()
        };
        let err = normalize_bill(&item).unwrap_err();
        assert_eq!(err.field, "number");
    }

    #[test]
    fn fetch_errors_map_onto_the_taxonomy() {
        let cases = [
            (401, "authentication"),
            (403, "authentication"),
            (404, "not found"),
            (429, "rate limited"),
            (500, "transient"),
        ];
        for (status, expectation) in cases {
            let err = SourceError::from(FetchError::HttpStatus {
                status,
                url: "https://api.congress.gov/v3/bill".to_string(),
            });
            match (status, &err) {
                (401 | 403, SourceError::AuthFailed(_)) => {}
                (404, SourceError::NotFound(_)) => {}
                (429, SourceError::RateLimited(_)) => {}
                (500, SourceError::Transient(_)) => {}
                _ => panic!("status {status} expected {expectation}, got {err:?}"),
            }
        }
    }

    #[test]
    fn member_names_parse_in_inverted_order() {
        let (first, middle, last) = parse_member_name("Sanders, Bernard");
        assert_eq!(first.as_deref(), Some("Bernard"));
        assert_eq!(middle, None);
        assert_eq!(last.as_deref(), Some("Sanders"));

        let (first, middle, last) = parse_member_name("Jackson Lee, Sheila A.");
        assert_eq!(first.as_deref(), Some("Sheila"));
        assert_eq!(middle.as_deref(), Some("A."));
        assert_eq!(last.as_deref(), Some("Jackson Lee"));
        assert_eq!(
            format_full_name(first.as_deref(), middle.as_deref(), last.as_deref()).as_deref(),
            Some("Sheila A. Jackson Lee")
        );
    }

    #[test]
    fn member_normalization_handles_terms_and_currency() {
        let body = r#"{
            "members": [{
                "bioguideId": "S000033",
                "name": "Sanders, Bernard",
                "partyName": "Independent",
                "state": "Vermont",
                "terms": {"item": [
                    {"chamber": "House of Representatives", "startYear": 1991, "endYear": 2007},
                    {"chamber": "Senate", "startYear": 2007}
                ]},
                "depiction": {"imageUrl": "https://bioguide.congress.gov/photo/s000033.jpg"},
                "updateDate": "2024-06-28T14:00:13Z"
            }],
            "pagination": {"count": 1}
        }"#;
        let (members, next) = parse_member_list_page(body.as_bytes(), 0).expect("parse page");
        assert_eq!(next, None);

        let member = normalize_member(&members[0], 2025).expect("normalize");
        assert_eq!(member.bioguide_id, "S000033");
        assert_eq!(member.first_name.as_deref(), Some("Bernard"));
        assert_eq!(member.last_name.as_deref(), Some("Sanders"));
        assert_eq!(member.full_name.as_deref(), Some("Bernard Sanders"));
        assert_eq!(member.chamber.as_deref(), Some("Senate"));
        assert!(member.current_member);
        assert_eq!(member.terms.len(), 2);
        // Congress derived from the start year when absent.
        assert_eq!(member.terms[0].congress, Some(102));
        assert_eq!(member.terms[1].congress, Some(110));

        // A term ended before the cutoff year means no longer serving.
        let past = normalize_member(
            &RawMemberListItem {
                bioguide_id: Some("X000000".to_string()),
                terms: Some(RawItems::List(vec![RawMemberTerm {
                    chamber: Some("Senate".to_string()),
                    congress: None,
                    start_year: Some(2001),
                    end_year: Some(2013),
                    party_name: None,
                    state_code: None,
                    district: None,
                }])),
                ..Default::default()
            },
            2025,
        )
        .expect("normalize");
        assert!(!past.current_member);
    }

    #[test]
    fn member_without_bioguide_id_is_unmappable() {
        let err = normalize_member(&RawMemberListItem::default(), 2025).unwrap_err();
        assert_eq!(err.field, "bioguideId");
    }

    #[test]
    fn text_versions_repair_dates_and_order_newest_first() {
        let raw = vec![
            RawTextVersion {
                date: None,
                version_type: Some("Introduced in House".to_string()),
                formats: vec![RawTextFormat {
                    format_type: Some("Formatted Text".to_string()),
                    url: Some("https://example.gov/ih.htm".to_string()),
                }],
            },
            RawTextVersion {
                date: Some("2024-01-10".to_string()),
                version_type: Some("Public Law".to_string()),
                formats: vec![
                    RawTextFormat {
                        format_type: Some("Formatted XML".to_string()),
                        url: Some("https://example.gov/pl.xml".to_string()),
                    },
                    RawTextFormat {
                        format_type: Some("Formatted Text".to_string()),
                        url: Some("https://example.gov/pl.htm".to_string()),
                    },
                ],
            },
            RawTextVersion {
                date: Some("2024-01-10".to_string()),
                version_type: Some("Enrolled Bill".to_string()),
                formats: vec![RawTextFormat {
                    format_type: Some("PDF".to_string()),
                    url: Some("https://example.gov/enr.pdf".to_string()),
                }],
            },
        ];
        let introduced = NaiveDate::from_ymd_opt(2023, 3, 1);
        let versions = process_text_versions(&raw, introduced);

        assert_eq!(versions[0].version_type, "Public Law");
        assert_eq!(versions[1].version_type, "Enrolled Bill");
        assert_eq!(versions[2].version_type, "Introduced in House");
        assert_eq!(versions[2].date, introduced);
        assert!(versions[2].is_initial_version);
        assert_eq!(versions[0].formats[0].format_type, "XML");

        assert_eq!(
            extract_latest_text_url(&versions).as_deref(),
            Some("https://example.gov/pl.htm")
        );
        assert_eq!(
            extract_law_url(&versions).as_deref(),
            Some("https://example.gov/pl.htm")
        );
    }

    #[test]
    fn bill_detail_bundle_collects_relations() {
        let body = r#"{
            "bill": {
                "congress": 118,
                "type": "HR",
                "number": "2670",
                "introducedDate": "2023-04-18",
                "cosponsors": {"item": [
                    {"bioguideId": "S000033", "fullName": "Sen. Sanders", "party": "I", "state": "VT"},
                    {"fullName": "Unknown cosponsor without id"}
                ]},
                "subjects": {"item": [{"name": "Armed forces"}, {"name": "Military readiness"}]},
                "committees": {"item": [
                    {"systemCode": "hsas00", "name": "Armed Services Committee", "chamber": "House", "type": "Standing"}
                ]},
                "relatedBills": [{"type": "S", "number": 2226, "congress": 118}]
            }
        }"#;
        let parsed: RawBillDetailResponse = serde_json::from_str(body).expect("parse detail");
        let actions = vec![RawAction {
            action_date: Some("2023-04-18".to_string()),
            text: Some("Introduced in House".to_string()),
            action_type: Some("IntroReferral".to_string()),
        }];
        let bundle = normalize_bill_detail(&parsed.bill, &[], &actions);

        assert_eq!(bundle.cosponsors.len(), 1);
        assert_eq!(bundle.cosponsors[0].bioguide_id, "S000033");
        assert_eq!(bundle.subjects, vec!["Armed forces", "Military readiness"]);
        assert_eq!(bundle.committees.len(), 1);
        assert_eq!(bundle.assignments[0].committee_code, "hsas00");
        assert_eq!(bundle.detail.related_bills, vec!["s2226-118"]);
        assert_eq!(bundle.actions.len(), 1);
    }

    #[test]
    fn bio_extraction_walks_the_selector_fallback_chain() {
        let current_layout = r#"
            <div class="c-tabs-container__page--active">
              <div class="u-inline-paragraphs"><p>SANDERS, Bernard, a Senator from Vermont.</p></div>
            </div>"#;
        assert_eq!(
            extract_bio_text(current_layout).as_deref(),
            Some("SANDERS, Bernard, a Senator from Vermont.")
        );

        let legacy_layout = r#"<div id="biography"><p>Legacy layout biography.</p></div>"#;
        assert_eq!(
            extract_bio_text(legacy_layout).as_deref(),
            Some("Legacy layout biography.")
        );

        assert_eq!(extract_bio_text("<html><body></body></html>"), None);
    }

    #[test]
    fn bill_text_extraction_collapses_markup() {
        let html = r#"<html><body>
            <h1>  An Act  </h1>
            <p>To authorize    appropriations for fiscal year 2024.</p>
        </body></html>"#;
        assert_eq!(
            extract_bill_text(html),
            "An Act To authorize appropriations for fiscal year 2024."
        );
    }

    #[test]
    fn timestamps_without_offsets_are_read_as_utc() {
        assert_eq!(
            parse_utc_timestamp("2023-07-15T06:30:00Z").map(|t| t.to_rfc3339()),
            Some("2023-07-15T06:30:00+00:00".to_string())
        );
        assert_eq!(
            parse_utc_timestamp("2023-07-15T06:30:00").map(|t| t.to_rfc3339()),
            Some("2023-07-15T06:30:00+00:00".to_string())
        );
        assert_eq!(
            parse_utc_timestamp("2023-07-15").map(|t| t.to_rfc3339()),
            Some("2023-07-15T00:00:00+00:00".to_string())
        );
        assert_eq!(parse_utc_timestamp("July 15, 2023"), None);
    }
}
