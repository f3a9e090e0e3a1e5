//! Core domain model for the legislative ingestion pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "legis-core";

/// Natural key for a bill: congress + bill type + number, e.g. `hr2670-118`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillKey {
    pub congress: u16,
    pub bill_type: String,
    pub number: String,
}

impl BillKey {
    pub fn new(congress: u16, bill_type: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            congress,
            bill_type: bill_type.into().to_ascii_lowercase(),
            number: number.into(),
        }
    }

    /// Parse the canonical `<type><number>-<congress>` form.
    pub fn parse(input: &str) -> Option<Self> {
        let (head, congress) = input.rsplit_once('-')?;
        let congress: u16 = congress.parse().ok()?;
        let (bill_type, number) = split_bill_number(head)?;
        Some(Self::new(congress, bill_type, number))
    }

    /// Congress.gov landing page for this bill.
    pub fn source_url(&self) -> String {
        format!(
            "https://www.congress.gov/bill/{}th-congress/{}/{}",
            self.congress, self.bill_type, self.number
        )
    }
}

impl std::fmt::Display for BillKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}-{}", self.bill_type, self.number, self.congress)
    }
}

/// Split a compact bill number like `SJRES33` into `("sjres", "33")`.
pub fn split_bill_number(input: &str) -> Option<(String, String)> {
    let digits_at = input.find(|c: char| c.is_ascii_digit())?;
    if digits_at == 0 {
        return None;
    }
    let (ty, num) = input.split_at(digits_at);
    if !num.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((ty.to_ascii_lowercase(), num.to_string()))
}

/// Normalized bill progression states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillStatus {
    #[serde(rename = "Introduced")]
    Introduced,
    #[serde(rename = "In Committee")]
    InCommittee,
    #[serde(rename = "Reported")]
    Reported,
    #[serde(rename = "Passed House")]
    PassedHouse,
    #[serde(rename = "Passed Senate")]
    PassedSenate,
    #[serde(rename = "Passed Both Chambers")]
    PassedBothChambers,
    #[serde(rename = "Enacted")]
    Enacted,
    #[serde(rename = "Became Law")]
    BecameLaw,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Introduced => "Introduced",
            BillStatus::InCommittee => "In Committee",
            BillStatus::Reported => "Reported",
            BillStatus::PassedHouse => "Passed House",
            BillStatus::PassedSenate => "Passed Senate",
            BillStatus::PassedBothChambers => "Passed Both Chambers",
            BillStatus::Enacted => "Enacted",
            BillStatus::BecameLaw => "Became Law",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Introduced" => Some(BillStatus::Introduced),
            "In Committee" => Some(BillStatus::InCommittee),
            "Reported" => Some(BillStatus::Reported),
            "Passed House" => Some(BillStatus::PassedHouse),
            "Passed Senate" => Some(BillStatus::PassedSenate),
            "Passed Both Chambers" => Some(BillStatus::PassedBothChambers),
            "Enacted" => Some(BillStatus::Enacted),
            "Became Law" => Some(BillStatus::BecameLaw),
            _ => None,
        }
    }

    /// Numeric position in the legislative progression. Higher means further
    /// along; chamber passage in either order shares a rank.
    pub fn rank(&self) -> u8 {
        match self {
            BillStatus::Introduced => 10,
            BillStatus::InCommittee => 20,
            BillStatus::Reported => 30,
            BillStatus::PassedHouse | BillStatus::PassedSenate => 40,
            BillStatus::PassedBothChambers => 50,
            BillStatus::Enacted => 60,
            BillStatus::BecameLaw => 70,
        }
    }

    /// Map a latest-action text to a normalized status.
    ///
    /// Matching is phrase-over-token based: status-code strings such as
    /// `PASSED_SENATE_AMENDED` stay a single token and fall through to `None`
    /// instead of being mistaken for chamber passage.
    pub fn from_action_text(action_text: &str) -> Option<Self> {
        let toks = action_tokens(action_text);
        let has = |phrase: &str| has_phrase(&toks, phrase);

        if has("became public law") || has("became law") {
            return Some(BillStatus::BecameLaw);
        }
        if has("enacted") || has("approved by president") {
            return Some(BillStatus::Enacted);
        }
        if has("passed") {
            if has("house") {
                return Some(BillStatus::PassedHouse);
            }
            if has("senate") {
                return Some(BillStatus::PassedSenate);
            }
        }

        // Calendar placement follows committee reporting in both chambers.
        if has("placed on") && has("calendar") && (has("senate") || has("union calendar")) {
            return Some(BillStatus::Reported);
        }

        if has("reported") || has("ordered to be reported") {
            return Some(BillStatus::Reported);
        }
        if has("referred to") || has("committee") || has("held at the desk") {
            return Some(BillStatus::InCommittee);
        }

        if has("introduced") || has("introduction") {
            return Some(BillStatus::Introduced);
        }

        if has("motion to reconsider laid on the table agreed to") {
            if has("house") {
                return Some(BillStatus::PassedHouse);
            }
            if has("senate") {
                return Some(BillStatus::PassedSenate);
            }
        }

        None
    }
}

fn action_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_ascii_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn has_phrase(tokens: &[String], phrase: &str) -> bool {
    let wanted: Vec<&str> = phrase.split_whitespace().collect();
    if wanted.is_empty() || tokens.len() < wanted.len() {
        return false;
    }
    tokens
        .windows(wanted.len())
        .any(|w| w.iter().zip(&wanted).all(|(t, p)| t == p))
}

/// Canonical bill record as produced by the bill-list normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBill {
    pub key: BillKey,
    pub title: Option<String>,
    pub short_title: Option<String>,
    pub sponsor_id: Option<String>,
    pub introduced_date: Option<NaiveDate>,
    /// Raw latest-action text as delivered by the source.
    pub status: Option<String>,
    pub normalized_status: Option<BillStatus>,
    pub latest_action: Option<String>,
    pub latest_action_date: Option<NaiveDate>,
    pub policy_area: Option<String>,
    pub source_update_date: Option<DateTime<Utc>>,
}

/// Enrichment produced by the bill-detail endpoint, applied on top of an
/// existing bill row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BillDetail {
    pub related_bills: Vec<String>,
    pub text_versions: Vec<BillTextVersion>,
    pub text_url: Option<String>,
    pub law_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillTextVersion {
    pub version_type: String,
    pub date: Option<NaiveDate>,
    pub formats: Vec<BillTextFormat>,
    pub is_initial_version: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillTextFormat {
    pub format_type: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillAction {
    pub action_date: Option<NaiveDate>,
    pub text: String,
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillCosponsor {
    pub bioguide_id: String,
    pub full_name: Option<String>,
    pub party: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeAssignment {
    pub committee_code: String,
    pub name: Option<String>,
    pub chamber: Option<String>,
}

/// Canonical member record keyed by bioguide id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMember {
    pub bioguide_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub state: Option<String>,
    pub district: Option<i64>,
    pub party: Option<String>,
    pub chamber: Option<String>,
    pub photo_url: Option<String>,
    pub current_member: bool,
    pub source_update_date: Option<DateTime<Utc>>,
    pub terms: Vec<MemberTerm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberTerm {
    pub congress: Option<i64>,
    pub chamber: Option<String>,
    pub party: Option<String>,
    pub state: Option<String>,
    pub district: Option<i64>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
}

/// Congress number for a term starting in the given year. The 1st Congress
/// convened in 1789 and each seats for two years.
pub fn congress_for_year(start_year: i64) -> i64 {
    (start_year - 1789) / 2 + 1
}

/// Name/birth details from the member-detail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MemberDetail {
    pub birth_year: Option<String>,
    pub direct_order_name: Option<String>,
    pub inverted_order_name: Option<String>,
    pub honorific_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCommittee {
    pub committee_code: String,
    pub name: Option<String>,
    pub chamber: Option<String>,
    pub committee_type: Option<String>,
}

/// AI-proposed tag with its reported confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCandidate {
    pub tag_type: String,
    pub name: String,
    pub confidence: f64,
}

/// Normalized form of a tag name: lowercase, `&` spelled out, any other
/// non-alphanumeric run collapsed to a single underscore.
pub fn normalize_tag_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c == '&' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.push_str("and");
            pending_sep = false;
        } else if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Fetch progress for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub timestamp: Option<DateTime<Utc>>,
    pub offset: i64,
}

impl SyncCursor {
    pub fn start() -> Self {
        Self {
            timestamp: None,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "error")]
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncStatus::Idle),
            "running" => Some(SyncStatus::Running),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// Entity families the pipeline can be triggered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Bills,
    BillDetails,
    Members,
    MemberDetails,
    MemberBios,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Bills,
        EntityKind::BillDetails,
        EntityKind::Members,
        EntityKind::MemberDetails,
        EntityKind::MemberBios,
    ];

    /// Stable identifier used as the sync-state key for this endpoint.
    pub fn endpoint_id(&self) -> &'static str {
        match self {
            EntityKind::Bills => "bill-list",
            EntityKind::BillDetails => "bill-detail",
            EntityKind::Members => "member-list",
            EntityKind::MemberDetails => "member-detail",
            EntityKind::MemberBios => "member-bio",
        }
    }

    pub fn from_endpoint_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.endpoint_id() == id)
    }
}
