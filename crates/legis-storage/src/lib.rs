//! Relational store, raw-artifact storage, and HTTP fetch utilities for the
//! legislative ingestion pipeline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use legis_core::{
    normalize_tag_name, BillAction, BillCosponsor, BillDetail, BillKey, BillStatus, CanonicalBill,
    CanonicalCommittee, CanonicalMember, CommitteeAssignment, MemberDetail, MemberTerm, SyncCursor,
    SyncStatus,
};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "legis-storage";

// ---------------------------------------------------------------------------
// Raw artifact storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, hash-addressed archive of raw source payloads.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(stamp)
            .join(source_id)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Store bytes immutably using a hash-addressed path and atomic temp-file rename.
    pub async fn store_bytes(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            self.artifact_relative_path(fetched_at, source_id, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating artifact directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_name = format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len());
        let temp_path = absolute_path
            .parent()
            .expect("artifact path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredArtifact {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }

    /// Remove timestamped artifact directories older than the retention window.
    pub async fn prune_older_than(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> anyhow::Result<usize> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(0);
        }
        let cutoff = now - max_age;
        let mut removed = 0usize;
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading artifact root {}", self.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(stamp) = NaiveDateTime::parse_from_str(&name, "%Y%m%d_%H%M%S") else {
                continue;
            };
            let stamp = DateTime::<Utc>::from_naive_utc_and_offset(stamp, Utc);
            if stamp < cutoff {
                fs::remove_dir_all(entry.path())
                    .await
                    .with_context(|| format!("removing stale artifacts {}", name))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Retry / backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Position of one network call inside its retry budget. The fetch loop only
/// sleeps in `BackingOff` and only issues requests in `Attempting`, so the
/// policy itself stays testable without any network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: usize },
    BackingOff { attempt: usize, delay: Duration },
    Exhausted,
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn initial(&self) -> RetryState {
        RetryState::Attempting { attempt: 0 }
    }

    pub fn after_failure(&self, state: RetryState, disposition: RetryDisposition) -> RetryState {
        match (state, disposition) {
            (RetryState::Attempting { attempt }, RetryDisposition::Retryable)
                if attempt < self.max_retries =>
            {
                RetryState::BackingOff {
                    attempt,
                    delay: self.delay_for_attempt(attempt),
                }
            }
            _ => RetryState::Exhausted,
        }
    }

    pub fn resume(&self, state: RetryState) -> RetryState {
        match state {
            RetryState::BackingOff { attempt, .. } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// Fixed minimum spacing between consecutive requests to one source.
#[derive(Debug)]
pub struct FixedDelay {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl FixedDelay {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!(?wait_time, "rate limiting: waiting");
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
    pub min_interval: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
            min_interval: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

/// One fetcher per upstream source; carries that source's pacing and retry
/// budget so rate limits are respected deterministically.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token_bucket: Option<SimpleTokenBucket>,
    pacer: Option<FixedDelay>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| SimpleTokenBucket::new(c.capacity, c.refill_every));
        let pacer = config.min_interval.map(FixedDelay::new);

        Ok(Self {
            client,
            token_bucket,
            pacer,
            backoff: config.backoff,
        })
    }

    async fn throttle(&self) {
        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }
    }

    pub async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        self.execute_with_retry(source_id, url, || self.client.get(url).query(query))
            .await
    }

    pub async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        self.execute_with_retry(source_id, url, || {
            let mut req = self.client.post(url).json(body);
            for (name, value) in headers {
                req = req.header(*name, value.as_str());
            }
            req
        })
        .await
    }

    async fn execute_with_retry(
        &self,
        source_id: &str,
        url: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<FetchedResponse, FetchError> {
        let mut state = self.backoff.initial();
        let mut last_request_error: Option<reqwest::Error> = None;
        let mut last_status: Option<(u16, String)> = None;

        loop {
            match state {
                RetryState::Attempting { attempt } => {
                    self.throttle().await;
                    debug!(source_id, url, attempt, "issuing request");
                    match build().send().await {
                        Ok(resp) => {
                            let status = resp.status();
                            let final_url = resp.url().to_string();
                            if status.is_success() {
                                let body = resp.bytes().await?.to_vec();
                                return Ok(FetchedResponse {
                                    status,
                                    final_url,
                                    body,
                                });
                            }
                            let disposition = classify_status(status);
                            last_status = Some((status.as_u16(), final_url));
                            last_request_error = None;
                            state = self.backoff.after_failure(state, disposition);
                        }
                        Err(err) => {
                            let disposition = classify_reqwest_error(&err);
                            last_request_error = Some(err);
                            last_status = None;
                            state = self.backoff.after_failure(state, disposition);
                        }
                    }
                }
                RetryState::BackingOff { attempt, delay } => {
                    warn!(source_id, url, attempt, ?delay, "backing off before retry");
                    tokio::time::sleep(delay).await;
                    state = self.backoff.resume(state);
                }
                RetryState::Exhausted => {
                    if let Some((status, url)) = last_status.take() {
                        return Err(FetchError::HttpStatus { status, url });
                    }
                    return Err(FetchError::Request(
                        last_request_error
                            .take()
                            .expect("exhausted retry loop records its last error"),
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relational store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("tag name {0:?} normalizes to nothing")]
    InvalidTagName(String),
    #[error("parent {parent_id} would create a tag hierarchy cycle through {tag_id}")]
    TagCycle { tag_id: i64, parent_id: i64 },
    #[error("no stored row for {0}")]
    MissingRow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Whether a relation set accumulates history or mirrors current state.
/// Declared per relation type; never inferred at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSemantics {
    Append,
    ReplaceCurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Actions,
    Cosponsors,
    Subjects,
    MemberTerms,
    CommitteeAssignments,
}

impl RelationKind {
    pub fn semantics(self) -> RelationSemantics {
        match self {
            RelationKind::Actions
            | RelationKind::Cosponsors
            | RelationKind::Subjects
            | RelationKind::MemberTerms => RelationSemantics::Append,
            RelationKind::CommitteeAssignments => RelationSemantics::ReplaceCurrent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagRow {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SyncStateRow {
    pub endpoint: String,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub last_successful_offset: Option<i64>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PendingBill {
    pub bill_number: String,
    pub title: Option<String>,
    pub text_url: Option<String>,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        endpoint TEXT PRIMARY KEY,
        last_sync_timestamp TEXT,
        last_successful_offset INTEGER,
        status TEXT NOT NULL DEFAULT 'idle',
        last_error TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bills (
        bill_number TEXT PRIMARY KEY,
        congress INTEGER NOT NULL,
        bill_type TEXT NOT NULL,
        number TEXT NOT NULL,
        title TEXT,
        short_title TEXT,
        sponsor_id TEXT,
        introduced_date TEXT,
        status TEXT,
        normalized_status TEXT,
        latest_action TEXT,
        latest_action_date TEXT,
        policy_area TEXT,
        source_update_date TEXT,
        related_bills TEXT,
        text_versions TEXT,
        text_url TEXT,
        law_url TEXT,
        summary TEXT,
        enriched_at TEXT,
        enrichment_attempts INTEGER NOT NULL DEFAULT 0,
        last_enrichment_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS members (
        bioguide_id TEXT PRIMARY KEY,
        first_name TEXT,
        last_name TEXT,
        full_name TEXT,
        state TEXT,
        district INTEGER,
        party TEXT,
        chamber TEXT,
        photo_url TEXT,
        current_member INTEGER NOT NULL DEFAULT 1,
        birth_year TEXT,
        direct_order_name TEXT,
        inverted_order_name TEXT,
        honorific_name TEXT,
        biography TEXT,
        source_update_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS committees (
        committee_code TEXT PRIMARY KEY,
        name TEXT,
        chamber TEXT,
        committee_type TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bill_actions (
        bill_number TEXT NOT NULL,
        action_date TEXT NOT NULL DEFAULT '',
        action_text TEXT NOT NULL,
        action_type TEXT,
        PRIMARY KEY (bill_number, action_date, action_text)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bill_cosponsors (
        bill_number TEXT NOT NULL,
        cosponsor_id TEXT NOT NULL,
        cosponsor_name TEXT,
        cosponsor_party TEXT,
        cosponsor_state TEXT,
        PRIMARY KEY (bill_number, cosponsor_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bill_subjects (
        bill_number TEXT NOT NULL,
        subject_name TEXT NOT NULL,
        PRIMARY KEY (bill_number, subject_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bill_committees (
        bill_number TEXT NOT NULL,
        committee_code TEXT NOT NULL,
        name TEXT,
        chamber TEXT,
        PRIMARY KEY (bill_number, committee_code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS member_terms (
        bioguide_id TEXT NOT NULL,
        congress INTEGER NOT NULL DEFAULT 0,
        chamber TEXT NOT NULL DEFAULT '',
        party TEXT,
        state TEXT,
        district INTEGER,
        start_year INTEGER,
        end_year INTEGER,
        PRIMARY KEY (bioguide_id, congress, chamber)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type_id INTEGER NOT NULL REFERENCES tag_types(id),
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        parent_id INTEGER REFERENCES tags(id),
        description TEXT,
        UNIQUE (type_id, normalized_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bill_tags (
        bill_number TEXT NOT NULL,
        tag_id INTEGER NOT NULL,
        PRIMARY KEY (bill_number, tag_id)
    )
    "#,
];

/// Timestamp columns covered by the naive-value repair pass.
const TIMESTAMP_COLUMNS: &[(&str, &str)] = &[
    ("bills", "source_update_date"),
    ("bills", "enriched_at"),
    ("bills", "created_at"),
    ("bills", "updated_at"),
    ("members", "source_update_date"),
    ("members", "created_at"),
    ("members", "updated_at"),
    ("committees", "created_at"),
    ("committees", "updated_at"),
    ("sync_state", "last_sync_timestamp"),
];

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at the given sqlite URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // One connection: each endpoint run is a single sequential worker and
        // SQLite serializes writers anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.iter().copied() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Schema bootstrap plus repair of any previously persisted naive
    /// timestamps (rewritten in place as UTC).
    pub async fn migrate(&self) -> Result<u64, StoreError> {
        self.init_schema().await?;
        self.repair_naive_timestamps().await
    }

    pub async fn repair_naive_timestamps(&self) -> Result<u64, StoreError> {
        let mut repaired = 0u64;
        for (table, column) in TIMESTAMP_COLUMNS {
            let select =
                format!("SELECT rowid, {column} AS value FROM {table} WHERE {column} IS NOT NULL");
            let rows = sqlx::query(&select).fetch_all(&self.pool).await?;
            for row in rows {
                let rowid: i64 = row.get("rowid");
                let value: String = row.get("value");
                if DateTime::parse_from_rfc3339(&value).is_ok() {
                    continue;
                }
                let Some(naive) = parse_naive_timestamp(&value) else {
                    continue;
                };
                let utc = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
                let update = format!("UPDATE {table} SET {column} = ? WHERE rowid = ?");
                sqlx::query(&update)
                    .bind(utc.to_rfc3339())
                    .bind(rowid)
                    .execute(&self.pool)
                    .await?;
                repaired += 1;
            }
        }
        if repaired > 0 {
            warn!(repaired, "rewrote naive timestamps as UTC");
        }
        Ok(repaired)
    }

    // -- bills --------------------------------------------------------------

    pub async fn load_bill(&self, key: &BillKey) -> Result<Option<CanonicalBill>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT title, short_title, sponsor_id, introduced_date, status,
                   normalized_status, latest_action, latest_action_date,
                   policy_area, source_update_date
            FROM bills WHERE bill_number = ?
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CanonicalBill {
            key: key.clone(),
            title: row.get("title"),
            short_title: row.get("short_title"),
            sponsor_id: row.get("sponsor_id"),
            introduced_date: parse_date_opt(row.get("introduced_date")),
            status: row.get("status"),
            normalized_status: row
                .get::<Option<String>, _>("normalized_status")
                .as_deref()
                .and_then(BillStatus::from_label),
            latest_action: row.get("latest_action"),
            latest_action_date: parse_date_opt(row.get("latest_action_date")),
            policy_area: row.get("policy_area"),
            source_update_date: parse_timestamp_opt(row.get("source_update_date")),
        }))
    }

    /// Idempotent natural-key upsert with field-by-field change detection.
    /// A write is only issued when at least one field differs.
    pub async fn upsert_bill(&self, bill: &CanonicalBill) -> Result<UpsertOutcome, StoreError> {
        let key_str = bill.key.to_string();
        let now = Utc::now().to_rfc3339();

        match self.load_bill(&bill.key).await? {
            Some(current) if &current == bill => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE bills SET
                        title = ?, short_title = ?, sponsor_id = ?, introduced_date = ?,
                        status = ?, normalized_status = ?, latest_action = ?,
                        latest_action_date = ?, policy_area = ?, source_update_date = ?,
                        updated_at = ?
                    WHERE bill_number = ?
                    "#,
                )
                .bind(&bill.title)
                .bind(&bill.short_title)
                .bind(&bill.sponsor_id)
                .bind(bill.introduced_date.map(|d| d.to_string()))
                .bind(&bill.status)
                .bind(bill.normalized_status.map(|s| s.as_str()))
                .bind(&bill.latest_action)
                .bind(bill.latest_action_date.map(|d| d.to_string()))
                .bind(&bill.policy_area)
                .bind(bill.source_update_date.map(|t| t.to_rfc3339()))
                .bind(&now)
                .bind(&key_str)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                // The conflict clause is the concurrency backstop: a racing
                // insert on the same natural key degrades to an update.
                sqlx::query(
                    r#"
                    INSERT INTO bills (
                        bill_number, congress, bill_type, number, title, short_title,
                        sponsor_id, introduced_date, status, normalized_status,
                        latest_action, latest_action_date, policy_area,
                        source_update_date, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(bill_number) DO UPDATE SET
                        title = excluded.title,
                        short_title = excluded.short_title,
                        sponsor_id = excluded.sponsor_id,
                        introduced_date = excluded.introduced_date,
                        status = excluded.status,
                        normalized_status = excluded.normalized_status,
                        latest_action = excluded.latest_action,
                        latest_action_date = excluded.latest_action_date,
                        policy_area = excluded.policy_area,
                        source_update_date = excluded.source_update_date,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&key_str)
                .bind(i64::from(bill.key.congress))
                .bind(&bill.key.bill_type)
                .bind(&bill.key.number)
                .bind(&bill.title)
                .bind(&bill.short_title)
                .bind(&bill.sponsor_id)
                .bind(bill.introduced_date.map(|d| d.to_string()))
                .bind(&bill.status)
                .bind(bill.normalized_status.map(|s| s.as_str()))
                .bind(&bill.latest_action)
                .bind(bill.latest_action_date.map(|d| d.to_string()))
                .bind(&bill.policy_area)
                .bind(bill.source_update_date.map(|t| t.to_rfc3339()))
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    /// Overlay detail-endpoint columns onto an existing bill row.
    pub async fn apply_bill_detail(
        &self,
        key: &BillKey,
        detail: &BillDetail,
    ) -> Result<UpsertOutcome, StoreError> {
        let key_str = key.to_string();
        let row = sqlx::query(
            "SELECT related_bills, text_versions, text_url, law_url FROM bills WHERE bill_number = ?",
        )
        .bind(&key_str)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::MissingRow(key_str.clone()))?;

        let related_json = serde_json::to_string(&detail.related_bills)?;
        let versions_json = serde_json::to_string(&detail.text_versions)?;

        let unchanged = row.get::<Option<String>, _>("related_bills").as_deref()
            == Some(related_json.as_str())
            && row.get::<Option<String>, _>("text_versions").as_deref()
                == Some(versions_json.as_str())
            && row.get::<Option<String>, _>("text_url") == detail.text_url
            && row.get::<Option<String>, _>("law_url") == detail.law_url;
        if unchanged {
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE bills SET
                related_bills = ?, text_versions = ?, text_url = ?, law_url = ?,
                updated_at = ?
            WHERE bill_number = ?
            "#,
        )
        .bind(&related_json)
        .bind(&versions_json)
        .bind(&detail.text_url)
        .bind(&detail.law_url)
        .bind(Utc::now().to_rfc3339())
        .bind(&key_str)
        .execute(&self.pool)
        .await?;
        Ok(UpsertOutcome::Updated)
    }

    pub async fn list_bill_keys(&self) -> Result<Vec<BillKey>, StoreError> {
        let rows = sqlx::query("SELECT bill_number FROM bills ORDER BY bill_number")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| BillKey::parse(&row.get::<String, _>("bill_number")))
            .collect())
    }

    pub async fn count_bills(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM bills")
            .fetch_one(&self.pool)
            .await?)
    }

    // -- members ------------------------------------------------------------

    pub async fn load_member(
        &self,
        bioguide_id: &str,
    ) -> Result<Option<CanonicalMember>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT first_name, last_name, full_name, state, district, party,
                   chamber, photo_url, current_member, source_update_date
            FROM members WHERE bioguide_id = ?
            "#,
        )
        .bind(bioguide_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CanonicalMember {
            bioguide_id: bioguide_id.to_string(),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            full_name: row.get("full_name"),
            state: row.get("state"),
            district: row.get("district"),
            party: row.get("party"),
            chamber: row.get("chamber"),
            photo_url: row.get("photo_url"),
            current_member: row.get::<i64, _>("current_member") != 0,
            source_update_date: parse_timestamp_opt(row.get("source_update_date")),
            terms: Vec::new(),
        }))
    }

    pub async fn upsert_member(
        &self,
        member: &CanonicalMember,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now().to_rfc3339();
        // Terms live in their own relation; they are excluded from the
        // row-level comparison.
        let mut incoming = member.clone();
        incoming.terms = Vec::new();

        match self.load_member(&member.bioguide_id).await? {
            Some(current) if current == incoming => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE members SET
                        first_name = ?, last_name = ?, full_name = ?, state = ?,
                        district = ?, party = ?, chamber = ?, photo_url = ?,
                        current_member = ?, source_update_date = ?, updated_at = ?
                    WHERE bioguide_id = ?
                    "#,
                )
                .bind(&member.first_name)
                .bind(&member.last_name)
                .bind(&member.full_name)
                .bind(&member.state)
                .bind(member.district)
                .bind(&member.party)
                .bind(&member.chamber)
                .bind(&member.photo_url)
                .bind(member.current_member as i64)
                .bind(member.source_update_date.map(|t| t.to_rfc3339()))
                .bind(&now)
                .bind(&member.bioguide_id)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO members (
                        bioguide_id, first_name, last_name, full_name, state, district,
                        party, chamber, photo_url, current_member, source_update_date,
                        created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(bioguide_id) DO UPDATE SET
                        first_name = excluded.first_name,
                        last_name = excluded.last_name,
                        full_name = excluded.full_name,
                        state = excluded.state,
                        district = excluded.district,
                        party = excluded.party,
                        chamber = excluded.chamber,
                        photo_url = excluded.photo_url,
                        current_member = excluded.current_member,
                        source_update_date = excluded.source_update_date,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&member.bioguide_id)
                .bind(&member.first_name)
                .bind(&member.last_name)
                .bind(&member.full_name)
                .bind(&member.state)
                .bind(member.district)
                .bind(&member.party)
                .bind(&member.chamber)
                .bind(&member.photo_url)
                .bind(member.current_member as i64)
                .bind(member.source_update_date.map(|t| t.to_rfc3339()))
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    pub async fn apply_member_detail(
        &self,
        bioguide_id: &str,
        detail: &MemberDetail,
    ) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT birth_year, direct_order_name, inverted_order_name, honorific_name
            FROM members WHERE bioguide_id = ?
            "#,
        )
        .bind(bioguide_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::MissingRow(bioguide_id.to_string()))?;

        let unchanged = row.get::<Option<String>, _>("birth_year") == detail.birth_year
            && row.get::<Option<String>, _>("direct_order_name") == detail.direct_order_name
            && row.get::<Option<String>, _>("inverted_order_name") == detail.inverted_order_name
            && row.get::<Option<String>, _>("honorific_name") == detail.honorific_name;
        if unchanged {
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE members SET
                birth_year = ?, direct_order_name = ?, inverted_order_name = ?,
                honorific_name = ?, updated_at = ?
            WHERE bioguide_id = ?
            "#,
        )
        .bind(&detail.birth_year)
        .bind(&detail.direct_order_name)
        .bind(&detail.inverted_order_name)
        .bind(&detail.honorific_name)
        .bind(Utc::now().to_rfc3339())
        .bind(bioguide_id)
        .execute(&self.pool)
        .await?;
        Ok(UpsertOutcome::Updated)
    }

    pub async fn set_member_biography(
        &self,
        bioguide_id: &str,
        biography: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT biography FROM members WHERE bioguide_id = ?")
                .bind(bioguide_id)
                .fetch_optional(&self.pool)
                .await?;
        let current = current.ok_or_else(|| StoreError::MissingRow(bioguide_id.to_string()))?;
        if current.as_deref() == Some(biography) {
            return Ok(UpsertOutcome::Unchanged);
        }
        sqlx::query("UPDATE members SET biography = ?, updated_at = ? WHERE bioguide_id = ?")
            .bind(biography)
            .bind(Utc::now().to_rfc3339())
            .bind(bioguide_id)
            .execute(&self.pool)
            .await?;
        Ok(UpsertOutcome::Updated)
    }

    pub async fn list_member_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT bioguide_id FROM members ORDER BY bioguide_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("bioguide_id")).collect())
    }

    // -- committees ---------------------------------------------------------

    pub async fn upsert_committee(
        &self,
        committee: &CanonicalCommittee,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "SELECT name, chamber, committee_type FROM committees WHERE committee_code = ?",
        )
        .bind(&committee.committee_code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let unchanged = row.get::<Option<String>, _>("name") == committee.name
                && row.get::<Option<String>, _>("chamber") == committee.chamber
                && row.get::<Option<String>, _>("committee_type") == committee.committee_type;
            if unchanged {
                return Ok(UpsertOutcome::Unchanged);
            }
            sqlx::query(
                r#"
                UPDATE committees SET name = ?, chamber = ?, committee_type = ?, updated_at = ?
                WHERE committee_code = ?
                "#,
            )
            .bind(&committee.name)
            .bind(&committee.chamber)
            .bind(&committee.committee_type)
            .bind(&now)
            .bind(&committee.committee_code)
            .execute(&self.pool)
            .await?;
            return Ok(UpsertOutcome::Updated);
        }

        sqlx::query(
            r#"
            INSERT INTO committees (committee_code, name, chamber, committee_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(committee_code) DO UPDATE SET
                name = excluded.name,
                chamber = excluded.chamber,
                committee_type = excluded.committee_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&committee.committee_code)
        .bind(&committee.name)
        .bind(&committee.chamber)
        .bind(&committee.committee_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(UpsertOutcome::Inserted)
    }

    // -- relation sets ------------------------------------------------------

    /// Append-only action history; re-delivered rows are no-ops.
    pub async fn write_bill_actions(
        &self,
        key: &BillKey,
        actions: &[BillAction],
    ) -> Result<u64, StoreError> {
        let key_str = key.to_string();
        let mut tx = self.pool.begin().await?;
        if RelationKind::Actions.semantics() == RelationSemantics::ReplaceCurrent {
            sqlx::query("DELETE FROM bill_actions WHERE bill_number = ?")
                .bind(&key_str)
                .execute(&mut *tx)
                .await?;
        }
        let mut added = 0u64;
        for action in actions {
            let result = sqlx::query(
                r#"
                INSERT INTO bill_actions (bill_number, action_date, action_text, action_type)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(bill_number, action_date, action_text) DO NOTHING
                "#,
            )
            .bind(&key_str)
            .bind(action.action_date.map(|d| d.to_string()).unwrap_or_default())
            .bind(&action.text)
            .bind(&action.action_type)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    pub async fn write_bill_cosponsors(
        &self,
        key: &BillKey,
        cosponsors: &[BillCosponsor],
    ) -> Result<u64, StoreError> {
        let key_str = key.to_string();
        let mut tx = self.pool.begin().await?;
        if RelationKind::Cosponsors.semantics() == RelationSemantics::ReplaceCurrent {
            sqlx::query("DELETE FROM bill_cosponsors WHERE bill_number = ?")
                .bind(&key_str)
                .execute(&mut *tx)
                .await?;
        }
        let mut added = 0u64;
        for cosponsor in cosponsors {
            let result = sqlx::query(
                r#"
                INSERT INTO bill_cosponsors
                    (bill_number, cosponsor_id, cosponsor_name, cosponsor_party, cosponsor_state)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(bill_number, cosponsor_id) DO NOTHING
                "#,
            )
            .bind(&key_str)
            .bind(&cosponsor.bioguide_id)
            .bind(&cosponsor.full_name)
            .bind(&cosponsor.party)
            .bind(&cosponsor.state)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    pub async fn write_bill_subjects(
        &self,
        key: &BillKey,
        subjects: &[String],
    ) -> Result<u64, StoreError> {
        let key_str = key.to_string();
        let mut tx = self.pool.begin().await?;
        if RelationKind::Subjects.semantics() == RelationSemantics::ReplaceCurrent {
            sqlx::query("DELETE FROM bill_subjects WHERE bill_number = ?")
                .bind(&key_str)
                .execute(&mut *tx)
                .await?;
        }
        let mut added = 0u64;
        for subject in subjects {
            let result = sqlx::query(
                r#"
                INSERT INTO bill_subjects (bill_number, subject_name)
                VALUES (?, ?)
                ON CONFLICT(bill_number, subject_name) DO NOTHING
                "#,
            )
            .bind(&key_str)
            .bind(subject)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    /// Current-state relation: each write mirrors the source's present
    /// assignment set.
    pub async fn write_committee_assignments(
        &self,
        key: &BillKey,
        assignments: &[CommitteeAssignment],
    ) -> Result<u64, StoreError> {
        let key_str = key.to_string();
        let mut tx = self.pool.begin().await?;
        if RelationKind::CommitteeAssignments.semantics() == RelationSemantics::ReplaceCurrent {
            sqlx::query("DELETE FROM bill_committees WHERE bill_number = ?")
                .bind(&key_str)
                .execute(&mut *tx)
                .await?;
        }
        let mut added = 0u64;
        for assignment in assignments {
            let result = sqlx::query(
                r#"
                INSERT INTO bill_committees (bill_number, committee_code, name, chamber)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(bill_number, committee_code) DO NOTHING
                "#,
            )
            .bind(&key_str)
            .bind(&assignment.committee_code)
            .bind(&assignment.name)
            .bind(&assignment.chamber)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    pub async fn write_member_terms(
        &self,
        bioguide_id: &str,
        terms: &[MemberTerm],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        if RelationKind::MemberTerms.semantics() == RelationSemantics::ReplaceCurrent {
            sqlx::query("DELETE FROM member_terms WHERE bioguide_id = ?")
                .bind(bioguide_id)
                .execute(&mut *tx)
                .await?;
        }
        let mut added = 0u64;
        for term in terms {
            let result = sqlx::query(
                r#"
                INSERT INTO member_terms
                    (bioguide_id, congress, chamber, party, state, district, start_year, end_year)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(bioguide_id, congress, chamber) DO NOTHING
                "#,
            )
            .bind(bioguide_id)
            .bind(term.congress.unwrap_or(0))
            .bind(term.chamber.clone().unwrap_or_default())
            .bind(&term.party)
            .bind(&term.state)
            .bind(term.district)
            .bind(term.start_year)
            .bind(term.end_year)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    pub async fn count_relation_rows(
        &self,
        kind: RelationKind,
        parent_key: &str,
    ) -> Result<i64, StoreError> {
        let (table, column) = match kind {
            RelationKind::Actions => ("bill_actions", "bill_number"),
            RelationKind::Cosponsors => ("bill_cosponsors", "bill_number"),
            RelationKind::Subjects => ("bill_subjects", "bill_number"),
            RelationKind::CommitteeAssignments => ("bill_committees", "bill_number"),
            RelationKind::MemberTerms => ("member_terms", "bioguide_id"),
        };
        let query = format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?");
        Ok(sqlx::query_scalar(&query)
            .bind(parent_key)
            .fetch_one(&self.pool)
            .await?)
    }

    // -- tag taxonomy -------------------------------------------------------

    pub async fn ensure_tag_type(&self, name: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT INTO tag_types (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(
            sqlx::query_scalar("SELECT id FROM tag_types WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// Insert-or-get by `(type, normalized_name)`. Safe under concurrent
    /// callers: the losing insert falls through to the winner's row.
    pub async fn resolve_or_create_tag(
        &self,
        type_name: &str,
        raw_name: &str,
    ) -> Result<i64, StoreError> {
        let normalized = normalize_tag_name(raw_name);
        if normalized.is_empty() {
            return Err(StoreError::InvalidTagName(raw_name.to_string()));
        }
        let type_id = self.ensure_tag_type(type_name).await?;

        sqlx::query(
            r#"
            INSERT INTO tags (type_id, name, normalized_name, description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(type_id, normalized_name) DO NOTHING
            "#,
        )
        .bind(type_id)
        .bind(raw_name.trim())
        .bind(&normalized)
        .bind(format!("Bills related to {}", raw_name.trim()))
        .execute(&self.pool)
        .await?;

        Ok(sqlx::query_scalar(
            "SELECT id FROM tags WHERE type_id = ? AND normalized_name = ?",
        )
        .bind(type_id)
        .bind(&normalized)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Assign (or clear) a tag's parent, rejecting assignments that would
    /// close a cycle in the hierarchy.
    pub async fn set_tag_parent(
        &self,
        tag_id: i64,
        parent_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if let Some(parent) = parent_id {
            let mut seen = HashSet::new();
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == tag_id {
                    return Err(StoreError::TagCycle {
                        tag_id,
                        parent_id: parent,
                    });
                }
                if !seen.insert(current) {
                    break;
                }
                cursor = sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT parent_id FROM tags WHERE id = ?",
                )
                .bind(current)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
            }
        }
        let result = sqlx::query("UPDATE tags SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(format!("tag {tag_id}")));
        }
        Ok(())
    }

    pub async fn tags_for_type(&self, type_name: &str) -> Result<Vec<TagRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.name, t.normalized_name, t.parent_id
            FROM tags t
            JOIN tag_types tt ON t.type_id = tt.id
            WHERE tt.name = ?
            ORDER BY t.name
            "#,
        )
        .bind(type_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| TagRow {
                id: row.get("id"),
                name: row.get("name"),
                normalized_name: row.get("normalized_name"),
                parent_id: row.get("parent_id"),
            })
            .collect())
    }

    /// Returns true when the link was newly created.
    pub async fn link_bill_tag(&self, bill_number: &str, tag_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO bill_tags (bill_number, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(bill_number)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn tag_ids_for_bill(&self, bill_number: &str) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT tag_id FROM bill_tags WHERE bill_number = ? ORDER BY tag_id")
            .bind(bill_number)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("tag_id")).collect())
    }

    // -- sync state tracker -------------------------------------------------

    pub async fn sync_state(&self, endpoint: &str) -> Result<Option<SyncStateRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT endpoint, last_sync_timestamp, last_successful_offset, status, last_error
            FROM sync_state WHERE endpoint = ?
            "#,
        )
        .bind(endpoint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| SyncStateRow {
            endpoint: row.get("endpoint"),
            last_sync_timestamp: parse_timestamp_opt(row.get("last_sync_timestamp")),
            last_successful_offset: row.get("last_successful_offset"),
            status: row
                .get::<Option<String>, _>("status")
                .as_deref()
                .and_then(SyncStatus::from_str)
                .unwrap_or(SyncStatus::Idle),
            last_error: row.get("last_error"),
        }))
    }

    pub async fn get_cursor(&self, endpoint: &str) -> Result<SyncCursor, StoreError> {
        Ok(match self.sync_state(endpoint).await? {
            Some(state) => SyncCursor {
                timestamp: state.last_sync_timestamp,
                offset: state.last_successful_offset.unwrap_or(0),
            },
            None => SyncCursor::start(),
        })
    }

    /// Mark the endpoint running and hand back the cursor the run should
    /// start from. A row still marked running belongs to a crashed run, and
    /// an error row to a halted one; both resume from the stored offset —
    /// re-delivery of the last in-flight page is absorbed by the idempotent
    /// upserts downstream. Only a cleanly completed run restarts from zero.
    pub async fn begin_run(&self, endpoint: &str) -> Result<SyncCursor, StoreError> {
        match self.sync_state(endpoint).await? {
            Some(state) if state.status != SyncStatus::Idle => {
                let offset = state.last_successful_offset.unwrap_or(0);
                warn!(endpoint, offset, "previous run did not complete; resuming");
                sqlx::query(
                    "UPDATE sync_state SET status = 'running', last_error = NULL WHERE endpoint = ?",
                )
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
                Ok(SyncCursor {
                    timestamp: state.last_sync_timestamp,
                    offset,
                })
            }
            Some(state) => {
                sqlx::query(
                    r#"
                    UPDATE sync_state
                    SET status = 'running', last_successful_offset = 0, last_error = NULL
                    WHERE endpoint = ?
                    "#,
                )
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
                Ok(SyncCursor {
                    timestamp: state.last_sync_timestamp,
                    offset: 0,
                })
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO sync_state (endpoint, status, last_successful_offset)
                    VALUES (?, 'running', 0)
                    ON CONFLICT(endpoint) DO UPDATE SET
                        status = 'running', last_successful_offset = 0, last_error = NULL
                    "#,
                )
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
                Ok(SyncCursor::start())
            }
        }
    }

    /// Record durable progress after one page. Offsets never move backwards
    /// within a run.
    pub async fn advance(
        &self,
        endpoint: &str,
        new_offset: i64,
        new_timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_successful_offset = MAX(COALESCE(last_successful_offset, 0), ?),
                last_sync_timestamp = ?
            WHERE endpoint = ?
            "#,
        )
        .bind(new_offset)
        .bind(new_timestamp.to_rfc3339())
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_error(&self, endpoint: &str, error: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sync_state SET status = 'error', last_error = ? WHERE endpoint = ?")
            .bind(error)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_complete(
        &self,
        endpoint: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET status = 'idle', last_error = NULL, last_sync_timestamp = ?
            WHERE endpoint = ?
            "#,
        )
        .bind(completed_at.to_rfc3339())
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit full resync: forget all progress for the endpoint.
    pub async fn reset_endpoint(&self, endpoint: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (endpoint, last_sync_timestamp, last_successful_offset, status, last_error)
            VALUES (?, NULL, NULL, 'idle', NULL)
            ON CONFLICT(endpoint) DO UPDATE SET
                last_sync_timestamp = NULL,
                last_successful_offset = NULL,
                status = 'idle',
                last_error = NULL
            "#,
        )
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- enrichment bookkeeping ---------------------------------------------

    pub async fn bills_pending_enrichment(
        &self,
        limit: i64,
        max_attempts: i64,
    ) -> Result<Vec<PendingBill>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bill_number, title, text_url
            FROM bills
            WHERE enriched_at IS NULL AND enrichment_attempts < ?
            ORDER BY bill_number
            LIMIT ?
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingBill {
                bill_number: row.get("bill_number"),
                title: row.get("title"),
                text_url: row.get("text_url"),
            })
            .collect())
    }

    pub async fn record_enrichment_success(
        &self,
        bill_number: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE bills
            SET summary = ?, enriched_at = ?, last_enrichment_error = NULL, updated_at = ?
            WHERE bill_number = ?
            "#,
        )
        .bind(summary)
        .bind(&now)
        .bind(&now)
        .bind(bill_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_enrichment_failure(
        &self,
        bill_number: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE bills
            SET enrichment_attempts = enrichment_attempts + 1,
                last_enrichment_error = ?,
                updated_at = ?
            WHERE bill_number = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(bill_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn enrichment_attempts(&self, bill_number: &str) -> Result<i64, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT enrichment_attempts FROM bills WHERE bill_number = ?")
                .bind(bill_number)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn bill_summary(&self, bill_number: &str) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT summary FROM bills WHERE bill_number = ?")
                .bind(bill_number)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

fn parse_date_opt(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

fn parse_timestamp_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| {
        DateTime::parse_from_rfc3339(&v)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn parse_naive_timestamp(value: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    None
}
