//! Sync pipeline orchestration: endpoint runs with per-page cursor
//! advancement, configuration, and the AI enrichment orchestrator.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use legis_adapters::{
    normalize_bill, normalize_member, BillDetailAdapter, BillListAdapter, CongressClient,
    CongressClientConfig, FetchedPage, MemberBioAdapter, MemberDetailAdapter, MemberListAdapter,
    PageCursor, PagedSource, RawBillListItem, RawMemberListItem, SourceError, DEFAULT_BASE_URL,
    DEFAULT_BIOGUIDE_URL, DEFAULT_PAGE_SIZE,
};
use legis_core::{normalize_tag_name, EntityKind};
use legis_storage::{
    ArtifactStore, BackoffPolicy, FetchError, HttpClientConfig, PendingBill, Store, StoreError,
    TagRow, UpsertOutcome,
};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "legis-sync";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub artifacts_dir: PathBuf,
    pub api_base_url: String,
    pub api_key: String,
    pub bioguide_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub request_interval_ms: u64,
    pub page_size: u32,
    /// 0 means no cap.
    pub page_cap: u32,
    pub lookback_days: i64,
    pub raw_retention_days: i64,
    pub enrich_batch_size: i64,
    pub enrich_max_attempts: i64,
    pub enrich_confidence_threshold: f64,
    pub enrich_prompt_char_limit: usize,
    pub tag_match_threshold: f64,
    pub generator_api_url: String,
    pub generator_api_key: String,
    pub generator_model: String,
    pub generator_max_tokens: u32,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://legis.db".to_string()),
            artifacts_dir: std::env::var("LEGIS_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./artifacts")),
            api_base_url: std::env::var("CONGRESSGOV_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("CONGRESSGOV_API_KEY").unwrap_or_default(),
            bioguide_base_url: std::env::var("LEGIS_BIOGUIDE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BIOGUIDE_URL.to_string()),
            user_agent: std::env::var("LEGIS_USER_AGENT")
                .unwrap_or_else(|_| "legis-pipeline/0.1".to_string()),
            http_timeout_secs: env_parsed("LEGIS_HTTP_TIMEOUT_SECS", 30),
            request_interval_ms: env_parsed("LEGIS_REQUEST_INTERVAL_MS", 500),
            page_size: env_parsed("LEGIS_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            page_cap: env_parsed("LEGIS_PAGE_CAP", 0),
            lookback_days: env_parsed("LEGIS_LOOKBACK_DAYS", 7),
            raw_retention_days: env_parsed("LEGIS_RAW_RETENTION_DAYS", 30),
            enrich_batch_size: env_parsed("LEGIS_ENRICH_BATCH_SIZE", 10),
            enrich_max_attempts: env_parsed("LEGIS_ENRICH_MAX_ATTEMPTS", 3),
            enrich_confidence_threshold: env_parsed("LEGIS_ENRICH_CONFIDENCE_THRESHOLD", 0.6),
            enrich_prompt_char_limit: env_parsed("LEGIS_ENRICH_PROMPT_CHAR_LIMIT", 24_000),
            tag_match_threshold: env_parsed("LEGIS_TAG_MATCH_THRESHOLD", 0.92),
            generator_api_url: std::env::var("ANTHROPIC_API_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
            generator_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            generator_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string()),
            generator_max_tokens: env_parsed("LEGIS_GENERATOR_MAX_TOKENS", 2048),
            scheduler_enabled: std::env::var("LEGIS_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: std::env::var("SYNC_CRON_1").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            sync_cron_2: std::env::var("SYNC_CRON_2")
                .unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            workspace_root: PathBuf::from("."),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Per-endpoint enablement, read from `endpoints.yaml` at the workspace root.
/// Endpoints not listed default to enabled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointRegistry {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub endpoint_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EndpointRegistry {
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_yaml::from_str(&text) {
                Ok(registry) => registry,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "invalid endpoint registry; using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn is_enabled(&self, kind: EntityKind) -> bool {
        self.endpoints
            .iter()
            .find(|e| e.endpoint_id == kind.endpoint_id())
            .map(|e| e.enabled)
            .unwrap_or(true)
    }
}

/// Externally configured parent edges for the tag hierarchy, read from
/// `rules/tag_hierarchy.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagHierarchy {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub parents: Vec<TagParentRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagParentRule {
    #[serde(rename = "type")]
    pub tag_type: String,
    pub tag: String,
    pub parent: String,
}

impl TagHierarchy {
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_yaml::from_str(&text) {
                Ok(hierarchy) => hierarchy,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "invalid tag hierarchy; using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn parent_for(&self, type_name: &str, raw_tag: &str) -> Option<&str> {
        let normalized = normalize_tag_name(raw_tag);
        self.parents
            .iter()
            .find(|rule| rule.tag_type == type_name && normalize_tag_name(&rule.tag) == normalized)
            .map(|rule| rule.parent.as_str())
    }
}

/// Resolve a tag and apply any configured hierarchy parent.
pub async fn resolve_tag_with_hierarchy(
    store: &Store,
    hierarchy: &TagHierarchy,
    type_name: &str,
    raw_name: &str,
) -> Result<i64, StoreError> {
    let tag_id = store.resolve_or_create_tag(type_name, raw_name).await?;
    if let Some(parent_name) = hierarchy.parent_for(type_name, raw_name) {
        let parent_id = store.resolve_or_create_tag(type_name, parent_name).await?;
        if parent_id != tag_id {
            if let Err(err) = store.set_tag_parent(tag_id, Some(parent_id)).await {
                warn!(tag = raw_name, error = %err, "could not apply configured tag parent");
            }
        }
    }
    Ok(tag_id)
}

// ---------------------------------------------------------------------------
// Run summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EntityStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl EntityStats {
    fn absorb(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: u32,
    pub stats: EntityStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub tags_applied: u64,
    pub tags_below_threshold: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SyncPipeline {
    config: SyncConfig,
    store: Store,
    artifacts: ArtifactStore,
    registry: EndpointRegistry,
    hierarchy: TagHierarchy,
}

impl SyncPipeline {
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let store = Store::connect(&config.database_url)
            .await
            .with_context(|| format!("opening store at {}", config.database_url))?;
        store.init_schema().await.context("initializing schema")?;
        let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
        let registry = EndpointRegistry::load_or_default(&config.workspace_root.join("endpoints.yaml"));
        let hierarchy =
            TagHierarchy::load_or_default(&config.workspace_root.join("rules/tag_hierarchy.yaml"));
        Ok(Self {
            config,
            store,
            artifacts,
            registry,
            hierarchy,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn congress_client(&self) -> Result<CongressClient> {
        CongressClient::new(CongressClientConfig {
            base_url: self.config.api_base_url.clone(),
            api_key: self.config.api_key.clone(),
            page_size: self.config.page_size,
            user_agent: self.config.user_agent.clone(),
            timeout: Duration::from_secs(self.config.http_timeout_secs),
            min_interval: Duration::from_millis(self.config.request_interval_ms),
            backoff: BackoffPolicy::default(),
        })
    }

    /// Trigger surface: one operation per entity family.
    pub async fn run_sync(&self, kind: EntityKind) -> Result<SyncRunSummary> {
        match kind {
            EntityKind::Bills => {
                let adapter = BillListAdapter::new(self.congress_client()?);
                self.run_bill_pages(&adapter).await
            }
            EntityKind::Members => {
                let adapter = MemberListAdapter::new(self.congress_client()?);
                self.run_member_pages(&adapter).await
            }
            EntityKind::BillDetails => self.run_bill_details().await,
            EntityKind::MemberDetails => self.run_member_details().await,
            EntityKind::MemberBios => self.run_member_bios().await,
        }
    }

    /// Run every enabled endpoint, then enrichment. One endpoint failing
    /// leaves the others untouched.
    pub async fn run_all(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            if !self.registry.is_enabled(kind) {
                debug!(endpoint = kind.endpoint_id(), "endpoint disabled");
                continue;
            }
            if let Err(err) = self.run_sync(kind).await {
                warn!(endpoint = kind.endpoint_id(), error = %err, "endpoint run failed");
            }
        }
        if !self.config.generator_api_key.is_empty() {
            if let Err(err) = self.run_enrichment().await {
                warn!(error = %err, "enrichment run failed");
            }
        }
        if let Err(err) = self
            .artifacts
            .prune_older_than(Utc::now(), chrono::Duration::days(self.config.raw_retention_days))
            .await
        {
            warn!(error = %err, "artifact retention sweep failed");
        }
        Ok(())
    }

    async fn archive_page(
        &self,
        endpoint: &str,
        fetched_at: DateTime<Utc>,
        extension: &str,
        bytes: &[u8],
    ) -> Result<()> {
        self.artifacts
            .store_bytes(fetched_at, endpoint, extension, bytes)
            .await
            .with_context(|| format!("archiving raw payload for {endpoint}"))?;
        Ok(())
    }

    async fn run_bill_pages<S>(&self, source: &S) -> Result<SyncRunSummary>
    where
        S: PagedSource<Record = RawBillListItem>,
    {
        let endpoint = source.endpoint_id();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cursor = self.store.begin_run(endpoint).await?;
        let since = cursor
            .timestamp
            .map(|t| t - chrono::Duration::days(self.config.lookback_days));
        info!(endpoint, offset = cursor.offset, ?since, %run_id, "starting sync run");

        let mut offset = cursor.offset;
        let mut pages = 0u32;
        let mut stats = EntityStats::default();

        loop {
            let page = match source.fetch_page(&PageCursor { offset, since }).await {
                Ok(page) => page,
                Err(err) => {
                    self.store.mark_error(endpoint, &err.to_string()).await?;
                    return Err(err).context("fetching bill list page");
                }
            };
            pages += 1;
            self.archive_page(endpoint, page.fetched_at, "json", &page.raw_body)
                .await?;

            let page_len = page.records.len() as i64;
            for raw in &page.records {
                match normalize_bill(raw) {
                    Ok(bill) => match self.store.upsert_bill(&bill).await {
                        Ok(outcome) => {
                            stats.absorb(outcome);
                            if let Some(policy_area) = &bill.policy_area {
                                self.link_policy_area(&bill.key.to_string(), policy_area, &mut stats)
                                    .await;
                            }
                        }
                        Err(err) => {
                            // Constraint trouble on one record never sinks the run.
                            warn!(bill = %bill.key, error = %err, "skipping bill row");
                            stats.errors += 1;
                        }
                    },
                    Err(err) => {
                        debug!(error = %err, "skipping unmappable bill record");
                        stats.skipped += 1;
                    }
                }
            }

            offset += page_len;
            self.store.advance(endpoint, offset, started_at).await?;

            match page.next_offset {
                Some(next) if self.config.page_cap == 0 || pages < self.config.page_cap => {
                    offset = next;
                }
                Some(_) => {
                    info!(endpoint, pages, "page cap reached");
                    break;
                }
                None => break,
            }
        }

        self.store.mark_complete(endpoint, started_at).await?;
        let summary = SyncRunSummary {
            run_id,
            endpoint: endpoint.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages,
            stats,
        };
        info!(endpoint, ?stats, pages, "sync run complete");
        Ok(summary)
    }

    async fn link_policy_area(&self, bill_number: &str, policy_area: &str, stats: &mut EntityStats) {
        match resolve_tag_with_hierarchy(&self.store, &self.hierarchy, "Policy Area", policy_area)
            .await
        {
            Ok(tag_id) => {
                if let Err(err) = self.store.link_bill_tag(bill_number, tag_id).await {
                    warn!(bill = bill_number, error = %err, "could not link policy area tag");
                    stats.errors += 1;
                }
            }
            Err(err) => {
                warn!(bill = bill_number, policy_area, error = %err, "could not resolve policy area tag");
                stats.errors += 1;
            }
        }
    }

    async fn run_member_pages<S>(&self, source: &S) -> Result<SyncRunSummary>
    where
        S: PagedSource<Record = RawMemberListItem>,
    {
        let endpoint = source.endpoint_id();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let current_year = i64::from(started_at.year());
        let cursor = self.store.begin_run(endpoint).await?;
        let since = cursor
            .timestamp
            .map(|t| t - chrono::Duration::days(self.config.lookback_days));
        info!(endpoint, offset = cursor.offset, ?since, %run_id, "starting sync run");

        let mut offset = cursor.offset;
        let mut pages = 0u32;
        let mut stats = EntityStats::default();

        loop {
            let page: FetchedPage<RawMemberListItem> =
                match source.fetch_page(&PageCursor { offset, since }).await {
                    Ok(page) => page,
                    Err(err) => {
                        self.store.mark_error(endpoint, &err.to_string()).await?;
                        return Err(err).context("fetching member list page");
                    }
                };
            pages += 1;
            self.archive_page(endpoint, page.fetched_at, "json", &page.raw_body)
                .await?;

            let page_len = page.records.len() as i64;
            for raw in &page.records {
                match normalize_member(raw, current_year) {
                    Ok(member) => {
                        let write = async {
                            let outcome = self.store.upsert_member(&member).await?;
                            self.store
                                .write_member_terms(&member.bioguide_id, &member.terms)
                                .await?;
                            Ok::<_, StoreError>(outcome)
                        };
                        match write.await {
                            Ok(outcome) => stats.absorb(outcome),
                            Err(err) => {
                                warn!(member = %member.bioguide_id, error = %err, "skipping member row");
                                stats.errors += 1;
                            }
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "skipping unmappable member record");
                        stats.skipped += 1;
                    }
                }
            }

            offset += page_len;
            self.store.advance(endpoint, offset, started_at).await?;

            match page.next_offset {
                Some(next) if self.config.page_cap == 0 || pages < self.config.page_cap => {
                    offset = next;
                }
                Some(_) => {
                    info!(endpoint, pages, "page cap reached");
                    break;
                }
                None => break,
            }
        }

        self.store.mark_complete(endpoint, started_at).await?;
        Ok(SyncRunSummary {
            run_id,
            endpoint: endpoint.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages,
            stats,
        })
    }

    /// Key-driven detail run: iterates the stored bill listing in stable
    /// order, advancing the cursor once per processed bill.
    async fn run_bill_details(&self) -> Result<SyncRunSummary> {
        let adapter = BillDetailAdapter::new(self.congress_client()?);
        let endpoint = adapter.endpoint_id();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cursor = self.store.begin_run(endpoint).await?;
        let keys = self.store.list_bill_keys().await?;
        info!(endpoint, offset = cursor.offset, total = keys.len(), %run_id, "starting detail run");

        let mut stats = EntityStats::default();
        let mut index = usize::try_from(cursor.offset.max(0)).unwrap_or(0);

        while index < keys.len() {
            let key = &keys[index];
            match adapter.fetch_detail(key).await {
                Ok(fetched) => {
                    self.archive_page(endpoint, fetched.fetched_at, "json", &fetched.raw_detail)
                        .await?;
                    let bundle = fetched.bundle;
                    match self.store.apply_bill_detail(key, &bundle.detail).await {
                        Ok(outcome) => {
                            stats.absorb(outcome);
                            self.store
                                .write_bill_cosponsors(key, &bundle.cosponsors)
                                .await?;
                            self.store.write_bill_subjects(key, &bundle.subjects).await?;
                            self.store
                                .write_bill_actions(key, &bundle.actions)
                                .await?;
                            self.store
                                .write_committee_assignments(key, &bundle.assignments)
                                .await?;
                            for committee in &bundle.committees {
                                self.store.upsert_committee(committee).await?;
                            }
                        }
                        Err(StoreError::MissingRow(row)) => {
                            warn!(bill = %row, "detail fetched for unknown bill; skipping");
                            stats.skipped += 1;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(SourceError::NotFound(_)) => {
                    warn!(bill = %key, "bill not found upstream; skipping");
                    stats.skipped += 1;
                }
                Err(err) => {
                    self.store.mark_error(endpoint, &err.to_string()).await?;
                    return Err(err).with_context(|| format!("fetching detail for {key}"));
                }
            }
            index += 1;
            self.store.advance(endpoint, index as i64, started_at).await?;
        }

        self.store.mark_complete(endpoint, started_at).await?;
        Ok(SyncRunSummary {
            run_id,
            endpoint: endpoint.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages: 0,
            stats,
        })
    }

    async fn run_member_details(&self) -> Result<SyncRunSummary> {
        let adapter = MemberDetailAdapter::new(self.congress_client()?);
        let endpoint = adapter.endpoint_id();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cursor = self.store.begin_run(endpoint).await?;
        let ids = self.store.list_member_ids().await?;

        let mut stats = EntityStats::default();
        let mut index = usize::try_from(cursor.offset.max(0)).unwrap_or(0);

        while index < ids.len() {
            let bioguide_id = &ids[index];
            match adapter.fetch_detail(bioguide_id).await {
                Ok(fetched) => {
                    self.archive_page(endpoint, fetched.fetched_at, "json", &fetched.raw_body)
                        .await?;
                    match self.store.apply_member_detail(bioguide_id, &fetched.detail).await {
                        Ok(outcome) => stats.absorb(outcome),
                        Err(StoreError::MissingRow(_)) => stats.skipped += 1,
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(SourceError::NotFound(_)) => {
                    warn!(member = %bioguide_id, "member not found upstream; skipping");
                    stats.skipped += 1;
                }
                Err(err) => {
                    self.store.mark_error(endpoint, &err.to_string()).await?;
                    return Err(err).with_context(|| format!("fetching detail for {bioguide_id}"));
                }
            }
            index += 1;
            self.store.advance(endpoint, index as i64, started_at).await?;
        }

        self.store.mark_complete(endpoint, started_at).await?;
        Ok(SyncRunSummary {
            run_id,
            endpoint: endpoint.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages: 0,
            stats,
        })
    }

    async fn run_member_bios(&self) -> Result<SyncRunSummary> {
        let adapter = MemberBioAdapter::new(
            self.config.bioguide_base_url.clone(),
            HttpClientConfig {
                timeout: Duration::from_secs(self.config.http_timeout_secs),
                user_agent: Some(self.config.user_agent.clone()),
                backoff: BackoffPolicy::default(),
                token_bucket: None,
                min_interval: Some(Duration::from_millis(self.config.request_interval_ms)),
            },
        )?;
        let endpoint = adapter.endpoint_id();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cursor = self.store.begin_run(endpoint).await?;
        let ids = self.store.list_member_ids().await?;

        let mut stats = EntityStats::default();
        let mut index = usize::try_from(cursor.offset.max(0)).unwrap_or(0);

        while index < ids.len() {
            let bioguide_id = &ids[index];
            match adapter.fetch_bio(bioguide_id).await {
                Ok(fetched) => {
                    self.archive_page(endpoint, fetched.fetched_at, "html", &fetched.raw_body)
                        .await?;
                    match fetched.biography {
                        Some(biography) => {
                            match self.store.set_member_biography(bioguide_id, &biography).await {
                                Ok(outcome) => stats.absorb(outcome),
                                Err(StoreError::MissingRow(_)) => stats.skipped += 1,
                                Err(err) => return Err(err.into()),
                            }
                        }
                        None => {
                            debug!(member = %bioguide_id, "no biography text found");
                            stats.skipped += 1;
                        }
                    }
                }
                Err(SourceError::NotFound(_)) => {
                    stats.skipped += 1;
                }
                Err(err) => {
                    self.store.mark_error(endpoint, &err.to_string()).await?;
                    return Err(err).with_context(|| format!("fetching bio for {bioguide_id}"));
                }
            }
            index += 1;
            self.store.advance(endpoint, index as i64, started_at).await?;
        }

        self.store.mark_complete(endpoint, started_at).await?;
        Ok(SyncRunSummary {
            run_id,
            endpoint: endpoint.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages: 0,
            stats,
        })
    }

    pub async fn run_enrichment(&self) -> Result<EnrichmentRunSummary> {
        anyhow::ensure!(
            !self.config.generator_api_key.is_empty(),
            "generator api key is not configured"
        );
        let generator = ClaudeGenerator::new(&self.config)?;
        let text_adapter = BillDetailAdapter::new(self.congress_client()?);
        let orchestrator = EnrichmentOrchestrator::new(
            self.store.clone(),
            self.hierarchy.clone(),
            Box::new(generator),
            Some(text_adapter),
            EnrichmentOptions::from_config(&self.config),
        );
        orchestrator.run_batch().await
    }
}

/// Cron host for installations without an external scheduler. The production
/// trigger remains external; this is opt-in via configuration.
pub async fn maybe_build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config().scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [
        pipeline.config().sync_cron_1.clone(),
        pipeline.config().sync_cron_2.clone(),
    ] {
        let pipeline = pipeline.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                if let Err(err) = pipeline.run_all().await {
                    warn!(error = %err, "scheduled sweep failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

// ---------------------------------------------------------------------------
// AI enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("generation timed out: {0}")]
    Timeout(String),
    #[error("generation rejected: {0}")]
    Rejected(String),
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),
}

/// The external text-generation capability: one opaque call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, EnrichError>;
}

/// Anthropic messages API behind the `TextGenerator` contract.
pub struct ClaudeGenerator {
    fetcher: legis_storage::HttpFetcher,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeGenerator {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let fetcher = legis_storage::HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs.max(60)),
            user_agent: Some(config.user_agent.clone()),
            backoff: BackoffPolicy::default(),
            token_bucket: None,
            min_interval: Some(Duration::from_millis(config.request_interval_ms)),
        })?;
        Ok(Self {
            fetcher,
            api_url: config.generator_api_url.clone(),
            api_key: config.generator_api_key.clone(),
            model: config.generator_model.clone(),
            max_tokens: config.generator_max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, EnrichError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", "2023-06-01".to_string()),
        ];
        let response = self
            .fetcher
            .post_json("enrichment", &self.api_url, &headers, &body)
            .await
            .map_err(|err| match &err {
                FetchError::Request(inner) if inner.is_timeout() => {
                    EnrichError::Timeout(err.to_string())
                }
                _ => EnrichError::Rejected(err.to_string()),
            })?;
        let parsed: MessagesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| EnrichError::MalformedResponse(e.to_string()))?;
        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| EnrichError::MalformedResponse("no text content in response".to_string()))
    }
}

/// Canned generator for exercising the orchestrator without the external
/// capability.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, EnrichError>>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, EnrichError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, EnrichError> {
        self.responses
            .lock()
            .expect("scripted generator lock")
            .pop_front()
            .unwrap_or_else(|| Err(EnrichError::MalformedResponse("script exhausted".to_string())))
    }
}

/// Expected generation payload: a summary plus typed, confidence-scored tag
/// candidates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichmentOutput {
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<EnrichmentTag>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichmentTag {
    #[serde(rename = "type", default)]
    pub tag_type: Option<String>,
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

const ENRICHMENT_TAG_TYPES: &[(&str, &str)] = &[
    ("policy_area", "Policy Area"),
    ("policy_areas", "Policy Area"),
    ("affected_group", "Affected Group"),
    ("affected_groups", "Affected Group"),
    ("key_topic", "Key Topic"),
    ("key_topics", "Key Topic"),
];

pub fn canonical_tag_type(raw: Option<&str>) -> Option<&'static str> {
    let raw = raw?.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    ENRICHMENT_TAG_TYPES
        .iter()
        .find(|(key, _)| *key == raw)
        .map(|(_, name)| *name)
}

/// Pull the JSON object out of a generation, tolerating fenced code blocks
/// and prose around it.
pub fn parse_enrichment_output(raw: &str) -> Result<EnrichmentOutput, EnrichError> {
    let trimmed = raw.trim();
    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(EnrichError::MalformedResponse(
            "no JSON object in generation".to_string(),
        ));
    };
    let output: EnrichmentOutput = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| EnrichError::MalformedResponse(e.to_string()))?;
    if output.summary.trim().is_empty() {
        return Err(EnrichError::MalformedResponse("empty summary".to_string()));
    }
    Ok(output)
}

pub fn build_enrichment_prompt(
    title: Option<&str>,
    bill_text: Option<&str>,
    char_limit: usize,
) -> String {
    let mut prompt = String::from(
        "You summarize and categorize United States legislative bills. \
         Respond with a single JSON object of the form \
         {\"summary\": \"...\", \"tags\": [{\"type\": \"policy_area\"|\"affected_group\"|\"key_topic\", \
         \"name\": \"...\", \"confidence\": 0.0}]}.\n\n",
    );
    prompt.push_str("Title: ");
    prompt.push_str(title.unwrap_or("(untitled)"));
    prompt.push('\n');
    if let Some(text) = bill_text {
        prompt.push_str("Bill text:\n");
        prompt.extend(text.chars().take(char_limit));
        prompt.push('\n');
    }
    prompt
}

/// Match a candidate onto an existing tag of the same type: exact normalized
/// lookup first, then the closest Jaro-Winkler neighbor above the threshold.
pub fn match_existing_tag(existing: &[TagRow], candidate: &str, threshold: f64) -> Option<i64> {
    let normalized = normalize_tag_name(candidate);
    if let Some(row) = existing.iter().find(|r| r.normalized_name == normalized) {
        return Some(row.id);
    }
    existing
        .iter()
        .map(|row| (jaro_winkler(&row.normalized_name, &normalized), row))
        .filter(|(score, _)| *score >= threshold)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
        .map(|(_, row)| row.id)
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentOptions {
    pub batch_size: i64,
    pub max_attempts: i64,
    pub confidence_threshold: f64,
    pub prompt_char_limit: usize,
    pub tag_match_threshold: f64,
}

impl EnrichmentOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.enrich_batch_size,
            max_attempts: config.enrich_max_attempts,
            confidence_threshold: config.enrich_confidence_threshold,
            prompt_char_limit: config.enrich_prompt_char_limit,
            tag_match_threshold: config.tag_match_threshold,
        }
    }
}

pub struct EnrichmentOrchestrator {
    store: Store,
    hierarchy: TagHierarchy,
    generator: Box<dyn TextGenerator>,
    text_adapter: Option<BillDetailAdapter>,
    options: EnrichmentOptions,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Store,
        hierarchy: TagHierarchy,
        generator: Box<dyn TextGenerator>,
        text_adapter: Option<BillDetailAdapter>,
        options: EnrichmentOptions,
    ) -> Self {
        Self {
            store,
            hierarchy,
            generator,
            text_adapter,
            options,
        }
    }

    /// Enrich one batch of pending bills. A single bill's failure is recorded
    /// against its attempt budget and never aborts the batch.
    pub async fn run_batch(&self) -> Result<EnrichmentRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let pending = self
            .store
            .bills_pending_enrichment(self.options.batch_size, self.options.max_attempts)
            .await?;
        info!(batch = pending.len(), %run_id, "starting enrichment batch");

        let mut summary = EnrichmentRunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            processed: 0,
            succeeded: 0,
            failed: 0,
            tags_applied: 0,
            tags_below_threshold: 0,
        };

        for bill in pending {
            summary.processed += 1;
            match self.generate_for(&bill).await {
                Ok(output) => {
                    let (applied, below) = self.apply_output(&bill, &output).await?;
                    self.store
                        .record_enrichment_success(&bill.bill_number, &output.summary)
                        .await?;
                    summary.succeeded += 1;
                    summary.tags_applied += applied;
                    summary.tags_below_threshold += below;
                }
                Err(err) => {
                    warn!(bill = %bill.bill_number, error = %err, "enrichment failed; will retry later");
                    self.store
                        .record_enrichment_failure(&bill.bill_number, &err.to_string())
                        .await?;
                    summary.failed += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            tags = summary.tags_applied,
            "enrichment batch complete"
        );
        Ok(summary)
    }

    async fn generate_for(&self, bill: &PendingBill) -> Result<EnrichmentOutput, EnrichError> {
        let bill_text = match (&self.text_adapter, &bill.text_url) {
            (Some(adapter), Some(url)) => match adapter.fetch_bill_text(url).await {
                Ok(text) if !text.is_empty() => Some(text),
                Ok(_) => None,
                Err(err) => {
                    // Title-only enrichment beats failing the bill outright.
                    warn!(bill = %bill.bill_number, error = %err, "bill text unavailable");
                    None
                }
            },
            _ => None,
        };
        let prompt = build_enrichment_prompt(
            bill.title.as_deref(),
            bill_text.as_deref(),
            self.options.prompt_char_limit,
        );
        let raw = self.generator.generate(&prompt).await?;
        parse_enrichment_output(&raw)
    }

    async fn apply_output(
        &self,
        bill: &PendingBill,
        output: &EnrichmentOutput,
    ) -> Result<(u64, u64)> {
        let mut applied = 0u64;
        let mut below = 0u64;
        for candidate in &output.tags {
            let Some(type_name) = canonical_tag_type(candidate.tag_type.as_deref()) else {
                debug!(
                    bill = %bill.bill_number,
                    tag = %candidate.name,
                    "candidate has no recognized tag type"
                );
                continue;
            };
            if candidate.confidence < self.options.confidence_threshold {
                debug!(
                    bill = %bill.bill_number,
                    tag = %candidate.name,
                    confidence = candidate.confidence,
                    "below confidence threshold; not persisted"
                );
                below += 1;
                continue;
            }
            let existing = self.store.tags_for_type(type_name).await?;
            let tag_id = match match_existing_tag(
                &existing,
                &candidate.name,
                self.options.tag_match_threshold,
            ) {
                Some(id) => id,
                None => {
                    resolve_tag_with_hierarchy(
                        &self.store,
                        &self.hierarchy,
                        type_name,
                        &candidate.name,
                    )
                    .await?
                }
            };
            if self.store.link_bill_tag(&bill.bill_number, tag_id).await? {
                applied += 1;
            }
        }
        Ok((applied, below))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use legis_core::{BillKey, BillStatus, CanonicalBill};
    use tempfile::tempdir;

    fn test_config(workspace: &Path) -> SyncConfig {
        SyncConfig {
            database_url: "sqlite::memory:".to_string(),
            artifacts_dir: workspace.join("artifacts"),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            bioguide_base_url: DEFAULT_BIOGUIDE_URL.to_string(),
            user_agent: "legis-test/0.1".to_string(),
            http_timeout_secs: 5,
            request_interval_ms: 0,
            page_size: 20,
            page_cap: 0,
            lookback_days: 7,
            raw_retention_days: 30,
            enrich_batch_size: 10,
            enrich_max_attempts: 3,
            enrich_confidence_threshold: 0.6,
            enrich_prompt_char_limit: 2_000,
            tag_match_threshold: 0.92,
            generator_api_url: String::new(),
            generator_api_key: String::new(),
            generator_model: String::new(),
            generator_max_tokens: 512,
            scheduler_enabled: false,
            sync_cron_1: "0 0 6 * * *".to_string(),
            sync_cron_2: "0 0 18 * * *".to_string(),
            workspace_root: workspace.to_path_buf(),
        }
    }

    async fn test_pipeline() -> (SyncPipeline, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let pipeline = SyncPipeline::new(test_config(dir.path()))
            .await
            .expect("pipeline");
        (pipeline, dir)
    }

    fn bill_item(index: usize) -> RawBillListItem {
        let mut item = RawBillListItem::default();
        item.congress = Some(118);
        item.bill_type = Some("hr".to_string());
        item.number = Some(format!("{}", index + 1));
        item.title = Some(format!("Test Bill {}", index + 1));
        item.latest_action = Some(legis_adapters::RawLatestAction {
            action_date: Some("2024-01-15".to_string()),
            text: Some("Introduced in the House.".to_string()),
        });
        item.update_date = Some("2024-01-16T00:00:00Z".to_string());
        item
    }

    /// In-memory paged source: 20-record pages, optional one-shot failure at
    /// a given offset.
    struct StubBillSource {
        pages: Vec<Vec<RawBillListItem>>,
        fail_at_offset: Mutex<Option<i64>>,
        endless: bool,
    }

    impl StubBillSource {
        fn with_bills(total: usize) -> Self {
            let pages = (0..total)
                .map(bill_item)
                .collect::<Vec<_>>()
                .chunks(20)
                .map(|c| c.to_vec())
                .collect();
            Self {
                pages,
                fail_at_offset: Mutex::new(None),
                endless: false,
            }
        }

        fn failing_at(mut self, offset: i64) -> Self {
            self.fail_at_offset = Mutex::new(Some(offset));
            self
        }
    }

    #[async_trait]
    impl PagedSource for StubBillSource {
        type Record = RawBillListItem;

        fn endpoint_id(&self) -> &'static str {
            "bill-list"
        }

        async fn fetch_page(
            &self,
            cursor: &PageCursor,
        ) -> Result<FetchedPage<RawBillListItem>, SourceError> {
            {
                let mut fail = self.fail_at_offset.lock().expect("stub lock");
                if *fail == Some(cursor.offset) {
                    *fail = None;
                    return Err(SourceError::Transient("connection reset by peer".to_string()));
                }
            }
            let index = (cursor.offset / 20) as usize;
            let records = self.pages.get(index).cloned().unwrap_or_default();
            let has_more = self.endless || index + 1 < self.pages.len();
            let next_offset = if has_more && !records.is_empty() {
                Some(cursor.offset + records.len() as i64)
            } else {
                None
            };
            Ok(FetchedPage {
                records,
                next_offset,
                raw_body: b"{\"bills\":[]}".to_vec(),
                fetched_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn interrupted_run_resumes_and_matches_an_unbroken_run() {
        let (pipeline, _dir) = test_pipeline().await;
        let source = StubBillSource::with_bills(100).failing_at(40);

        // First run dies mid-way: two pages (40 bills) are durable.
        let err = pipeline.run_bill_pages(&source).await;
        assert!(err.is_err());
        assert_eq!(pipeline.store().count_bills().await.unwrap(), 40);
        let state = pipeline.store().sync_state("bill-list").await.unwrap().unwrap();
        assert_eq!(state.last_successful_offset, Some(40));

        // Second run picks up at offset 40, not zero, and finishes the rest.
        let summary = pipeline.run_bill_pages(&source).await.expect("resumed run");
        assert_eq!(summary.stats.inserted, 60);
        assert_eq!(pipeline.store().count_bills().await.unwrap(), 100);
        let state = pipeline.store().sync_state("bill-list").await.unwrap().unwrap();
        assert_eq!(state.last_successful_offset, Some(100));

        // Same end state as a run that never failed.
        let (unbroken, _dir2) = test_pipeline().await;
        let clean = StubBillSource::with_bills(100);
        unbroken.run_bill_pages(&clean).await.expect("unbroken run");
        assert_eq!(
            unbroken.store().count_bills().await.unwrap(),
            pipeline.store().count_bills().await.unwrap()
        );
    }

    #[tokio::test]
    async fn rerunning_the_same_pages_is_idempotent() {
        let (pipeline, _dir) = test_pipeline().await;
        let source = StubBillSource::with_bills(40);

        let first = pipeline.run_bill_pages(&source).await.expect("first run");
        assert_eq!(first.stats.inserted, 40);

        let second = pipeline.run_bill_pages(&source).await.expect("second run");
        assert_eq!(second.stats.inserted, 0);
        assert_eq!(second.stats.unchanged, 40);
        assert_eq!(pipeline.store().count_bills().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn page_cap_bounds_a_run_without_erroring() {
        let (mut pipeline, _dir) = test_pipeline().await;
        pipeline.config.page_cap = 2;
        let mut source = StubBillSource::with_bills(100);
        source.endless = true;

        let summary = pipeline.run_bill_pages(&source).await.expect("capped run");
        assert_eq!(summary.pages, 2);
        assert_eq!(pipeline.store().count_bills().await.unwrap(), 40);
        let state = pipeline.store().sync_state("bill-list").await.unwrap().unwrap();
        assert_eq!(state.status, legis_core::SyncStatus::Idle);
    }

    #[tokio::test]
    async fn policy_areas_become_tags_during_list_sync() {
        let (pipeline, _dir) = test_pipeline().await;
        let mut item = bill_item(0);
        item.policy_area = Some(legis_adapters::RawNamed {
            name: Some("Health".to_string()),
        });
        let source = StubBillSource {
            pages: vec![vec![item]],
            fail_at_offset: Mutex::new(None),
            endless: false,
        };

        pipeline.run_bill_pages(&source).await.expect("run");
        let tags = pipeline.store().tags_for_type("Policy Area").await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].normalized_name, "health");
        assert_eq!(
            pipeline.store().tag_ids_for_bill("hr1-118").await.unwrap(),
            vec![tags[0].id]
        );
    }

    fn seed_bill(key: BillKey, title: &str) -> CanonicalBill {
        CanonicalBill {
            key,
            title: Some(title.to_string()),
            short_title: None,
            sponsor_id: None,
            introduced_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            status: Some("Introduced in the House.".to_string()),
            normalized_status: Some(BillStatus::Introduced),
            latest_action: Some("Introduced in the House.".to_string()),
            latest_action_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            policy_area: None,
            source_update_date: None,
        }
    }

    async fn seeded_store(count: usize) -> Store {
        let store = Store::open_in_memory().await.expect("store");
        store.init_schema().await.expect("schema");
        for i in 0..count {
            let bill = seed_bill(
                BillKey::new(118, "hr", format!("{}", i + 1)),
                &format!("Test Bill {}", i + 1),
            );
            store.upsert_bill(&bill).await.expect("seed bill");
        }
        store
    }

    fn ok_response(summary: &str, tags: &[(&str, &str, f64)]) -> Result<String, EnrichError> {
        let tags: Vec<serde_json::Value> = tags
            .iter()
            .map(|(ty, name, confidence)| {
                serde_json::json!({"type": ty, "name": name, "confidence": confidence})
            })
            .collect();
        Ok(serde_json::json!({"summary": summary, "tags": tags}).to_string())
    }

    fn orchestrator_with(store: &Store, generator: ScriptedGenerator) -> EnrichmentOrchestrator {
        EnrichmentOrchestrator::new(
            store.clone(),
            TagHierarchy::default(),
            Box::new(generator),
            None,
            EnrichmentOptions {
                batch_size: 10,
                max_attempts: 3,
                confidence_threshold: 0.6,
                prompt_char_limit: 2_000,
                tag_match_threshold: 0.92,
            },
        )
    }

    #[tokio::test]
    async fn one_failing_bill_does_not_abort_the_batch() {
        let store = seeded_store(10).await;

        // Pending order is by bill number: hr1, hr10, hr2, ... hr9. The
        // fifth response (hr4) times out.
        let mut responses = Vec::new();
        for i in 0..10 {
            if i == 4 {
                responses.push(Err(EnrichError::Timeout("deadline exceeded".to_string())));
            } else {
                responses.push(ok_response(
                    &format!("Summary {i}"),
                    &[("policy_area", "Health", 0.9)],
                ));
            }
        }
        let orchestrator = orchestrator_with(&store, ScriptedGenerator::new(responses));
        let summary = orchestrator.run_batch().await.expect("batch");

        assert_eq!(summary.processed, 10);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);

        // The failed bill kept its fields, burned one attempt, and stays
        // eligible for a later run.
        assert_eq!(store.enrichment_attempts("hr4-118").await.unwrap(), 1);
        assert_eq!(store.bill_summary("hr4-118").await.unwrap(), None);
        let pending = store.bills_pending_enrichment(10, 3).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].bill_number, "hr4-118");
        assert_eq!(pending[0].title.as_deref(), Some("Test Bill 4"));

        assert_eq!(
            store.bill_summary("hr1-118").await.unwrap().as_deref(),
            Some("Summary 0")
        );
    }

    #[tokio::test]
    async fn tag_candidates_are_confidence_gated() {
        let store = seeded_store(1).await;
        let orchestrator = orchestrator_with(
            &store,
            ScriptedGenerator::new(vec![ok_response(
                "A health bill.",
                &[
                    ("policy_area", "Health", 0.95),
                    ("key_topic", "Funding", 0.2),
                ],
            )]),
        );

        let summary = orchestrator.run_batch().await.expect("batch");
        assert_eq!(summary.tags_applied, 1);
        assert_eq!(summary.tags_below_threshold, 1);

        assert_eq!(store.tag_ids_for_bill("hr1-118").await.unwrap().len(), 1);
        // The low-confidence candidate never reached the taxonomy either.
        assert!(store.tags_for_type("Key Topic").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn near_miss_candidates_reuse_existing_tags() {
        let store = seeded_store(1).await;
        let existing = store
            .resolve_or_create_tag("Policy Area", "Health Care")
            .await
            .unwrap();

        let orchestrator = orchestrator_with(
            &store,
            ScriptedGenerator::new(vec![ok_response(
                "A healthcare bill.",
                &[("policy_area", "Healthcare", 0.9)],
            )]),
        );
        orchestrator.run_batch().await.expect("batch");

        let tags = store.tags_for_type("Policy Area").await.unwrap();
        assert_eq!(tags.len(), 1, "no duplicate tag for a near-identical name");
        assert_eq!(
            store.tag_ids_for_bill("hr1-118").await.unwrap(),
            vec![existing]
        );
    }

    #[tokio::test]
    async fn malformed_generations_count_against_the_attempt_budget() {
        let store = seeded_store(1).await;
        let orchestrator = orchestrator_with(
            &store,
            ScriptedGenerator::new(vec![Ok("I could not process this bill.".to_string())]),
        );
        let summary = orchestrator.run_batch().await.expect("batch");
        assert_eq!(summary.failed, 1);
        assert_eq!(store.enrichment_attempts("hr1-118").await.unwrap(), 1);
    }

    #[test]
    fn enrichment_output_parses_with_and_without_fences() {
        let plain = r#"{"summary": "S", "tags": [{"type": "policy_area", "name": "Health", "confidence": 0.8}]}"#;
        let parsed = parse_enrichment_output(plain).expect("plain");
        assert_eq!(parsed.summary, "S");
        assert_eq!(parsed.tags.len(), 1);

        let fenced = "```json\n{\"summary\": \"S\", \"tags\": []}\n```";
        assert_eq!(parse_enrichment_output(fenced).expect("fenced").summary, "S");

        assert!(matches!(
            parse_enrichment_output("no json here"),
            Err(EnrichError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_enrichment_output(r#"{"summary": "  ", "tags": []}"#),
            Err(EnrichError::MalformedResponse(_))
        ));
    }

    #[test]
    fn prompts_truncate_bill_text_to_the_limit() {
        let text = "x".repeat(5_000);
        let prompt = build_enrichment_prompt(Some("Title"), Some(&text), 1_000);
        assert!(prompt.contains("Title"));
        assert!(prompt.len() < 2_000);

        let no_text = build_enrichment_prompt(None, None, 1_000);
        assert!(no_text.contains("(untitled)"));
    }

    #[test]
    fn tag_type_labels_map_to_taxonomy_types() {
        assert_eq!(canonical_tag_type(Some("policy_area")), Some("Policy Area"));
        assert_eq!(canonical_tag_type(Some("Policy Areas")), Some("Policy Area"));
        assert_eq!(
            canonical_tag_type(Some("affected_groups")),
            Some("Affected Group")
        );
        assert_eq!(canonical_tag_type(Some("key-topic")), Some("Key Topic"));
        assert_eq!(canonical_tag_type(Some("sentiment")), None);
        assert_eq!(canonical_tag_type(None), None);
    }

    #[test]
    fn fuzzy_tag_matching_prefers_exact_then_closest() {
        let existing = vec![
            TagRow {
                id: 1,
                name: "Health Care".to_string(),
                normalized_name: "health_care".to_string(),
                parent_id: None,
            },
            TagRow {
                id: 2,
                name: "Agriculture".to_string(),
                normalized_name: "agriculture".to_string(),
                parent_id: None,
            },
        ];
        assert_eq!(match_existing_tag(&existing, "health care", 0.92), Some(1));
        assert_eq!(match_existing_tag(&existing, "Healthcare", 0.92), Some(1));
        assert_eq!(match_existing_tag(&existing, "Transportation", 0.92), None);
    }

    #[tokio::test]
    async fn configured_hierarchy_parents_are_applied() {
        let store = Store::open_in_memory().await.expect("store");
        store.init_schema().await.expect("schema");
        let hierarchy = TagHierarchy {
            version: 1,
            parents: vec![TagParentRule {
                tag_type: "Policy Area".to_string(),
                tag: "Solar".to_string(),
                parent: "Energy".to_string(),
            }],
        };

        let solar = resolve_tag_with_hierarchy(&store, &hierarchy, "Policy Area", "Solar")
            .await
            .expect("resolve");
        let tags = store.tags_for_type("Policy Area").await.unwrap();
        let energy = tags.iter().find(|t| t.normalized_name == "energy").unwrap();
        let solar_row = tags.iter().find(|t| t.id == solar).unwrap();
        assert_eq!(solar_row.parent_id, Some(energy.id));
    }

    #[test]
    fn endpoint_registry_defaults_to_enabled() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("endpoints.yaml");
        std::fs::write(
            &path,
            "version: 1\nendpoints:\n  - endpoint_id: member-bio\n    enabled: false\n",
        )
        .expect("write registry");

        let registry = EndpointRegistry::load_or_default(&path);
        assert!(!registry.is_enabled(EntityKind::MemberBios));
        assert!(registry.is_enabled(EntityKind::Bills));

        let missing = EndpointRegistry::load_or_default(&dir.path().join("absent.yaml"));
        assert!(missing.is_enabled(EntityKind::MemberBios));
    }

    #[test]
    fn tag_hierarchy_loads_from_yaml() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tag_hierarchy.yaml");
        std::fs::write(
            &path,
            "version: 1\nparents:\n  - type: \"Policy Area\"\n    tag: \"Renewable Energy\"\n    parent: \"Energy\"\n",
        )
        .expect("write hierarchy");

        let hierarchy = TagHierarchy::load_or_default(&path);
        assert_eq!(
            hierarchy.parent_for("Policy Area", "renewable energy"),
            Some("Energy")
        );
        assert_eq!(hierarchy.parent_for("Key Topic", "Renewable Energy"), None);
    }
}
