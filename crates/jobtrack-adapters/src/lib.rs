//! Candidate source contracts + fixture-first source implementations.
//!
//! A [`CandidateSource`] turns one company's postings into uniform
//! [`RawRecord`]s. The pipeline only ever calls [`fetch_company_candidates`],
//! which contains source failures: a company whose fetch fails yields an empty
//! list so its jobs age through the missing sweep like any unobserved job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobtrack_core::RawRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobtrack-adapters";

/// Adapter name for fixture-backed companies.
pub const FIXTURE_ADAPTER: &str = "fixture";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTarget {
    pub url: String,
}

/// One watched company, as configured in the watchlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyConfig {
    pub id: String,
    pub name: String,
    pub adapter: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<SourceTarget>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no candidate source registered for adapter {0:?}")]
    UnknownAdapter(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("feed {path} belongs to company {found:?}, expected {expected:?}")]
    CompanyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordValidationError {
    #[error("record is missing required field {0}")]
    MissingField(&'static str),
    #[error("record belongs to company {found:?} but was fetched for {expected:?}")]
    ForeignCompany { expected: String, found: String },
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn fetch_candidates(
        &self,
        ctx: &FetchContext,
        company: &CompanyConfig,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

/// Fetch a company's candidates, converting any source failure into an empty list.
pub async fn fetch_company_candidates(
    source: &dyn CandidateSource,
    ctx: &FetchContext,
    company: &CompanyConfig,
) -> Vec<RawRecord> {
    match source.fetch_candidates(ctx, company).await {
        Ok(records) => {
            debug!(
                company = %company.id,
                platform = source.platform(),
                records = records.len(),
                "fetched candidates"
            );
            records
        }
        Err(err) => {
            warn!(
                company = %company.id,
                platform = source.platform(),
                error = %err,
                "candidate fetch failed; treating company as unobserved this cycle"
            );
            Vec::new()
        }
    }
}

/// Reject records missing the fields the signature is built from.
pub fn validate_record(record: &RawRecord, company: &CompanyConfig) -> Result<(), RecordValidationError> {
    if record.company_id.trim().is_empty() {
        return Err(RecordValidationError::MissingField("company_id"));
    }
    if record.title.trim().is_empty() {
        return Err(RecordValidationError::MissingField("title"));
    }
    if record.location.trim().is_empty() {
        return Err(RecordValidationError::MissingField("location"));
    }
    if record.company_id != company.id {
        return Err(RecordValidationError::ForeignCompany {
            expected: company.id.clone(),
            found: record.company_id.clone(),
        });
    }
    Ok(())
}

/// On-disk capture of one company's postings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFeed {
    pub company_id: String,
    #[serde(default)]
    pub captured_from_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub postings: Vec<FixturePosting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePosting {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Reads `<root>/<company_id>.json` feeds and stamps them with the fetch time.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
}

impl FixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn feed_path(&self, company_id: &str) -> PathBuf {
        self.root.join(format!("{company_id}.json"))
    }

    pub async fn load_feed(&self, company_id: &str) -> Result<FixtureFeed, AdapterError> {
        let path = self.feed_path(company_id);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| AdapterError::Io {
                path: path.clone(),
                source,
            })?;
        let feed: FixtureFeed =
            serde_json::from_str(&text).map_err(|source| AdapterError::Parse {
                path: path.clone(),
                source,
            })?;
        if feed.company_id != company_id {
            return Err(AdapterError::CompanyMismatch {
                path,
                expected: company_id.to_string(),
                found: feed.company_id,
            });
        }
        Ok(feed)
    }
}

#[async_trait]
impl CandidateSource for FixtureSource {
    fn platform(&self) -> &'static str {
        FIXTURE_ADAPTER
    }

    async fn fetch_candidates(
        &self,
        ctx: &FetchContext,
        company: &CompanyConfig,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let feed = self.load_feed(&company.id).await?;
        Ok(feed
            .postings
            .into_iter()
            .map(|posting| posting_to_record(posting, company, ctx.fetched_at))
            .collect())
    }
}

fn posting_to_record(posting: FixturePosting, company: &CompanyConfig, fetched_at: DateTime<Utc>) -> RawRecord {
    RawRecord {
        company_id: company.id.clone(),
        company_name: company.name.clone(),
        title: posting.title,
        location: posting.location,
        url: posting.url,
        source_identifier: posting.source_identifier,
        department: posting.department,
        description: posting.description,
        fetched_at,
    }
}

/// Serves pre-recorded candidate lists keyed by company id; companies with no
/// entry report a failed fetch.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    feeds: BTreeMap<String, Vec<RawRecord>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company_id: impl Into<String>, records: Vec<RawRecord>) -> Self {
        self.feeds.insert(company_id.into(), records);
        self
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn platform(&self) -> &'static str {
        "static"
    }

    async fn fetch_candidates(
        &self,
        ctx: &FetchContext,
        company: &CompanyConfig,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let records = self
            .feeds
            .get(&company.id)
            .ok_or_else(|| AdapterError::Message(format!("no feed recorded for {}", company.id)))?;
        Ok(records
            .iter()
            .cloned()
            .map(|mut record| {
                record.fetched_at = ctx.fetched_at;
                record
            })
            .collect())
    }
}

/// Resolve the source implementation for a configured adapter name.
pub fn source_for_adapter(adapter: &str, fixtures_root: &Path) -> Option<Box<dyn CandidateSource>> {
    match adapter {
        FIXTURE_ADAPTER => Some(Box::new(FixtureSource::new(fixtures_root))),
        _ => None,
    }
}
