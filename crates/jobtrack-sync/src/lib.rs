//! Cycle orchestration: fetch, classify, sweep, persist once.

pub mod classifier;
pub mod config;
pub mod lifecycle;
pub mod matcher;
pub mod working_set;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobtrack_adapters::{
    fetch_company_candidates, source_for_adapter, validate_record, CandidateSource, CompanyConfig,
    FetchContext,
};
use jobtrack_core::{Classification, TrackingConfig};
use jobtrack_storage::{JobStore, StoreConfig};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use classifier::{classify, Decision};
pub use config::{CycleConfig, TrackingFile, WatchlistError};
pub use lifecycle::{apply_decision, sweep_company, Applied, LifecycleError, SweepOutcome};
pub use matcher::{similarity, MatchConfig, MatchExplanation, Matcher, ScoredMatch};
pub use working_set::{JobPool, WorkingSet};

pub const CRATE_NAME: &str = "jobtrack-sync";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanyReport {
    pub company_id: String,
    pub fetched: usize,
    pub skipped: usize,
    pub new: usize,
    pub repost: usize,
    pub existing: usize,
    pub reopened: usize,
    pub marked_missing: usize,
    pub closed: usize,
}

impl CompanyReport {
    fn count(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Repost => self.repost += 1,
            Classification::Existing => self.existing += 1,
            Classification::Reopened => self.reopened += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub cycle_at: DateTime<Utc>,
    pub companies: Vec<CompanyReport>,
    pub total_jobs: usize,
    pub saved_path: String,
    pub sha256: String,
    pub snapshot: Option<String>,
}

impl CycleReport {
    pub fn total(&self, pick: impl Fn(&CompanyReport) -> usize) -> usize {
        self.companies.iter().map(pick).sum()
    }
}

pub struct CyclePipeline {
    store: JobStore,
    tracking: TrackingConfig,
    companies: Vec<CompanyConfig>,
    sources: BTreeMap<String, Box<dyn CandidateSource>>,
}

impl CyclePipeline {
    pub fn new(store: JobStore, tracking: TrackingConfig, companies: Vec<CompanyConfig>) -> Self {
        Self {
            store,
            tracking,
            companies,
            sources: BTreeMap::new(),
        }
    }

    /// Build from a loaded tracking file, registering the built-in sources
    /// for every adapter the watchlist names.
    pub fn from_config(config: &CycleConfig, file: TrackingFile) -> Self {
        let store = JobStore::new(StoreConfig {
            data_dir: config.data_dir.clone(),
            snapshot_dir: config.snapshot_dir.clone(),
            snapshot_retention: file.classification.snapshot_retention_count,
        });
        let mut pipeline = Self::new(store, file.classification, file.companies);
        let adapters: BTreeSet<String> = pipeline.companies.iter().map(|c| c.adapter.clone()).collect();
        for adapter in adapters {
            if let Some(source) = source_for_adapter(&adapter, &config.fixtures_dir) {
                pipeline.sources.insert(adapter, source);
            }
        }
        pipeline
    }

    pub fn with_source(mut self, adapter: impl Into<String>, source: Box<dyn CandidateSource>) -> Self {
        self.sources.insert(adapter.into(), source);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run one full cycle stamped with `now`.
    ///
    /// The collection is loaded once and saved once. Anything that fails before
    /// the save leaves the live file untouched; a failed snapshot is logged and
    /// does not fail the cycle.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", %run_id, cycle_at = %now.to_rfc3339());
        self.run_cycle(run_id, now).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<CycleReport> {
        let collection = self.store.load().await.context("loading job collection")?;
        let mut set = WorkingSet::from_collection(collection);
        let ctx = FetchContext {
            run_id,
            fetched_at: now,
        };

        let mut reports = Vec::new();
        for company in self.companies.iter().filter(|c| c.enabled) {
            let report = self
                .process_company(&mut set, &ctx, company, now)
                .instrument(info_span!("company", company = %company.id))
                .await?;
            reports.push(report);
        }

        let collection = set.into_collection(now);
        let receipt = self
            .store
            .save(&collection)
            .await
            .context("saving job collection")?;

        let snapshot = match self.store.snapshot(now).await {
            Ok(entry) => Some(entry.name),
            Err(err) => {
                warn!(error = %err, "snapshot failed; live collection is saved");
                None
            }
        };

        let report = CycleReport {
            run_id,
            cycle_at: now,
            companies: reports,
            total_jobs: collection.job_count,
            saved_path: receipt.path.display().to_string(),
            sha256: receipt.sha256,
            snapshot,
        };
        info!(
            jobs = report.total_jobs,
            new = report.total(|c| c.new),
            repost = report.total(|c| c.repost),
            reopened = report.total(|c| c.reopened),
            closed = report.total(|c| c.closed),
            "cycle complete"
        );
        Ok(report)
    }

    async fn process_company(
        &self,
        set: &mut WorkingSet,
        ctx: &FetchContext,
        company: &CompanyConfig,
        now: DateTime<Utc>,
    ) -> Result<CompanyReport> {
        let mut report = CompanyReport {
            company_id: company.id.clone(),
            ..CompanyReport::default()
        };

        let records = match self.sources.get(&company.adapter) {
            Some(source) => fetch_company_candidates(source.as_ref(), ctx, company).await,
            None => {
                warn!(adapter = %company.adapter, "no candidate source for adapter; company unobserved");
                Vec::new()
            }
        };
        report.fetched = records.len();

        let mut observed = BTreeSet::new();
        for record in &records {
            if let Err(err) = validate_record(record, company) {
                warn!(error = %err, url = %record.url, "skipping invalid record");
                report.skipped += 1;
                continue;
            }
            let decision = classify(record, &*set, &self.tracking, now);
            let applied = apply_decision(set, record, &decision, now)
                .with_context(|| format!("applying decision for {}", record.url))?;
            report.count(applied.classification);
            observed.insert(applied.job_id);
        }

        let sweep = sweep_company(set, &company.id, &observed, &self.tracking, now);
        report.marked_missing = sweep.marked_missing.len();
        report.closed = sweep.closed.len();

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            new = report.new,
            repost = report.repost,
            existing = report.existing,
            reopened = report.reopened,
            missing = report.marked_missing,
            closed = report.closed,
            "company processed"
        );
        Ok(report)
    }
}

/// Load `tracking.yaml` and run one cycle with paths taken from the environment.
pub async fn run_cycle_from_env(now: DateTime<Utc>) -> Result<CycleReport> {
    let config = CycleConfig::from_env();
    let file = TrackingFile::load(&config.tracking_file).await?;
    CyclePipeline::from_config(&config, file).run_once(now).await
}
