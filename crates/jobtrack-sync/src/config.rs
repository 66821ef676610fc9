//! Tracking file (`tracking.yaml`) and environment-driven paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jobtrack_adapters::CompanyConfig;
use jobtrack_core::{ConfigError, TrackingConfig};
use serde::Deserialize;
use thiserror::Error;

pub const SUPPORTED_TRACKING_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingFile {
    pub version: u32,
    #[serde(default)]
    pub classification: TrackingConfig,
    #[serde(default)]
    pub companies: Vec<CompanyConfig>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WatchlistError {
    #[error("unsupported tracking file version {0}")]
    UnsupportedVersion(u32),
    #[error("company id {0:?} must be lowercase letters, digits and single inner hyphens")]
    InvalidCompanyId(String),
    #[error("company id {0:?} is listed more than once")]
    DuplicateCompanyId(String),
    #[error("company {0:?} has an empty name")]
    EmptyName(String),
    #[error("company {0:?} has no adapter")]
    EmptyAdapter(String),
    #[error(transparent)]
    Tracking(#[from] ConfigError),
}

impl TrackingFile {
    pub fn parse(text: &str) -> Result<Self> {
        let file: TrackingFile = serde_yaml::from_str(text).context("parsing tracking file")?;
        file.validate()?;
        Ok(file)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), WatchlistError> {
        if self.version != SUPPORTED_TRACKING_VERSION {
            return Err(WatchlistError::UnsupportedVersion(self.version));
        }
        self.classification.validate()?;

        let mut seen = BTreeSet::new();
        for company in &self.companies {
            if !is_valid_company_id(&company.id) {
                return Err(WatchlistError::InvalidCompanyId(company.id.clone()));
            }
            if !seen.insert(company.id.as_str()) {
                return Err(WatchlistError::DuplicateCompanyId(company.id.clone()));
            }
            if company.name.trim().is_empty() {
                return Err(WatchlistError::EmptyName(company.id.clone()));
            }
            if company.adapter.trim().is_empty() {
                return Err(WatchlistError::EmptyAdapter(company.id.clone()));
            }
        }
        Ok(())
    }

    pub fn enabled_companies(&self) -> impl Iterator<Item = &CompanyConfig> {
        self.companies.iter().filter(|c| c.enabled)
    }
}

/// Lowercase ascii alphanumerics separated by single hyphens.
pub fn is_valid_company_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('-').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub tracking_file: PathBuf,
    pub data_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub fixtures_dir: PathBuf,
}

impl CycleConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("JOBTRACK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        Self {
            tracking_file: std::env::var("JOBTRACK_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./tracking.yaml")),
            snapshot_dir: std::env::var("JOBTRACK_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("snapshots")),
            fixtures_dir: std::env::var("JOBTRACK_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./fixtures")),
            data_dir,
        }
    }
}
