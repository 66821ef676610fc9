//! Core domain model for job tracking: candidate records, tracked jobs and tuning knobs.

pub mod normalize;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobtrack-core";

/// Version written into every persisted collection container.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Uniform candidate record handed from a source fetcher to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub company_id: String,
    pub company_name: String,
    pub title: String,
    pub location: String,
    pub url: String,
    #[serde(default)]
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn signature(&self) -> String {
        normalize::signature(&self.company_id, &self.title, &self.location)
    }

    /// Source identifier with blank values treated as absent.
    pub fn source_key(&self) -> Option<&str> {
        non_blank(self.source_identifier.as_deref())
    }

    pub fn url_key(&self) -> Option<&str> {
        non_blank(Some(self.url.as_str()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Missing,
    Closed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 3] = [JobStatus::Active, JobStatus::Missing, JobStatus::Closed];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Missing => "missing",
            JobStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label of the most recent classification decision for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Repost,
    Existing,
    Reopened,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::New,
        Classification::Repost,
        Classification::Existing,
        Classification::Reopened,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Repost => "repost",
            Classification::Existing => "existing",
            Classification::Reopened => "reopened",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sighting of a job on its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub timestamp: DateTime<Utc>,
    pub source_identifier: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ObservationEvent {
    pub fn from_record(record: &RawRecord) -> Self {
        Self {
            timestamp: record.fetched_at,
            source_identifier: record.source_identifier.clone(),
            url: record.url.clone(),
            note: None,
        }
    }
}

/// Durable representation of one opening, tracked across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub id: Uuid,
    pub company_id: String,
    pub company_name: String,
    pub title: String,
    pub location: String,
    pub url: String,
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub signature: String,
    pub status: JobStatus,
    pub classification: Classification,
    pub classification_reasoning: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub observations: Vec<ObservationEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedJob {
    /// Create a freshly observed, active job from its first record.
    pub fn from_record(
        id: Uuid,
        record: &RawRecord,
        signature: String,
        reasoning: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            company_id: record.company_id.clone(),
            company_name: record.company_name.clone(),
            title: record.title.clone(),
            location: record.location.clone(),
            url: record.url.clone(),
            source_identifier: record.source_identifier.clone(),
            department: record.department.clone(),
            description: record.description.clone(),
            signature,
            status: JobStatus::Active,
            classification: Classification::New,
            classification_reasoning: reasoning,
            first_seen: record.fetched_at,
            last_seen: record.fetched_at,
            observations: vec![ObservationEvent::from_record(record)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an observation and widen the seen-window so every observation
    /// stays inside `first_seen..=last_seen`.
    pub fn record_observation(&mut self, record: &RawRecord, note: Option<String>) {
        let mut event = ObservationEvent::from_record(record);
        event.note = note;
        self.first_seen = self.first_seen.min(event.timestamp);
        self.last_seen = self.last_seen.max(event.timestamp);
        self.url = record.url.clone();
        self.source_identifier = record.source_identifier.clone();
        self.observations.push(event);
    }

    pub fn observation_bounds_hold(&self) -> bool {
        self.first_seen <= self.last_seen
            && self
                .observations
                .iter()
                .all(|o| self.first_seen <= o.timestamp && o.timestamp <= self.last_seen)
    }

    pub fn source_key(&self) -> Option<&str> {
        non_blank(self.source_identifier.as_deref())
    }

    pub fn url_key(&self) -> Option<&str> {
        non_blank(Some(self.url.as_str()))
    }
}

/// Deterministic job id: identical inputs always yield the same id.
pub fn derive_job_id(record: &RawRecord, signature: &str, salt: u32) -> Uuid {
    let source = format!(
        "{}:{}:{}:{}:{}:{}",
        record.company_id,
        signature,
        record.source_identifier.as_deref().unwrap_or("<no-source-id>"),
        record.url,
        record.fetched_at.to_rfc3339(),
        salt
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes())
}

/// Versioned on-disk container for the tracked-job collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCollection {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub job_count: usize,
    pub jobs: Vec<TrackedJob>,
}

impl JobCollection {
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self::from_jobs(Vec::new(), generated_at)
    }

    /// Build a container with jobs in id order so serialization is stable.
    pub fn from_jobs(mut jobs: Vec<TrackedJob>, generated_at: DateTime<Utc>) -> Self {
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            version: SCHEMA_VERSION.to_string(),
            generated_at,
            job_count: jobs.len(),
            jobs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: String },
    #[error("fuzzy_match_threshold must be in (0, 1], got {0}")]
    ThresholdOutOfRange(f64),
}

/// Classification and lifecycle tuning, passed explicitly into every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub repost_window_days: u32,
    pub fuzzy_match_threshold: f64,
    pub missing_timeout_days: u32,
    pub snapshot_retention_count: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            repost_window_days: 30,
            fuzzy_match_threshold: 0.90,
            missing_timeout_days: 14,
            snapshot_retention_count: 30,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repost_window_days == 0 {
            return Err(ConfigError::NotPositive {
                field: "repost_window_days",
                value: self.repost_window_days.to_string(),
            });
        }
        if !(self.fuzzy_match_threshold > 0.0 && self.fuzzy_match_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(self.fuzzy_match_threshold));
        }
        if self.missing_timeout_days == 0 {
            return Err(ConfigError::NotPositive {
                field: "missing_timeout_days",
                value: self.missing_timeout_days.to_string(),
            });
        }
        if self.snapshot_retention_count == 0 {
            return Err(ConfigError::NotPositive {
                field: "snapshot_retention_count",
                value: self.snapshot_retention_count.to_string(),
            });
        }
        Ok(())
    }

    pub fn repost_window(&self) -> Duration {
        Duration::days(i64::from(self.repost_window_days))
    }

    pub fn missing_timeout(&self) -> Duration {
        Duration::days(i64::from(self.missing_timeout_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(source_id: &str, fetched_day: u32) -> RawRecord {
        RawRecord {
            company_id: "acme".into(),
            company_name: "Acme".into(),
            title: "Senior Software Engineer".into(),
            location: "San Francisco, CA".into(),
            url: format!("https://jobs.example.com/acme/{source_id}"),
            source_identifier: Some(source_id.into()),
            department: None,
            description: None,
            fetched_at: Utc.with_ymd_and_hms(2026, 3, fetched_day, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn derived_ids_are_stable_and_salt_sensitive() {
        let rec = record("101", 1);
        let sig = rec.signature();
        assert_eq!(derive_job_id(&rec, &sig, 0), derive_job_id(&rec, &sig, 0));
        assert_ne!(derive_job_id(&rec, &sig, 0), derive_job_id(&rec, &sig, 1));
    }

    #[test]
    fn observations_keep_seen_window_bounds() {
        let first = record("101", 5);
        let mut job = TrackedJob::from_record(
            derive_job_id(&first, "sig", 0),
            &first,
            first.signature(),
            "new".into(),
            first.fetched_at,
        );
        job.record_observation(&record("202", 9), None);
        job.record_observation(&record("203", 2), Some("late delivery".into()));

        assert!(job.observation_bounds_hold());
        assert_eq!(job.first_seen, record("x", 2).fetched_at);
        assert_eq!(job.last_seen, record("x", 9).fetched_at);
        assert_eq!(job.observations.len(), 3);
        assert_eq!(job.source_identifier.as_deref(), Some("203"));
    }

    #[test]
    fn blank_identity_keys_are_ignored() {
        let mut rec = record("101", 1);
        rec.source_identifier = Some("   ".into());
        rec.url = String::new();
        assert_eq!(rec.source_key(), None);
        assert_eq!(rec.url_key(), None);
    }

    #[test]
    fn status_and_classification_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Missing).unwrap(), "\"missing\"");
        assert_eq!(
            serde_json::to_string(&Classification::Reopened).unwrap(),
            "\"reopened\""
        );
    }

    #[test]
    fn config_defaults_validate_and_bad_values_are_rejected() {
        let config = TrackingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.repost_window(), Duration::days(30));

        let bad = TrackingConfig {
            fuzzy_match_threshold: 0.0,
            ..TrackingConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::ThresholdOutOfRange(0.0)));

        let bad = TrackingConfig {
            missing_timeout_days: 0,
            ..TrackingConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::NotPositive { field: "missing_timeout_days", .. })
        ));
    }

    #[test]
    fn collection_orders_jobs_by_id() {
        let a = record("1", 1);
        let b = record("2", 1);
        let jobs = vec![
            TrackedJob::from_record(derive_job_id(&a, "a", 0), &a, "a".into(), "new".into(), a.fetched_at),
            TrackedJob::from_record(derive_job_id(&b, "b", 0), &b, "b".into(), "new".into(), b.fetched_at),
        ];
        let collection = JobCollection::from_jobs(jobs, a.fetched_at);
        assert_eq!(collection.job_count, 2);
        assert!(collection.jobs[0].id < collection.jobs[1].id);
        assert_eq!(collection.version, SCHEMA_VERSION);
    }
}
