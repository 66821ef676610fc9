//! Structural validation of the persisted collection container.
//!
//! Validation runs on the JSON value rather than the typed model so that
//! files written by older or foreign writers are checked field by field
//! before anything is decoded.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use jobtrack_core::{Classification, JobCollection, JobStatus};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Major version of the container format this build reads and writes.
pub const SUPPORTED_MAJOR: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub pointer: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pointer, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} schema violation(s), first: {}", .violations.len(), first_violation(.violations))]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

fn first_violation(violations: &[SchemaViolation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[source] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("decoding validated collection: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Parse and fully validate collection bytes.
pub fn decode_collection(bytes: &[u8]) -> Result<JobCollection, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Json)?;
    validate_collection_value(&value)?;
    serde_json::from_value(value).map_err(DecodeError::Decode)
}

pub fn validate_collection(collection: &JobCollection) -> Result<(), SchemaError> {
    let value = serde_json::to_value(collection).map_err(|err| SchemaError {
        violations: vec![SchemaViolation {
            pointer: String::new(),
            message: format!("collection is not serializable: {err}"),
        }],
    })?;
    validate_collection_value(&value)
}

pub fn validate_collection_value(value: &Value) -> Result<(), SchemaError> {
    let mut v = Validator::default();
    v.collection(value);
    if v.violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError {
            violations: v.violations,
        })
    }
}

#[derive(Default)]
struct Validator {
    violations: Vec<SchemaViolation>,
}

impl Validator {
    fn push(&mut self, pointer: impl Into<String>, message: impl Into<String>) {
        self.violations.push(SchemaViolation {
            pointer: pointer.into(),
            message: message.into(),
        });
    }

    fn collection(&mut self, value: &Value) {
        let Some(root) = value.as_object() else {
            self.push("", "container must be an object");
            return;
        };

        if let Some(version) = self.required_str(root, "", "version") {
            match semver::Version::parse(version) {
                Ok(parsed) if parsed.major == SUPPORTED_MAJOR => {}
                Ok(parsed) => self.push(
                    "/version",
                    format!("unsupported major version {} (expected {SUPPORTED_MAJOR})", parsed.major),
                ),
                Err(err) => self.push("/version", format!("not a semantic version: {err}")),
            }
        }
        self.required_timestamp(root, "", "generated_at");

        let Some(jobs) = root.get("jobs") else {
            self.push("/jobs", "missing required field");
            return;
        };
        let Some(jobs) = jobs.as_array() else {
            self.push("/jobs", "must be an array");
            return;
        };

        match root.get("job_count").map(Value::as_u64) {
            Some(Some(count)) if count as usize == jobs.len() => {}
            Some(Some(count)) => self.push(
                "/job_count",
                format!("declares {count} jobs but container holds {}", jobs.len()),
            ),
            Some(None) => self.push("/job_count", "must be a non-negative integer"),
            None => self.push("/job_count", "missing required field"),
        }

        let mut seen_ids = HashSet::new();
        for (index, job) in jobs.iter().enumerate() {
            let pointer = format!("/jobs/{index}");
            if let Some(id) = self.job(&pointer, job) {
                if !seen_ids.insert(id) {
                    self.push(format!("{pointer}/id"), format!("duplicate job id {id}"));
                }
            }
        }
    }

    /// Validates one job, returning its id when that field is well formed.
    fn job(&mut self, pointer: &str, value: &Value) -> Option<Uuid> {
        let Some(job) = value.as_object() else {
            self.push(pointer, "job must be an object");
            return None;
        };

        let id = self.required_str(job, pointer, "id").and_then(|raw| match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(err) => {
                self.push(format!("{pointer}/id"), format!("not a uuid: {err}"));
                None
            }
        });

        for field in ["company_id", "title", "location"] {
            if let Some(text) = self.required_str(job, pointer, field) {
                if text.trim().is_empty() {
                    self.push(format!("{pointer}/{field}"), "must not be empty");
                }
            }
        }
        for field in ["company_name", "url", "signature", "classification_reasoning"] {
            self.required_str(job, pointer, field);
        }
        for field in ["source_identifier", "department", "description"] {
            self.optional_str(job, pointer, field);
        }

        if let Some(status) = self.required_str(job, pointer, "status") {
            if !JobStatus::ALL.iter().any(|s| s.as_str() == status) {
                self.push(format!("{pointer}/status"), format!("unknown status {status:?}"));
            }
        }
        if let Some(label) = self.required_str(job, pointer, "classification") {
            if !Classification::ALL.iter().any(|c| c.as_str() == label) {
                self.push(
                    format!("{pointer}/classification"),
                    format!("unknown classification {label:?}"),
                );
            }
        }

        let first_seen = self.required_timestamp(job, pointer, "first_seen");
        let last_seen = self.required_timestamp(job, pointer, "last_seen");
        self.required_timestamp(job, pointer, "created_at");
        self.required_timestamp(job, pointer, "updated_at");

        if let (Some(first), Some(last)) = (first_seen, last_seen) {
            if first > last {
                self.push(format!("{pointer}/first_seen"), "first_seen is after last_seen");
            }
        }

        match job.get("observations").map(Value::as_array) {
            Some(Some(observations)) => {
                for (index, observation) in observations.iter().enumerate() {
                    let obs_pointer = format!("{pointer}/observations/{index}");
                    let Some(ts) = self.observation(&obs_pointer, observation) else {
                        continue;
                    };
                    let before_first = first_seen.is_some_and(|first| ts < first);
                    let after_last = last_seen.is_some_and(|last| ts > last);
                    if before_first || after_last {
                        self.push(
                            format!("{obs_pointer}/timestamp"),
                            "observation falls outside first_seen..=last_seen",
                        );
                    }
                }
            }
            Some(None) => self.push(format!("{pointer}/observations"), "must be an array"),
            None => self.push(format!("{pointer}/observations"), "missing required field"),
        }

        id
    }

    fn observation(&mut self, pointer: &str, value: &Value) -> Option<DateTime<FixedOffset>> {
        let Some(observation) = value.as_object() else {
            self.push(pointer, "observation must be an object");
            return None;
        };
        self.required_str(observation, pointer, "url");
        self.optional_str(observation, pointer, "source_identifier");
        self.optional_str(observation, pointer, "note");
        self.required_timestamp(observation, pointer, "timestamp")
    }

    fn required_str<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        pointer: &str,
        field: &str,
    ) -> Option<&'a str> {
        match object.get(field) {
            Some(Value::String(text)) => Some(text.as_str()),
            Some(_) => {
                self.push(format!("{pointer}/{field}"), "must be a string");
                None
            }
            None => {
                self.push(format!("{pointer}/{field}"), "missing required field");
                None
            }
        }
    }

    fn optional_str(&mut self, object: &Map<String, Value>, pointer: &str, field: &str) {
        match object.get(field) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => self.push(format!("{pointer}/{field}"), "must be a string or null"),
        }
    }

    fn required_timestamp(
        &mut self,
        object: &Map<String, Value>,
        pointer: &str,
        field: &str,
    ) -> Option<DateTime<FixedOffset>> {
        let raw = self.required_str(object, pointer, field)?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts),
            Err(err) => {
                self.push(format!("{pointer}/{field}"), format!("not an RFC 3339 timestamp: {err}"));
                None
            }
        }
    }
}
