//! Status transitions: applying decisions and the end-of-cycle sweep.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use jobtrack_core::{derive_job_id, Classification, JobStatus, RawRecord, TrackedJob, TrackingConfig};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::classifier::Decision;
use crate::working_set::WorkingSet;

pub const REOPENED_NOTE: &str = "reopened";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("decision references job {0} which is not in the working set")]
    UnknownJob(Uuid),
    #[error("{0} decision carries no matched job id")]
    MissingMatch(Classification),
}

/// Where a decision landed after it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub job_id: Uuid,
    /// Effective label; a match against a closed job is always `Reopened`.
    pub classification: Classification,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub marked_missing: Vec<Uuid>,
    pub closed: Vec<Uuid>,
}

/// Fold one classified record into the working set.
pub fn apply_decision(
    set: &mut WorkingSet,
    record: &RawRecord,
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<Applied, LifecycleError> {
    if decision.classification == Classification::New {
        let id = fresh_id(set, record, &decision.signature);
        let job = TrackedJob::from_record(
            id,
            record,
            decision.signature.clone(),
            decision.reasoning.clone(),
            now,
        );
        set.insert(job);
        return Ok(Applied {
            job_id: id,
            classification: Classification::New,
        });
    }

    let id = decision
        .matched_job_id
        .ok_or(LifecycleError::MissingMatch(decision.classification))?;
    set.update(&id, |job| {
        let reopened = job.status == JobStatus::Closed;
        let classification = if reopened {
            Classification::Reopened
        } else {
            decision.classification
        };
        job.record_observation(record, reopened.then(|| REOPENED_NOTE.to_string()));
        job.status = JobStatus::Active;
        job.classification = classification;
        job.classification_reasoning = decision.reasoning.clone();
        job.updated_at = now;
        Applied {
            job_id: id,
            classification,
        }
    })
    .ok_or(LifecycleError::UnknownJob(id))
}

fn fresh_id(set: &WorkingSet, record: &RawRecord, signature: &str) -> Uuid {
    let mut salt = 0u32;
    loop {
        let id = derive_job_id(record, signature, salt);
        if !set.contains(&id) {
            return id;
        }
        salt += 1;
    }
}

/// End-of-cycle sweep for one company.
///
/// Closing runs before marking, so a job turned missing here is never closed
/// by the same sweep.
pub fn sweep_company(
    set: &mut WorkingSet,
    company_id: &str,
    observed: &BTreeSet<Uuid>,
    config: &TrackingConfig,
    now: DateTime<Utc>,
) -> SweepOutcome {
    let timeout = config.missing_timeout();
    let mut outcome = SweepOutcome::default();

    for id in set.company_ids(company_id) {
        let closed = set
            .update(&id, |job| {
                let overdue = now.signed_duration_since(job.last_seen) > timeout;
                if job.status == JobStatus::Missing && overdue {
                    job.status = JobStatus::Closed;
                    job.updated_at = now;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if closed {
            debug!(job = %id, company = company_id, "closing job missing past timeout");
            outcome.closed.push(id);
        }
    }

    for id in set.company_ids(company_id) {
        if observed.contains(&id) {
            continue;
        }
        let marked = set
            .update(&id, |job| {
                if job.status == JobStatus::Active {
                    job.status = JobStatus::Missing;
                    job.updated_at = now;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if marked {
            debug!(job = %id, company = company_id, "job not observed this cycle");
            outcome.marked_missing.push(id);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).single().expect("ts") + Duration::days(n)
    }

    fn record(source_id: &str, at: DateTime<Utc>) -> RawRecord {
        RawRecord {
            company_id: "acme".into(),
            company_name: "Acme".into(),
            title: "Platform Engineer".into(),
            location: "Denver, CO".into(),
            url: format!("https://jobs.example.com/acme/{source_id}"),
            source_identifier: Some(source_id.into()),
            department: Some("Infra".into()),
            description: None,
            fetched_at: at,
        }
    }

    fn observe(set: &mut WorkingSet, record: &RawRecord, now: DateTime<Utc>) -> Applied {
        let decision = classify(record, &*set, &TrackingConfig::default(), now);
        apply_decision(set, record, &decision, now).expect("apply")
    }

    #[test]
    fn new_decision_creates_active_job() {
        let mut set = WorkingSet::default();
        let applied = observe(&mut set, &record("1", day(0)), day(0));
        assert_eq!(applied.classification, Classification::New);
        let job = set.get(&applied.job_id).expect("job");
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.observations.len(), 1);
    }

    #[test]
    fn repost_updates_url_and_last_seen_only() {
        let mut set = WorkingSet::default();
        let first = observe(&mut set, &record("1", day(0)), day(0));
        let second = observe(&mut set, &record("2", day(2)), day(2));
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(second.classification, Classification::Repost);

        let job = set.get(&first.job_id).expect("job");
        assert_eq!(job.first_seen, day(0));
        assert_eq!(job.last_seen, day(2));
        assert_eq!(job.source_identifier.as_deref(), Some("2"));
        assert!(job.url.ends_with("/2"));
        assert!(job.observation_bounds_hold());
    }

    #[test]
    fn sweep_marks_then_closes_after_timeout() {
        let config = TrackingConfig::default();
        let mut set = WorkingSet::default();
        let id = observe(&mut set, &record("1", day(0)), day(0)).job_id;
        let none = BTreeSet::new();

        let first = sweep_company(&mut set, "acme", &none, &config, day(1));
        assert_eq!(first.marked_missing, vec![id]);
        assert!(first.closed.is_empty());

        let at_timeout = sweep_company(&mut set, "acme", &none, &config, day(14));
        assert!(at_timeout.closed.is_empty());
        assert_eq!(set.get(&id).map(|j| j.status), Some(JobStatus::Missing));

        let past_timeout = sweep_company(&mut set, "acme", &none, &config, day(15));
        assert_eq!(past_timeout.closed, vec![id]);
        assert_eq!(set.get(&id).map(|j| j.status), Some(JobStatus::Closed));
    }

    #[test]
    fn job_marked_missing_is_not_closed_in_same_sweep() {
        let config = TrackingConfig::default();
        let mut set = WorkingSet::default();
        let id = observe(&mut set, &record("1", day(0)), day(0)).job_id;

        let outcome = sweep_company(&mut set, "acme", &BTreeSet::new(), &config, day(40));
        assert_eq!(outcome.marked_missing, vec![id]);
        assert!(outcome.closed.is_empty());
    }

    #[test]
    fn observed_jobs_stay_active() {
        let config = TrackingConfig::default();
        let mut set = WorkingSet::default();
        let id = observe(&mut set, &record("1", day(0)), day(0)).job_id;
        let observed = BTreeSet::from([id]);
        let outcome = sweep_company(&mut set, "acme", &observed, &config, day(0));
        assert_eq!(outcome, SweepOutcome::default());
    }

    #[test]
    fn reopening_keeps_id_and_history() {
        let mut set = WorkingSet::default();
        let id = observe(&mut set, &record("1", day(0)), day(0)).job_id;
        set.update(&id, |job| job.status = JobStatus::Closed);

        let applied = observe(&mut set, &record("3", day(20)), day(20));
        assert_eq!(applied.job_id, id);
        assert_eq!(applied.classification, Classification::Reopened);

        let job = set.get(&id).expect("job");
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.observations.len(), 2);
        assert_eq!(job.observations[1].note.as_deref(), Some(REOPENED_NOTE));
    }

    #[test]
    fn matched_decision_without_job_is_rejected() {
        let mut set = WorkingSet::default();
        let rec = record("1", day(0));
        let decision = Decision {
            classification: Classification::Repost,
            signature: rec.signature(),
            matched_job_id: Some(Uuid::nil()),
            score: Some(1.0),
            reasoning: String::new(),
        };
        assert_eq!(
            apply_decision(&mut set, &rec, &decision, day(0)),
            Err(LifecycleError::UnknownJob(Uuid::nil()))
        );
    }
}
