//! Classification of one candidate record against the tracked pool.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use jobtrack_core::{Classification, JobStatus, RawRecord, TrackedJob, TrackingConfig};
use serde::Serialize;
use uuid::Uuid;

use crate::matcher::similarity;
use crate::working_set::JobPool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub classification: Classification,
    pub signature: String,
    pub matched_job_id: Option<Uuid>,
    pub score: Option<f64>,
    pub reasoning: String,
}

/// Decide NEW / REPOST / EXISTING / REOPENED for `record`.
///
/// Pure: reads only the pool, the config and `now`, so calling it twice on
/// the same state yields the same decision.
pub fn classify<P>(record: &RawRecord, pool: &P, config: &TrackingConfig, now: DateTime<Utc>) -> Decision
where
    P: JobPool + ?Sized,
{
    let signature = record.signature();

    if let Some(job) = pick_identity_match(record, pool.identity_matches(record)) {
        let via = if record.source_key().is_some() && job.source_key() == record.source_key() {
            "source identifier"
        } else {
            "url"
        };
        let (classification, reasoning) = if job.status == JobStatus::Closed {
            (
                Classification::Reopened,
                format!("closed job {} reappeared with the same {via}", job.id),
            )
        } else {
            (
                Classification::Existing,
                format!("same {via} as tracked job {} ({})", job.id, job.status),
            )
        };
        return Decision {
            classification,
            signature,
            matched_job_id: Some(job.id),
            score: None,
            reasoning,
        };
    }

    let window = config.repost_window();
    let mut best: Option<(&TrackedJob, f64)> = None;
    for job in pool.company_jobs(&record.company_id) {
        if now.signed_duration_since(job.last_seen) > window {
            continue;
        }
        let score = similarity(&signature, &job.signature);
        let better = match best {
            None => true,
            Some((current, current_score)) => match score.total_cmp(&current_score) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => prefer(job, current) == Ordering::Less,
            },
        };
        if better {
            best = Some((job, score));
        }
    }

    let threshold = config.fuzzy_match_threshold;
    match best {
        Some((job, score)) if score >= threshold => {
            let (classification, verb) = if job.status == JobStatus::Closed {
                (Classification::Reopened, "reopens closed")
            } else {
                (Classification::Repost, "reposts")
            };
            Decision {
                classification,
                signature,
                matched_job_id: Some(job.id),
                score: Some(score),
                reasoning: format!(
                    "{verb} job {} (similarity {score:.3} >= {threshold:.2}, last seen {})",
                    job.id,
                    job.last_seen.format("%Y-%m-%d")
                ),
            }
        }
        Some((_, score)) => Decision {
            classification: Classification::New,
            signature,
            matched_job_id: None,
            score: Some(score),
            reasoning: format!(
                "best similarity {score:.3} within {} days is below {threshold:.2}",
                config.repost_window_days
            ),
        },
        None => Decision {
            classification: Classification::New,
            signature,
            matched_job_id: None,
            score: None,
            reasoning: format!(
                "no tracked job for {} seen within {} days",
                record.company_id, config.repost_window_days
            ),
        },
    }
}

/// Among identity hits prefer a source-identifier hit, then the usual tie-break.
fn pick_identity_match<'a>(record: &RawRecord, hits: Vec<&'a TrackedJob>) -> Option<&'a TrackedJob> {
    let source = record.source_key();
    hits.into_iter().min_by(|a, b| {
        let a_source = source.is_some() && a.source_key() == source;
        let b_source = source.is_some() && b.source_key() == source;
        b_source.cmp(&a_source).then_with(|| prefer(a, b))
    })
}

/// `Less` means `a` wins: more recent `last_seen`, then smaller id.
fn prefer(a: &TrackedJob, b: &TrackedJob) -> Ordering {
    b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id))
}
