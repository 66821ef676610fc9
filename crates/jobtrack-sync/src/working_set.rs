//! In-memory working copy of the collection for one cycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use jobtrack_core::{JobCollection, RawRecord, TrackedJob};
use uuid::Uuid;

/// Read access the classification engine needs from the tracked pool.
pub trait JobPool {
    /// Every tracked job of one company, in id order.
    fn company_jobs(&self, company_id: &str) -> Vec<&TrackedJob>;

    /// Jobs of the record's company sharing its source identifier or url.
    fn identity_matches(&self, record: &RawRecord) -> Vec<&TrackedJob>;
}

type IdentityKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    jobs: BTreeMap<Uuid, TrackedJob>,
    by_company: BTreeMap<String, BTreeSet<Uuid>>,
    by_source_id: BTreeMap<IdentityKey, BTreeSet<Uuid>>,
    by_url: BTreeMap<IdentityKey, BTreeSet<Uuid>>,
}

impl WorkingSet {
    pub fn from_collection(collection: JobCollection) -> Self {
        let mut set = Self::default();
        for job in collection.jobs {
            set.insert(job);
        }
        set
    }

    /// Freeze the working copy into a container stamped with the cycle time.
    pub fn into_collection(self, generated_at: DateTime<Utc>) -> JobCollection {
        JobCollection::from_jobs(self.jobs.into_values().collect(), generated_at)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&TrackedJob> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &TrackedJob> {
        self.jobs.values()
    }

    pub fn company_ids(&self, company_id: &str) -> Vec<Uuid> {
        self.by_company
            .get(company_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Insert or replace a job, keeping every index in step.
    pub fn insert(&mut self, job: TrackedJob) {
        if let Some(previous) = self.jobs.remove(&job.id) {
            self.unindex(&previous);
        }
        self.index(&job);
        self.jobs.insert(job.id, job);
    }

    /// Mutate one job in place; identity indexes are rebuilt for it afterwards.
    pub fn update<R>(&mut self, id: &Uuid, f: impl FnOnce(&mut TrackedJob) -> R) -> Option<R> {
        let mut job = self.jobs.remove(id)?;
        self.unindex(&job);
        let out = f(&mut job);
        self.index(&job);
        self.jobs.insert(job.id, job);
        Some(out)
    }

    fn index(&mut self, job: &TrackedJob) {
        self.by_company
            .entry(job.company_id.clone())
            .or_default()
            .insert(job.id);
        if let Some(source) = job.source_key() {
            self.by_source_id
                .entry((job.company_id.clone(), source.to_string()))
                .or_default()
                .insert(job.id);
        }
        if let Some(url) = job.url_key() {
            self.by_url
                .entry((job.company_id.clone(), url.to_string()))
                .or_default()
                .insert(job.id);
        }
    }

    fn unindex(&mut self, job: &TrackedJob) {
        remove_from(&mut self.by_company, &job.company_id, &job.id);
        if let Some(source) = job.source_key() {
            remove_from(
                &mut self.by_source_id,
                &(job.company_id.clone(), source.to_string()),
                &job.id,
            );
        }
        if let Some(url) = job.url_key() {
            remove_from(&mut self.by_url, &(job.company_id.clone(), url.to_string()), &job.id);
        }
    }
}

fn remove_from<K: Ord>(index: &mut BTreeMap<K, BTreeSet<Uuid>>, key: &K, id: &Uuid) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl JobPool for WorkingSet {
    fn company_jobs(&self, company_id: &str) -> Vec<&TrackedJob> {
        self.by_company
            .get(company_id)
            .map(|ids| ids.iter().filter_map(|id| self.jobs.get(id)).collect())
            .unwrap_or_default()
    }

    fn identity_matches(&self, record: &RawRecord) -> Vec<&TrackedJob> {
        let mut ids = BTreeSet::new();
        if let Some(source) = record.source_key() {
            if let Some(found) = self
                .by_source_id
                .get(&(record.company_id.clone(), source.to_string()))
            {
                ids.extend(found.iter().copied());
            }
        }
        if let Some(url) = record.url_key() {
            if let Some(found) = self.by_url.get(&(record.company_id.clone(), url.to_string())) {
                ids.extend(found.iter().copied());
            }
        }
        ids.iter().filter_map(|id| self.jobs.get(id)).collect()
    }
}

/// Linear-scan pool over a plain slice.
impl JobPool for [TrackedJob] {
    fn company_jobs(&self, company_id: &str) -> Vec<&TrackedJob> {
        let mut jobs: Vec<&TrackedJob> = self.iter().filter(|j| j.company_id == company_id).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    fn identity_matches(&self, record: &RawRecord) -> Vec<&TrackedJob> {
        let source = record.source_key();
        let url = record.url_key();
        let mut jobs: Vec<&TrackedJob> = self
            .iter()
            .filter(|j| j.company_id == record.company_id)
            .filter(|j| {
                (source.is_some() && j.source_key() == source) || (url.is_some() && j.url_key() == url)
            })
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }
}
