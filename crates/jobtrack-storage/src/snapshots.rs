//! Point-in-time copies of the live collection, with rotation and restore.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::schema::decode_collection;
use crate::{atomic_write, is_temp_name, sync_dir, write_synced_temp, JobStore, StoreError};

const SNAPSHOT_PREFIX: &str = "jobs-v1-";
const SNAPSHOT_SUFFIX: &str = ".json";

/// High-water mark of issued sequence numbers, kept beside the snapshots.
const SEQUENCE_FILE: &str = "snapshot-sequence";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no live collection at {0} to snapshot")]
    NoLiveFile(PathBuf),
    #[error("snapshot {0} does not exist")]
    NotFound(String),
    #[error("{0:?} is not a snapshot name")]
    InvalidName(String),
    #[error("snapshot {name} failed validation: {reason}")]
    Invalid { name: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub sequence: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub entry: SnapshotEntry,
    pub byte_size: u64,
    pub sha256: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub job_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: String,
    /// Snapshot of the live state taken just before the restore, if one existed.
    pub backup: Option<SnapshotEntry>,
}

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    live_path: PathBuf,
    snapshot_dir: PathBuf,
    retention: usize,
}

impl SnapshotManager {
    pub fn new(live_path: PathBuf, snapshot_dir: PathBuf, retention: usize) -> Self {
        Self {
            live_path,
            snapshot_dir,
            retention: retention.max(1),
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// `jobs-v1-<seq>-<utc stamp>.json`; the zero-padded sequence keeps
    /// lexical and chronological order identical.
    pub fn snapshot_name(sequence: u64, now: DateTime<Utc>) -> String {
        format!(
            "{SNAPSHOT_PREFIX}{sequence:08}-{}{SNAPSHOT_SUFFIX}",
            now.format("%Y%m%dT%H%M%SZ")
        )
    }

    pub fn parse_sequence(name: &str) -> Option<u64> {
        let rest = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_suffix(SNAPSHOT_SUFFIX)?;
        let (sequence, stamp) = rest.split_once('-')?;
        if sequence.len() < 8 || stamp.is_empty() {
            return None;
        }
        sequence.parse().ok()
    }

    /// Copy the live file under the next free sequence number, then rotate.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<SnapshotEntry, SnapshotError> {
        let bytes = match fs::read(&self.live_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::NoLiveFile(self.live_path.clone()))
            }
            Err(err) => return Err(SnapshotError::io(&self.live_path, err)),
        };

        fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(|err| SnapshotError::io(&self.snapshot_dir, err))?;

        let mut sequence = self.next_sequence().await?;
        let staging_name = Self::snapshot_name(sequence, now);
        let temp_path = write_synced_temp(&self.snapshot_dir.join(staging_name), &bytes).await?;
        let linked = loop {
            let name = Self::snapshot_name(sequence, now);
            let path = self.snapshot_dir.join(&name);
            // hard_link never overwrites, so a taken name bumps the sequence
            // and the final name only ever appears with complete contents.
            match fs::hard_link(&temp_path, &path).await {
                Ok(()) => break Ok(SnapshotEntry { name, sequence, path }),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => sequence += 1,
                Err(err) => break Err(SnapshotError::io(&path, err)),
            }
        };
        let _ = fs::remove_file(&temp_path).await;
        let entry = linked?;
        sync_dir(&self.snapshot_dir)
            .await
            .map_err(|err| SnapshotError::io(&self.snapshot_dir, err))?;
        if let Err(err) = self.record_sequence(entry.sequence).await {
            warn!(error = %err, snapshot = %entry.name, "could not persist snapshot sequence marker");
        }
        info!(snapshot = %entry.name, bytes = bytes.len(), "created snapshot");

        match self.rotate().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, retention = self.retention, "rotated old snapshots"),
            Err(err) => warn!(error = %err, snapshot = %entry.name, "snapshot written but rotation failed"),
        }
        Ok(entry)
    }

    /// One past the highest sequence ever issued, whether or not that snapshot
    /// is still retained.
    async fn next_sequence(&self) -> Result<u64, SnapshotError> {
        let listed = self.list().await?.first().map_or(0, |newest| newest.sequence);
        Ok(listed.max(self.issued_sequence().await?) + 1)
    }

    async fn issued_sequence(&self) -> Result<u64, SnapshotError> {
        let path = self.snapshot_dir.join(SEQUENCE_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.display(), "unreadable snapshot sequence marker; using listed snapshots");
                0
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(SnapshotError::io(&path, err)),
        }
    }

    async fn record_sequence(&self, sequence: u64) -> Result<(), SnapshotError> {
        let path = self.snapshot_dir.join(SEQUENCE_FILE);
        atomic_write(&path, sequence.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Delete the oldest snapshots beyond the retention count.
    pub async fn rotate(&self) -> Result<usize, SnapshotError> {
        let snapshots = self.list().await?;
        let mut removed = 0;
        for stale in snapshots.iter().skip(self.retention) {
            fs::remove_file(&stale.path)
                .await
                .map_err(|err| SnapshotError::io(&stale.path, err))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Retained snapshots, newest first.
    pub async fn list(&self) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        let mut dir = match fs::read_dir(&self.snapshot_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SnapshotError::io(&self.snapshot_dir, err)),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| SnapshotError::io(&self.snapshot_dir, err))?
        {
            let name = item.file_name().to_string_lossy().into_owned();
            if is_temp_name(&name) {
                continue;
            }
            if let Some(sequence) = Self::parse_sequence(&name) {
                entries.push(SnapshotEntry {
                    path: item.path(),
                    name,
                    sequence,
                });
            }
        }
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    pub async fn info(&self, name: &str) -> Result<SnapshotInfo, SnapshotError> {
        let (entry, bytes) = self.read_snapshot(name).await?;
        let collection = decode_collection(&bytes).map_err(|err| SnapshotError::Invalid {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(SnapshotInfo {
            entry,
            byte_size: bytes.len() as u64,
            sha256: JobStore::sha256_hex(&bytes),
            version: collection.version,
            generated_at: collection.generated_at,
            job_count: collection.job_count,
        })
    }

    /// Replace the live file with a validated snapshot. The current live state
    /// is snapshotted first so the restore can itself be undone.
    pub async fn restore(&self, name: &str, now: DateTime<Utc>) -> Result<RestoreOutcome, SnapshotError> {
        let (_, bytes) = self.read_snapshot(name).await?;
        decode_collection(&bytes).map_err(|err| SnapshotError::Invalid {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

        let backup = match self.snapshot(now).await {
            Ok(entry) => Some(entry),
            Err(SnapshotError::NoLiveFile(_)) => None,
            Err(err) => return Err(err),
        };

        atomic_write(&self.live_path, &bytes).await?;
        info!(
            snapshot = name,
            backup = backup.as_ref().map(|b| b.name.as_str()).unwrap_or("<none>"),
            "restored snapshot over live collection"
        );
        Ok(RestoreOutcome {
            restored: name.to_string(),
            backup,
        })
    }

    /// Validate every retained snapshot and delete the ones that fail.
    pub async fn cleanup_corrupted(&self) -> Result<usize, SnapshotError> {
        let mut removed = 0;
        for entry in self.list().await? {
            let bytes = fs::read(&entry.path)
                .await
                .map_err(|err| SnapshotError::io(&entry.path, err))?;
            if let Err(err) = decode_collection(&bytes) {
                warn!(snapshot = %entry.name, error = %err, "removing corrupted snapshot");
                fs::remove_file(&entry.path)
                    .await
                    .map_err(|err| SnapshotError::io(&entry.path, err))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn read_snapshot(&self, name: &str) -> Result<(SnapshotEntry, Vec<u8>), SnapshotError> {
        let sequence =
            Self::parse_sequence(name).ok_or_else(|| SnapshotError::InvalidName(name.to_string()))?;
        if name.contains(['/', '\\']) {
            return Err(SnapshotError::InvalidName(name.to_string()));
        }
        let path = self.snapshot_dir.join(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok((
                SnapshotEntry {
                    name: name.to_string(),
                    sequence,
                    path,
                },
                bytes,
            )),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SnapshotError::NotFound(name.to_string()))
            }
            Err(err) => Err(SnapshotError::io(&path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{collection_with, ts};
    use crate::StoreConfig;
    use tempfile::tempdir;

    fn store_in(root: &Path, retention: usize) -> JobStore {
        JobStore::new(StoreConfig {
            data_dir: root.join("jobs"),
            snapshot_dir: root.join("versions"),
            snapshot_retention: retention,
        })
    }

    #[test]
    fn snapshot_names_parse_back_to_sequence() {
        let name = SnapshotManager::snapshot_name(42, ts(3));
        assert_eq!(name, "jobs-v1-00000042-20260503T090000Z.json");
        assert_eq!(SnapshotManager::parse_sequence(&name), Some(42));
        assert_eq!(SnapshotManager::parse_sequence("jobs-v1.json"), None);
        assert_eq!(SnapshotManager::parse_sequence(".jobs-v1-1.tmp"), None);
    }

    #[tokio::test]
    async fn snapshot_without_live_file_fails() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 5);
        assert!(matches!(
            store.snapshot(ts(1)).await,
            Err(SnapshotError::NoLiveFile(_))
        ));
    }

    #[tokio::test]
    async fn snapshots_are_monotonic_even_within_one_second() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 5);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");

        let first = store.snapshot(ts(1)).await.expect("first");
        let second = store.snapshot(ts(1)).await.expect("second");
        assert!(second.sequence > first.sequence);
        assert_ne!(first.name, second.name);
        assert!(second.name > first.name);
    }

    #[tokio::test]
    async fn rotation_failure_does_not_fail_the_snapshot() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 1);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");

        // A directory under a snapshot name cannot be removed with remove_file.
        let versions = dir.path().join("versions");
        std::fs::create_dir_all(versions.join(SnapshotManager::snapshot_name(1, ts(1)))).unwrap();

        let entry = store.snapshot(ts(2)).await.expect("snapshot despite rotation error");
        assert_eq!(entry.sequence, 2);
        assert!(decode_collection(&std::fs::read(&entry.path).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn snapshot_dir_holds_only_complete_snapshots() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 5);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");
        store.snapshot(ts(1)).await.expect("first");
        store.snapshot(ts(2)).await.expect("second");

        for item in std::fs::read_dir(dir.path().join("versions")).unwrap() {
            let item = item.unwrap();
            let name = item.file_name().to_string_lossy().into_owned();
            if name == SEQUENCE_FILE {
                continue;
            }
            assert!(!is_temp_name(&name), "leftover temp file {name}");
            let bytes = std::fs::read(item.path()).unwrap();
            assert!(decode_collection(&bytes).is_ok(), "{name} is not a complete snapshot");
        }
    }

    #[tokio::test]
    async fn sequence_keeps_climbing_after_cleanup_empties_the_dir() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 5);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");
        let first = store.snapshot(ts(1)).await.expect("first");
        let second = store.snapshot(ts(2)).await.expect("second");
        std::fs::write(&first.path, b"garbage").unwrap();
        std::fs::write(&second.path, b"garbage").unwrap();

        assert_eq!(store.cleanup_corrupted().await.expect("cleanup"), 2);
        assert!(store.list_snapshots().await.expect("list").is_empty());

        let third = store.snapshot(ts(3)).await.expect("third");
        assert_eq!(third.sequence, 3);
    }

    #[tokio::test]
    async fn rotation_keeps_only_most_recent() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 3);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");
        for day in 1..=5 {
            store.snapshot(ts(day)).await.expect("snapshot");
        }

        let kept = store.list_snapshots().await.expect("list");
        assert_eq!(
            kept.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![5, 4, 3]
        );
    }

    #[tokio::test]
    async fn restore_snapshots_live_state_first_and_is_reversible() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 10);
        let original = collection_with(&["Analyst"], 1);
        store.save(&original).await.expect("save");
        let saved = store.snapshot(ts(1)).await.expect("snapshot");

        let newer = collection_with(&["Analyst", "Data Engineer"], 2);
        store.save(&newer).await.expect("save newer");

        let outcome = store.restore_snapshot(&saved.name, ts(2)).await.expect("restore");
        assert_eq!(store.load().await.expect("load"), original);

        let backup = outcome.backup.expect("live state backed up");
        store.restore_snapshot(&backup.name, ts(3)).await.expect("undo");
        assert_eq!(store.load().await.expect("load"), newer);
    }

    #[tokio::test]
    async fn restore_refuses_invalid_snapshot_and_leaves_live_file() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 10);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");
        let live_before = std::fs::read(store.live_path()).unwrap();

        let bogus = SnapshotManager::snapshot_name(9, ts(1));
        std::fs::create_dir_all(dir.path().join("versions")).unwrap();
        std::fs::write(dir.path().join("versions").join(&bogus), b"not json").unwrap();

        let err = store.restore_snapshot(&bogus, ts(2)).await.expect_err("invalid");
        assert!(matches!(err, SnapshotError::Invalid { .. }));
        assert_eq!(std::fs::read(store.live_path()).unwrap(), live_before);
        assert!(matches!(
            store.restore_snapshot("../jobs/jobs-v1.json", ts(2)).await,
            Err(SnapshotError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_only_corrupted_snapshots() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 10);
        store.save(&collection_with(&["Analyst"], 1)).await.expect("save");
        let good = store.snapshot(ts(1)).await.expect("snapshot");

        let broken = dir.path().join("versions").join(SnapshotManager::snapshot_name(7, ts(1)));
        std::fs::write(&broken, b"{\"version\": \"9.0.0\"}").unwrap();

        assert_eq!(store.cleanup_corrupted().await.expect("cleanup"), 1);
        assert!(!broken.exists());
        assert!(good.path.exists());
    }

    #[tokio::test]
    async fn info_reports_digest_and_counts() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path(), 10);
        let receipt = store
            .save(&collection_with(&["Analyst", "Designer"], 4))
            .await
            .expect("save");
        let entry = store.snapshot(ts(4)).await.expect("snapshot");

        let info = store.snapshot_info(&entry.name).await.expect("info");
        assert_eq!(info.job_count, 2);
        assert_eq!(info.sha256, receipt.sha256);
        assert_eq!(info.generated_at, ts(4));
    }
}
