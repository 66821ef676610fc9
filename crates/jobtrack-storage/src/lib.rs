//! Durable, schema-validated job collection storage with rotated snapshots.

pub mod schema;
pub mod snapshots;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use jobtrack_core::JobCollection;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use schema::{decode_collection, validate_collection, DecodeError, SchemaError, SchemaViolation};
pub use snapshots::{RestoreOutcome, SnapshotEntry, SnapshotError, SnapshotInfo, SnapshotManager};

pub const CRATE_NAME: &str = "jobtrack-storage";

/// File name of the live collection, keyed by container major version.
pub const LIVE_FILE_NAME: &str = "jobs-v1.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection at {path} is unreadable or corrupt: {reason}")]
    Integrity { path: PathBuf, reason: String },
    #[error("refusing to write {path}: {source}")]
    SchemaValidation {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("serializing collection: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub snapshot_retention: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub path: PathBuf,
    pub job_count: usize,
    pub byte_size: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    live_path: PathBuf,
    snapshots: SnapshotManager,
}

impl JobStore {
    pub fn new(config: StoreConfig) -> Self {
        let live_path = config.data_dir.join(LIVE_FILE_NAME);
        let snapshots =
            SnapshotManager::new(live_path.clone(), config.snapshot_dir, config.snapshot_retention);
        Self {
            live_path,
            snapshots,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Load the live collection; a missing file is an empty first-run collection.
    pub async fn load(&self) -> Result<JobCollection, StoreError> {
        let bytes = match fs::read(&self.live_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.live_path.display(), "no existing job collection, starting empty");
                return Ok(JobCollection::empty(DateTime::<Utc>::default()));
            }
            Err(err) => {
                return Err(StoreError::Integrity {
                    path: self.live_path.clone(),
                    reason: format!("read failed: {err}"),
                })
            }
        };

        let collection = decode_collection(&bytes).map_err(|err| StoreError::Integrity {
            path: self.live_path.clone(),
            reason: err.to_string(),
        })?;
        info!(
            path = %self.live_path.display(),
            jobs = collection.job_count,
            version = %collection.version,
            "loaded job collection"
        );
        Ok(collection)
    }

    /// Validate, then atomically replace the live collection.
    pub async fn save(&self, collection: &JobCollection) -> Result<SaveReceipt, StoreError> {
        self.stage(collection).await?.commit().await
    }

    /// First half of a save: validate and write a synced temp file beside the
    /// live file. Nothing is visible to readers until [`StagedWrite::commit`].
    pub async fn stage(&self, collection: &JobCollection) -> Result<StagedWrite, StoreError> {
        validate_collection(collection).map_err(|source| {
            warn!(
                path = %self.live_path.display(),
                violations = source.violations.len(),
                "collection failed schema validation; write refused"
            );
            StoreError::SchemaValidation {
                path: self.live_path.clone(),
                source,
            }
        })?;

        let bytes = serde_json::to_vec_pretty(collection)?;
        let temp_path = write_synced_temp(&self.live_path, &bytes).await?;
        debug!(temp = %temp_path.display(), bytes = bytes.len(), "staged collection write");
        Ok(StagedWrite {
            temp_path,
            destination: self.live_path.clone(),
            job_count: collection.job_count,
            sha256: Self::sha256_hex(&bytes),
            byte_size: bytes.len(),
        })
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<SnapshotEntry, SnapshotError> {
        self.snapshots.snapshot(now).await
    }

    pub async fn restore_snapshot(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<RestoreOutcome, SnapshotError> {
        self.snapshots.restore(name, now).await
    }

    pub async fn cleanup_corrupted(&self) -> Result<usize, SnapshotError> {
        self.snapshots.cleanup_corrupted().await
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        self.snapshots.list().await
    }

    pub async fn snapshot_info(&self, name: &str) -> Result<SnapshotInfo, SnapshotError> {
        self.snapshots.info(name).await
    }
}

/// A fully written, fsynced temp file waiting to be renamed over its destination.
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    destination: PathBuf,
    job_count: usize,
    sha256: String,
    byte_size: usize,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn commit(self) -> Result<SaveReceipt, StoreError> {
        replace_with_temp(&self.temp_path, &self.destination).await?;
        info!(
            path = %self.destination.display(),
            jobs = self.job_count,
            bytes = self.byte_size,
            "saved job collection"
        );
        Ok(SaveReceipt {
            path: self.destination,
            job_count: self.job_count,
            byte_size: self.byte_size,
            sha256: self.sha256,
        })
    }

    pub async fn abort(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }
}

/// Temp files start with a dot so listings and loaders never pick them up.
pub(crate) fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

pub(crate) async fn write_synced_temp(destination: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|err| StoreError::io(parent, err))?;

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collection".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|err| StoreError::io(&temp_path, err))?;

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(&temp_path, err));
    }
    Ok(temp_path)
}

pub(crate) async fn replace_with_temp(temp_path: &Path, destination: &Path) -> Result<(), StoreError> {
    if let Err(err) = fs::rename(temp_path, destination).await {
        let _ = fs::remove_file(temp_path).await;
        return Err(StoreError::io(destination, err));
    }
    if let Some(parent) = destination.parent() {
        sync_dir(parent).await.map_err(|err| StoreError::io(parent, err))?;
    }
    Ok(())
}

pub(crate) async fn atomic_write(destination: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp_path = write_synced_temp(destination, bytes).await?;
    replace_with_temp(&temp_path, destination).await
}

#[cfg(unix)]
pub(crate) async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
pub(crate) async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
