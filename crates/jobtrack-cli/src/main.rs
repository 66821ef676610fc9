use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobtrack_core::normalize::{normalization_details, signature};
use jobtrack_core::{JobCollection, JobStatus, TrackingConfig};
use jobtrack_storage::{JobStore, RestoreOutcome, SnapshotEntry, SnapshotInfo, StoreConfig};
use jobtrack_sync::{CycleConfig, MatchConfig, Matcher, TrackingFile};
use serde_json::{json, Value};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobtrack-cli")]
#[command(about = "Job repost tracker command-line interface")]
struct Cli {
    /// Print machine-readable JSON instead of text summaries.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one tracking cycle over every enabled company.
    Sync,
    /// List retained snapshots, newest first.
    Snapshots,
    /// Show version, job count and digest of one snapshot.
    SnapshotInfo { name: String },
    /// Replace the live collection with a snapshot (the current state is snapshotted first).
    Restore { name: String },
    /// Delete snapshots that no longer validate.
    Cleanup,
    /// Load and validate the live collection.
    Validate,
    /// Show how two postings of one company normalize and score against each other.
    Explain {
        company: String,
        title_a: String,
        location_a: String,
        title_b: String,
        location_b: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = CycleConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let file = TrackingFile::load(&config.tracking_file).await?;
            let report = jobtrack_sync::CyclePipeline::from_config(&config, file)
                .run_once(Utc::now())
                .await?;
            if cli.json {
                print_json(&serde_json::to_value(&report)?)?;
            } else {
                println!(
                    "cycle complete: run_id={} jobs={} snapshot={}",
                    report.run_id,
                    report.total_jobs,
                    report.snapshot.as_deref().unwrap_or("-")
                );
                for company in &report.companies {
                    println!(
                        "  {:<20} fetched={} skipped={} new={} repost={} existing={} reopened={} missing={} closed={}",
                        company.company_id,
                        company.fetched,
                        company.skipped,
                        company.new,
                        company.repost,
                        company.existing,
                        company.reopened,
                        company.marked_missing,
                        company.closed
                    );
                }
            }
        }
        Commands::Snapshots => {
            let entries = store_for(&config).await?.list_snapshots().await?;
            if cli.json {
                print_json(&snapshot_list_json(&entries))?;
            } else {
                if entries.is_empty() {
                    println!("no snapshots in {}", config.snapshot_dir.display());
                }
                for entry in entries {
                    println!("{:>8}  {}", entry.sequence, entry.name);
                }
            }
        }
        Commands::SnapshotInfo { name } => {
            let info = store_for(&config).await?.snapshot_info(&name).await?;
            if cli.json {
                print_json(&snapshot_info_json(&info))?;
            } else {
                println!("name:         {}", info.entry.name);
                println!("version:      {}", info.version);
                println!("generated_at: {}", info.generated_at.to_rfc3339());
                println!("jobs:         {}", info.job_count);
                println!("bytes:        {}", info.byte_size);
                println!("sha256:       {}", info.sha256);
            }
        }
        Commands::Restore { name } => {
            let outcome = store_for(&config)
                .await?
                .restore_snapshot(&name, Utc::now())
                .await
                .with_context(|| format!("restoring snapshot {name}"))?;
            if cli.json {
                print_json(&restore_json(&outcome))?;
            } else {
                match outcome.backup {
                    Some(backup) => println!(
                        "restored {} (previous state saved as {})",
                        outcome.restored, backup.name
                    ),
                    None => println!("restored {}", outcome.restored),
                }
            }
        }
        Commands::Cleanup => {
            let removed = store_for(&config).await?.cleanup_corrupted().await?;
            if cli.json {
                print_json(&json!({ "removed": removed }))?;
            } else {
                println!("removed {removed} corrupted snapshot(s)");
            }
        }
        Commands::Validate => {
            let store = store_for(&config).await?;
            let collection = store.load().await?;
            if cli.json {
                print_json(&validate_json(store.live_path(), &collection))?;
            } else {
                println!(
                    "{} valid: version={} jobs={} active={} missing={} closed={}",
                    store.live_path().display(),
                    collection.version,
                    collection.job_count,
                    collection.count_by_status(JobStatus::Active),
                    collection.count_by_status(JobStatus::Missing),
                    collection.count_by_status(JobStatus::Closed)
                );
            }
        }
        Commands::Explain {
            company,
            title_a,
            location_a,
            title_b,
            location_b,
        } => {
            let threshold = tracking_or_default(&config.tracking_file).await.fuzzy_match_threshold;
            let left = signature(&company, &title_a, &location_a);
            let right = signature(&company, &title_b, &location_b);
            let explanation = Matcher::new(MatchConfig { threshold }).explain(&left, &right);
            if cli.json {
                let out = serde_json::json!({
                    "left": normalization_details(&title_a, &location_a),
                    "right": normalization_details(&title_b, &location_b),
                    "match": explanation,
                });
                print_json(&out)?;
            } else {
                println!("left:     {left}");
                println!("right:    {right}");
                println!("combined: {:.3} (threshold {:.2})", explanation.combined, explanation.threshold);
                println!("verdict:  {}", if explanation.is_match { "match" } else { "no match" });
                println!("reason:   {}", explanation.reason);
            }
        }
    }

    Ok(())
}

/// Classification settings from the tracking file, or the defaults when the
/// file is absent or unusable. A file that exists but fails to load is logged
/// at warn so a typo never silently changes thresholds.
async fn tracking_or_default(path: &Path) -> TrackingConfig {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "no tracking file; using default classification settings");
        return TrackingConfig::default();
    }
    match TrackingFile::load(path).await {
        Ok(file) => file.classification,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "tracking file is unusable; falling back to default classification settings"
            );
            TrackingConfig::default()
        }
    }
}

/// Store rooted at the configured directories; retention comes from the
/// tracking file when one is usable.
async fn store_for(config: &CycleConfig) -> Result<JobStore> {
    let retention = tracking_or_default(&config.tracking_file)
        .await
        .snapshot_retention_count;
    Ok(JobStore::new(StoreConfig {
        data_dir: config.data_dir.clone(),
        snapshot_dir: config.snapshot_dir.clone(),
        snapshot_retention: retention,
    }))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn entry_json(entry: &SnapshotEntry) -> Value {
    json!({
        "name": entry.name,
        "sequence": entry.sequence,
        "path": entry.path.display().to_string(),
    })
}

fn snapshot_list_json(entries: &[SnapshotEntry]) -> Value {
    Value::Array(entries.iter().map(entry_json).collect())
}

fn snapshot_info_json(info: &SnapshotInfo) -> Value {
    json!({
        "name": info.entry.name,
        "sequence": info.entry.sequence,
        "version": info.version,
        "generated_at": info.generated_at.to_rfc3339(),
        "job_count": info.job_count,
        "byte_size": info.byte_size,
        "sha256": info.sha256,
    })
}

fn restore_json(outcome: &RestoreOutcome) -> Value {
    json!({
        "restored": outcome.restored,
        "backup": outcome.backup.as_ref().map(entry_json),
    })
}

fn validate_json(live_path: &Path, collection: &JobCollection) -> Value {
    json!({
        "path": live_path.display().to_string(),
        "valid": true,
        "version": collection.version,
        "job_count": collection.job_count,
        "active": collection.count_by_status(JobStatus::Active),
        "missing": collection.count_by_status(JobStatus::Missing),
        "closed": collection.count_by_status(JobStatus::Closed),
    })
}
