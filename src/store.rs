//! Local persistence for snapshots and deployment job records.
//!
//! ```text
//! <state_dir>/
//!   snapshots/<device>/<timestamp>.cfg
//!   jobs/<device>/<job-id>.json
//! ```
//!
//! Snapshot files are immutable; a new capture never replaces an old one.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use confkit::{ConfigSnapshot, DeploymentJob};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SNAPSHOT_EXT: &str = "cfg";
const JOB_EXT: &str = "json";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const STAMP_PARSE: &str = "%Y%m%dT%H%M%S%.fZ";

/// Attempts at finding a free file name when two captures share a timestamp
const MAX_NAME_ATTEMPTS: i64 = 1000;

/// A stored snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size: u64,
}

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_dir(&self, device: &str) -> PathBuf {
        self.root.join("snapshots").join(device)
    }

    fn job_dir(&self, device: &str) -> PathBuf {
        self.root.join("jobs").join(device)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Write a snapshot to a new file named after its capture time.
    pub fn save_snapshot(&self, snapshot: &ConfigSnapshot) -> Result<PathBuf> {
        let dir = self.snapshot_dir(snapshot.device());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory: {}", dir.display()))?;

        let text = snapshot.text();
        let mut stamp = snapshot.captured_at();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(format!("{}.{SNAPSHOT_EXT}", stamp.format(STAMP_FORMAT)));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(text.as_bytes())
                        .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
                    log::debug!("Saved snapshot to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    stamp += Duration::microseconds(1);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create snapshot: {}", path.display()));
                }
            }
        }
        anyhow::bail!(
            "No free snapshot name for {} near {}",
            snapshot.device(),
            snapshot.captured_at()
        )
    }

    /// Stored snapshots of a device, oldest first.
    pub fn snapshots(&self, device: &str) -> Result<Vec<SnapshotEntry>> {
        let dir = self.snapshot_dir(device);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            let Some(captured_at) = parse_stamp(path) else {
                log::warn!("Ignoring unrecognized snapshot file {}", path.display());
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(SnapshotEntry {
                path: path.to_path_buf(),
                captured_at,
                size,
            });
        }
        Ok(entries)
    }

    pub fn latest_snapshot(&self, device: &str) -> Result<Option<ConfigSnapshot>> {
        let Some(entry) = self.snapshots(device)?.pop() else {
            return Ok(None);
        };
        let text = fs::read_to_string(&entry.path)
            .with_context(|| format!("Failed to read snapshot: {}", entry.path.display()))?;
        Ok(Some(ConfigSnapshot::from_text(device, entry.captured_at, &text)))
    }

    // ========================================================================
    // Job Records
    // ========================================================================

    pub fn save_job(&self, job: &DeploymentJob) -> Result<PathBuf> {
        let dir = self.job_dir(job.device());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create job directory: {}", dir.display()))?;

        let path = dir.join(format!("{}.{JOB_EXT}", job.id()));
        let content = serde_json::to_string_pretty(job).context("Failed to serialize job record")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write job record: {}", path.display()))?;

        log::debug!("Saved job record to {}", path.display());
        Ok(path)
    }

    /// Job record paths of a device, oldest first.
    pub fn jobs(&self, device: &str) -> Result<Vec<PathBuf>> {
        let dir = self.job_dir(device);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some(JOB_EXT) {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }

    pub fn latest_job(&self, device: &str) -> Result<Option<DeploymentJob>> {
        let Some(path) = self.jobs(device)?.pop() else {
            return Ok(None);
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read job record: {}", path.display()))?;
        let job = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job record: {}", path.display()))?;
        Ok(Some(job))
    }
}

fn parse_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, STAMP_PARSE)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(text: &str) -> ConfigSnapshot {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        ConfigSnapshot::from_text("core-1", at, text)
    }

    #[test]
    fn test_save_and_reload_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());

        let path = store.save_snapshot(&snapshot("hostname core-1\n")).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20260301T123000.000000Z.cfg"
        );

        let latest = store.latest_snapshot("core-1").unwrap().unwrap();
        assert_eq!(latest.lines(), ["hostname core-1"]);
        assert_eq!(latest.captured_at(), snapshot("").captured_at());
        assert_eq!(latest.checksum(), snapshot("hostname core-1\n").checksum());
    }

    #[test]
    fn test_same_timestamp_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());

        store.save_snapshot(&snapshot("hostname a\n")).unwrap();
        store.save_snapshot(&snapshot("hostname b\n")).unwrap();

        let entries = store.snapshots("core-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].captured_at < entries[1].captured_at);
        let latest = store.latest_snapshot("core-1").unwrap().unwrap();
        assert_eq!(latest.lines(), ["hostname b"]);
    }

    #[test]
    fn test_unknown_device_has_no_history() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        assert!(store.snapshots("nope").unwrap().is_empty());
        assert!(store.latest_snapshot("nope").unwrap().is_none());
        assert!(store.latest_job("nope").unwrap().is_none());
    }

    #[test]
    fn test_job_record_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());

        let job = DeploymentJob::new("core-1", "hostname core-1\n", true);
        let path = store.save_job(&job).unwrap();
        assert!(path.starts_with(dir.path().join("jobs").join("core-1")));

        let loaded = store.latest_job("core-1").unwrap().unwrap();
        assert_eq!(loaded.id(), job.id());
        assert_eq!(loaded.state(), job.state());
        assert_eq!(loaded.target(), job.target());
    }
}
