// src/metrics.rs

//! Metrics & thresholds (spec §4.7): monotonic counters, cross-process
//! merge-by-max persistence, timestamped snapshots, and CI threshold
//! evaluation.
//!
//! The teacher has no module of this shape; the persistence pattern
//! (advisory-lock the file, read-merge-write, atomic rename) is
//! generalized from the same primitives `src/fsutil.rs` already exposes.

use crate::error::Result;
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub const SCHEMA_VERSION: u32 = 1;

/// On-disk / wire shape of the counters (spec §3 `Metrics`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub commit_success: u64,
    pub commit_failed: u64,
    pub cas_conflicts: u64,
    pub recovery_count: u64,
}

impl Counters {
    fn merge_max(self, other: Counters) -> Counters {
        Counters {
            commit_success: self.commit_success.max(other.commit_success),
            commit_failed: self.commit_failed.max(other.commit_failed),
            cas_conflicts: self.cas_conflicts.max(other.cas_conflicts),
            recovery_count: self.recovery_count.max(other.recovery_count),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsFile {
    pub schema_version: u32,
    #[serde(flatten)]
    pub counters: Counters,
    pub last_update: DateTime<Utc>,
}

/// Process-wide counter object, guarded by atomics (spec §5: increments
/// take the write lock briefly — here, each counter is its own atomic,
/// so increments never block each other).
#[derive(Default)]
pub struct MetricsCollector {
    commit_success: AtomicU64,
    commit_failed: AtomicU64,
    cas_conflicts: AtomicU64,
    recovery_count: AtomicU64,
    path: RwLock<Option<PathBuf>>,
}

impl MetricsCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: RwLock::new(Some(path.into())),
            ..Default::default()
        }
    }

    pub fn incr_commit_success(&self) {
        self.commit_success.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_commit_failed(&self) {
        self.commit_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_cas_conflicts(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_recovery_count(&self) {
        self.recovery_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Counters {
        Counters {
            commit_success: self.commit_success.load(Ordering::SeqCst),
            commit_failed: self.commit_failed.load(Ordering::SeqCst),
            cas_conflicts: self.cas_conflicts.load(Ordering::SeqCst),
            recovery_count: self.recovery_count.load(Ordering::SeqCst),
        }
    }

    /// Reset in-memory counters (used after a snapshot rotation).
    pub fn reset(&self) {
        self.commit_success.store(0, Ordering::SeqCst);
        self.commit_failed.store(0, Ordering::SeqCst);
        self.cas_conflicts.store(0, Ordering::SeqCst);
        self.recovery_count.store(0, Ordering::SeqCst);
    }

    /// Persist the in-memory snapshot to `path`, merged monotonically
    /// (max per counter) with whatever is already on disk (spec §4.7).
    pub fn save(&self, path: &Path) -> Result<()> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        fsutil::flock_exclusive(&lock_file)?;

        let on_disk = read_counters(path).unwrap_or_default();
        let merged = self.snapshot().merge_max(on_disk);

        let file = MetricsFile {
            schema_version: SCHEMA_VERSION,
            counters: merged,
            last_update: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fsutil::atomic_write(path, json.as_bytes())?;

        fsutil::flock_unlock(&lock_file)?;
        Ok(())
    }

    /// Snapshot to a timestamped file under `snapshot_dir`, optionally
    /// resetting in-memory counters afterward (a rotation).
    pub fn snapshot_to(&self, snapshot_dir: &Path, reset_after: bool) -> Result<PathBuf> {
        std::fs::create_dir_all(snapshot_dir)?;
        let now = Utc::now();
        let name = format!(
            "metrics_{}_{}.json",
            now.format("%Y%m%d_%H%M%S"),
            now.timestamp_subsec_nanos()
        );
        let path = snapshot_dir.join(name);

        let file = MetricsFile {
            schema_version: SCHEMA_VERSION,
            counters: self.snapshot(),
            last_update: now,
        };
        let json = serde_json::to_string_pretty(&file)?;
        fsutil::atomic_write(&path, json.as_bytes())?;

        if reset_after {
            self.reset();
        }
        Ok(path)
    }

    /// Delete snapshot files older than `max_age`.
    pub fn prune_snapshots(snapshot_dir: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
        let mut removed = 0;
        let entries = match std::fs::read_dir(snapshot_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if let Ok(modified) = metadata.modified() {
                if modified.elapsed().map(|age| age > max_age).unwrap_or(false) {
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Read the counters currently persisted at `path`, ignoring schema
/// version and timestamp. Returns `None` if the file is missing or
/// unparseable.
pub fn read_counters(path: &Path) -> Option<Counters> {
    let bytes = std::fs::read(path).ok()?;
    let file: MetricsFile = serde_json::from_slice(&bytes).ok()?;
    Some(file.counters)
}

/// CI threshold configuration (spec §4.7).
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub success_rate_threshold: f64,
    pub max_cas_conflicts: u64,
    pub max_recovery_count: u64,
    pub min_total_commits: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdReport {
    pub passed: bool,
    pub failed_checks: Vec<String>,
    pub warnings: Vec<String>,
}

/// Exit codes for the CI entrypoint (spec §6).
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAIL: i32 = 1;
pub const EXIT_WARN: i32 = 2;

impl ThresholdReport {
    pub fn exit_code(&self) -> i32 {
        if !self.passed {
            EXIT_FAIL
        } else if !self.warnings.is_empty() {
            EXIT_WARN
        } else {
            EXIT_OK
        }
    }
}

/// Evaluate `counters` against `config`, only once `min_total_commits`
/// has been reached.
pub fn evaluate_thresholds(counters: &Counters, config: &ThresholdConfig) -> ThresholdReport {
    if !config.enabled {
        return ThresholdReport {
            passed: true,
            ..Default::default()
        };
    }

    let total = counters.commit_success + counters.commit_failed;
    if total < config.min_total_commits {
        return ThresholdReport {
            passed: true,
            ..Default::default()
        };
    }

    let mut report = ThresholdReport {
        passed: true,
        ..Default::default()
    };

    let success_rate = if total == 0 {
        1.0
    } else {
        counters.commit_success as f64 / total as f64
    };
    if success_rate < config.success_rate_threshold {
        report.passed = false;
        report.failed_checks.push(format!(
            "success_rate {success_rate:.4} below threshold {:.4}",
            config.success_rate_threshold
        ));
    } else if success_rate < config.success_rate_threshold + 0.05 {
        report.warnings.push(format!(
            "success_rate {success_rate:.4} close to threshold {:.4}",
            config.success_rate_threshold
        ));
    }

    if counters.cas_conflicts > config.max_cas_conflicts {
        report.passed = false;
        report.failed_checks.push(format!(
            "cas_conflicts {} exceeds max {}",
            counters.cas_conflicts, config.max_cas_conflicts
        ));
    }

    if counters.recovery_count > config.max_recovery_count {
        report.passed = false;
        report.failed_checks.push(format!(
            "recovery_count {} exceeds max {}",
            counters.recovery_count, config.max_recovery_count
        ));
    }

    report
}
