// src/recovery.rs

//! Recovery Engine (spec §4.4): runs once at process start, before any
//! lock is acquired, and drives every partial transaction to a terminal
//! state.
//!
//! Grounded on the teacher's `recover_all`/`recover_single` dispatch
//! shape (`examples/ConaryLabs-Conary/src/transaction/recovery.rs`); the
//! retry/backoff state machine is new, since the teacher's recovery is a
//! one-shot roll-forward/rollback rather than a retrying one.

use crate::config::RecoveryConfig;
use crate::error::{check_cancelled, CancelToken, Error};
use crate::scanner::{self, ScanResult};
use crate::transaction::Transaction;
use std::path::Path;
use std::time::{Duration, Instant};

/// Outcome of forward-recovering a single `intent_only` transaction.
#[derive(Debug)]
pub enum RecoveryOutcome {
    RolledForward { txn_id: String },
    Failed { txn_id: String, error: Error },
    TimedOut { txn_id: String },
}

/// Aggregate report for one recovery pass (spec §4.4 step 6).
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub scan: ScanResult,
    pub forward_success: usize,
    pub forward_failed: usize,
    pub cleanup_success: usize,
    pub cleanup_failed: usize,
    pub duration: Duration,
    pub outcomes: Vec<RecoveryOutcome>,
}

fn backoff_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let scaled = config.backoff_base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(config.backoff_max)
}

/// Attempt to forward-recover one `intent_only` transaction, retrying
/// with exponential backoff up to `config.max_retries`. Per-transaction
/// timeout is enforced by measuring wall-clock elapsed around each
/// attempt: Rust's synchronous filesystem calls can't be preempted
/// mid-syscall, so a timed-out attempt is recorded (and retried, budget
/// permitting) rather than forcibly killed. `cancel` is polled before
/// each attempt and propagated into `commit` for the per-step checks.
fn recover_one(
    txn_root: &Path,
    dest_root: &Path,
    id: &str,
    config: &RecoveryConfig,
    cancel: CancelToken,
) -> RecoveryOutcome {
    let mut attempt = 0u32;
    loop {
        if let Err(e) = check_cancelled(cancel) {
            return RecoveryOutcome::Failed { txn_id: id.to_string(), error: e };
        }

        let started = Instant::now();
        let result =
            Transaction::load(txn_root, id).and_then(|mut tx| tx.commit(dest_root, None, cancel));
        let elapsed = started.elapsed();

        match result {
            Ok(()) => return RecoveryOutcome::RolledForward { txn_id: id.to_string() },
            Err(error) if elapsed >= config.per_txn_timeout => {
                tracing::warn!(txn_id = id, ?elapsed, "forward recovery attempt timed out");
                if attempt >= config.max_retries {
                    return RecoveryOutcome::TimedOut { txn_id: id.to_string() };
                }
                let _ = error;
            }
            Err(error) => {
                if attempt >= config.max_retries {
                    return RecoveryOutcome::Failed { txn_id: id.to_string(), error };
                }
                tracing::warn!(
                    txn_id = id, attempt, error = %error,
                    "forward recovery attempt failed, retrying"
                );
            }
        }

        std::thread::sleep(backoff_delay(config, attempt));
        attempt += 1;
    }
}

/// Run one recovery pass: scan, forward-recover every `intent_only`
/// transaction, and remove every `committed` one (after re-checking the
/// commit marker is still present). `incomplete` and `abandoned`
/// transactions are logged only, per the operator-visibility policy.
///
/// Recovery is idempotent: re-running it after a partial recovery
/// converges without duplicating work, because `Commit`'s idempotency
/// gate (spec §4.1 step 2) makes re-committing an already-committed
/// transaction a no-op. `cancel` (spec §5) is checked before each
/// transaction; a cancellation mid-pass leaves the remainder for the
/// next run, same as hitting `total_timeout`.
pub fn run(
    txn_root: &Path,
    dest_root: &Path,
    config: &RecoveryConfig,
    cancel: CancelToken,
) -> std::io::Result<RecoveryReport> {
    let start = Instant::now();
    let mut report = RecoveryReport::default();

    let scan = scanner::scan(txn_root)?;
    scan.log_summary();

    for id in &scan.intent_only {
        if check_cancelled(cancel).is_err() {
            tracing::info!("recovery cancelled; leaving remaining transactions for next run");
            break;
        }
        if start.elapsed() >= config.total_timeout {
            tracing::warn!(
                remaining = scan.intent_only.len() - report.outcomes.len(),
                "recovery total timeout reached; leaving remaining transactions for next run"
            );
            break;
        }

        let outcome = recover_one(txn_root, dest_root, id, config, cancel);
        match &outcome {
            RecoveryOutcome::RolledForward { .. } => report.forward_success += 1,
            RecoveryOutcome::Failed { .. } | RecoveryOutcome::TimedOut { .. } => {
                report.forward_failed += 1
            }
        }
        report.outcomes.push(outcome);
    }

    for id in &scan.committed {
        let dir = txn_root.join(id);
        if !dir.join("status.commit").exists() {
            // Raced with something else removing the marker between scan
            // and cleanup; never remove without re-confirming it.
            continue;
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => report.cleanup_success += 1,
            Err(e) => {
                tracing::warn!(txn_id = id, error = %e, "failed to clean up committed transaction");
                report.cleanup_failed += 1;
            }
        }
    }

    if !scan.incomplete.is_empty() || !scan.abandoned.is_empty() {
        tracing::info!(
            incomplete = scan.incomplete.len(),
            abandoned = scan.abandoned.len(),
            "incomplete/abandoned transactions left for operator inspection"
        );
    }

    report.duration = start.elapsed();
    report.scan = scan;
    tracing::info!(
        forward_success = report.forward_success,
        forward_failed = report.forward_failed,
        cleanup_success = report.cleanup_success,
        cleanup_failed = report.cleanup_failed,
        duration_ms = report.duration.as_millis() as u64,
        "recovery complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::OperationType;
    use std::path::Path;
    use tempfile::TempDir;

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            per_txn_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_recovery_is_noop_on_empty_root() {
        let root = TempDir::new().unwrap();
        let txn_root = root.path().join("txn");
        let dest_root = root.path().join("dest");
        let report = run(&txn_root, &dest_root, &config(), None).unwrap();
        assert_eq!(report.forward_success, 0);
        assert_eq!(report.scan.total, 0);
    }

    #[test]
    fn test_forward_recovers_intent_only_transaction() {
        let root = TempDir::new().unwrap();
        let txn_root = root.path().join("txn");
        let dest_root = root.path().join("dest");
        std::fs::create_dir_all(&txn_root).unwrap();

        let mut tx = Transaction::begin(&txn_root, None).unwrap();
        tx.stage_file(OperationType::Create, Path::new("a.txt"), b"hi", 0o644)
            .unwrap();
        tx.mark_intent().unwrap();

        let report = run(&txn_root, &dest_root, &config(), None).unwrap();
        assert_eq!(report.forward_success, 1);
        assert_eq!(report.forward_failed, 0);
        assert_eq!(fs_read(&dest_root.join("a.txt")), b"hi");
        assert!(txn_root.join(&tx.id).join("status.commit").exists());
    }

    #[test]
    fn test_cleans_up_committed_transactions() {
        let root = TempDir::new().unwrap();
        let txn_root = root.path().join("txn");
        let dest_root = root.path().join("dest");
        std::fs::create_dir_all(&txn_root).unwrap();

        let mut tx = Transaction::begin(&txn_root, None).unwrap();
        tx.stage_file(OperationType::Create, Path::new("a.txt"), b"hi", 0o644)
            .unwrap();
        tx.mark_intent().unwrap();
        tx.commit(&dest_root, None, None).unwrap();
        assert!(txn_root.join(&tx.id).exists());

        let report = run(&txn_root, &dest_root, &config(), None).unwrap();
        assert_eq!(report.cleanup_success, 1);
        assert!(!txn_root.join(&tx.id).exists());
    }

    #[test]
    fn test_recovery_is_idempotent_across_two_runs() {
        let root = TempDir::new().unwrap();
        let txn_root = root.path().join("txn");
        let dest_root = root.path().join("dest");
        std::fs::create_dir_all(&txn_root).unwrap();

        let mut tx = Transaction::begin(&txn_root, None).unwrap();
        tx.stage_file(OperationType::Create, Path::new("a.txt"), b"hi", 0o644)
            .unwrap();
        tx.mark_intent().unwrap();

        let first = run(&txn_root, &dest_root, &config(), None).unwrap();
        let second = run(&txn_root, &dest_root, &config(), None).unwrap();

        assert_eq!(first.forward_success, 1);
        // Second run sees it as already committed and cleans it up;
        // neither run duplicates the published file.
        assert_eq!(second.cleanup_success, 1);
        assert_eq!(fs_read(&dest_root.join("a.txt")), b"hi");
    }

    #[test]
    fn test_incomplete_and_abandoned_are_left_alone() {
        let root = TempDir::new().unwrap();
        let txn_root = root.path().join("txn");
        let dest_root = root.path().join("dest");
        std::fs::create_dir_all(txn_root.join("txn_1_1").join("stage")).unwrap();
        std::fs::create_dir_all(txn_root.join("txn_2_2")).unwrap();

        let report = run(&txn_root, &dest_root, &config(), None).unwrap();
        assert_eq!(report.scan.incomplete, vec!["txn_1_1"]);
        assert_eq!(report.scan.abandoned, vec!["txn_2_2"]);
        assert!(txn_root.join("txn_1_1").exists());
        assert!(txn_root.join("txn_2_2").exists());
    }

    fn fs_read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }
}
