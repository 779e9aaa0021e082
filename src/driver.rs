// src/driver.rs

//! Workflow turn orchestration (spec §2, SPEC_FULL §4.8): the one-turn
//! control flow that uses every other component. `WorkItemSource` and
//! `TurnExecutor` are the seam between the core and the work-item
//! repository / AI-agent adapter, both explicitly out-of-scope
//! collaborators (spec §1).
//!
//! Grounded on the teacher's `TransactionEngine::begin` lock-then-work
//! sequencing, adapted to the run-lock/state-lock pair spec §2 describes.

use crate::config::Config;
use crate::error::{CancelToken, Error, Result};
use crate::lock::LockService;
use crate::metrics::MetricsCollector;
use crate::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;

pub const RUN_LOCK_ID: &str = "system-runlock";

/// Opaque reference to a work item, handed back by [`WorkItemSource`]
/// and consumed by [`TurnExecutor`]. The core never interprets its
/// fields beyond using `id` as the state-lock's `lock_type` key.
#[derive(Debug, Clone)]
pub struct WorkItemRef {
    pub id: String,
}

/// The work-item repository collaborator (spec §1: out of scope, an
/// external relational store).
pub trait WorkItemSource {
    fn next_ready(&self) -> Result<Option<WorkItemRef>>;
}

/// The AI-agent invocation adapter collaborator (spec §1: out of scope).
/// Implementations stage whatever files the turn produces into `txn`
/// and leave marking intent / committing to the driver.
pub trait TurnExecutor {
    fn execute(&self, item: &WorkItemRef, txn: &mut Transaction) -> Result<()>;
}

/// Aggregate owned by the process for the lifetime of a `run` invocation
/// (spec §9: model the metrics collector and logger as explicit fields
/// rather than global mutable state).
pub struct Driver {
    pub config: Config,
    pub locks: Arc<LockService>,
    pub metrics: Arc<MetricsCollector>,
}

/// Why a turn produced no work or failed outright.
#[derive(Debug)]
pub enum TurnOutcome {
    /// No ready work item was available.
    Idle,
    /// A turn committed successfully.
    Committed { item_id: String, txn_id: String },
    /// The per-item state lock was contested; caller should move on.
    StateLockContended { item_id: String },
}

impl Driver {
    pub fn new(config: Config, locks: Arc<LockService>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            locks,
            metrics,
        }
    }

    /// Acquire the process-singleton run lock, stealing a stale holder's
    /// lock once if its PID isn't live (spec §4.5 contention policy).
    /// Returns `Err(Error::Cancelled)` when the lock is genuinely
    /// contested by a live process — the caller maps this to the
    /// documented non-zero exit / interactive prompt. Also returns
    /// `Err(Error::Cancelled)` if `cancel` fires first (spec §5).
    pub fn acquire_run_lock(&self, cancel: CancelToken) -> Result<()> {
        match self.locks.acquire_run_lock_with_steal(
            RUN_LOCK_ID,
            self.config.lock.default_ttl,
            cancel,
        )? {
            Some(_) => Ok(()),
            None => Err(Error::Cancelled(format!(
                "run lock {RUN_LOCK_ID} is held by another live process"
            ))),
        }
    }

    pub fn release_run_lock(&self) -> Result<()> {
        self.locks.release_run_lock(RUN_LOCK_ID)
    }

    /// Drive exactly one turn: pick a work item, acquire its state lock,
    /// stage + commit a transaction via `executor`, release the state
    /// lock (spec §2's control-flow description).
    pub fn run_one_turn(
        &self,
        source: &dyn WorkItemSource,
        executor: &dyn TurnExecutor,
        journal: &mut dyn crate::journal::JournalAppend,
        cancel: CancelToken,
    ) -> Result<TurnOutcome> {
        let item = match source.next_ready()? {
            Some(item) => item,
            None => return Ok(TurnOutcome::Idle),
        };

        let lock_type = format!("sbi:{}", item.id);
        let acquired = self.locks.acquire_state_lock(
            RUN_LOCK_ID,
            &lock_type,
            self.config.lock.default_ttl,
            cancel,
        )?;
        if acquired.is_none() {
            return Ok(TurnOutcome::StateLockContended { item_id: item.id });
        }

        let result = self.run_turn_body(&item, executor, journal, cancel);

        if let Err(e) = self.locks.release_state_lock(RUN_LOCK_ID, &lock_type) {
            tracing::warn!(item_id = %item.id, error = %e, "failed to release state lock");
        }

        result
    }

    fn run_turn_body(
        &self,
        item: &WorkItemRef,
        executor: &dyn TurnExecutor,
        journal: &mut dyn crate::journal::JournalAppend,
        cancel: CancelToken,
    ) -> Result<TurnOutcome> {
        let mut txn = Transaction::begin(&self.config.txn_root(), cancel)?;

        if let Err(e) = executor.execute(item, &mut txn) {
            tracing::warn!(item_id = %item.id, txn_id = %txn.id, error = %e, "turn execution failed before intent");
            let _ = txn.rollback("turn execution failed");
            self.metrics.incr_commit_failed();
            return Err(e);
        }

        if let Err(e) = txn.mark_intent() {
            let _ = txn.rollback("mark_intent failed");
            self.metrics.incr_commit_failed();
            return Err(e);
        }

        let txn_id = txn.id.clone();
        let mut callback = |id: &str| journal.append(id);
        let dest_root = self.config.dest_root.clone();
        let mut cb = || callback(&txn_id);
        match txn.commit(&dest_root, Some(&mut cb), cancel) {
            Ok(()) => {
                self.metrics.incr_commit_success();
                Ok(TurnOutcome::Committed {
                    item_id: item.id.clone(),
                    txn_id: txn.id,
                })
            }
            Err(e) => {
                tracing::warn!(item_id = %item.id, txn_id = %txn.id, error = %e, "commit failed; left for recovery");
                self.metrics.incr_commit_failed();
                Err(e)
            }
        }
    }
}

/// Run the Recovery Engine (spec §4.4), honoring
/// [`crate::config::ENV_DISABLE_RECOVERY`]. Must be called before any
/// lock is acquired.
pub fn recover_at_startup(
    config: &Config,
    metrics: &MetricsCollector,
    cancel: CancelToken,
) -> std::io::Result<()> {
    if config.disable_recovery {
        tracing::info!("recovery disabled via environment override");
        return Ok(());
    }
    let report = crate::recovery::run(&config.txn_root(), &config.dest_root, &config.recovery, cancel)?;
    for _ in 0..report.forward_success + report.forward_failed {
        metrics.incr_recovery_count();
    }
    Ok(())
}

/// Sleep between turns, clamped to the `run` command's documented range
/// (spec §6: `--interval <duration, 1s..10m>`).
pub fn clamp_interval(requested: Duration) -> Duration {
    requested.clamp(Duration::from_secs(1), Duration::from_secs(600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::NdjsonJournal;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OneShotSource {
        items: Mutex<Vec<WorkItemRef>>,
    }

    impl WorkItemSource for OneShotSource {
        fn next_ready(&self) -> Result<Option<WorkItemRef>> {
            Ok(self.items.lock().unwrap().pop())
        }
    }

    struct StageOneFile;

    impl TurnExecutor for StageOneFile {
        fn execute(&self, _item: &WorkItemRef, txn: &mut Transaction) -> Result<()> {
            txn.stage_file(
                crate::transaction::OperationType::Create,
                std::path::Path::new("out.txt"),
                b"turn output",
                0o644,
            )
        }
    }

    fn driver(home: &std::path::Path) -> Driver {
        let config = Config::at(home);
        config.ensure_layout().unwrap();
        let locks = Arc::new(LockService::open(&config.lock_db_path()).unwrap());
        let metrics = Arc::new(MetricsCollector::new(config.metrics_path()));
        Driver::new(config, locks, metrics)
    }

    #[test]
    fn test_run_one_turn_idle_when_no_work() {
        let home = TempDir::new().unwrap();
        let driver = driver(home.path());
        let source = OneShotSource {
            items: Mutex::new(Vec::new()),
        };
        let mut journal = NdjsonJournal::new(home.path().join("journal.ndjson"));
        let outcome = driver
            .run_one_turn(&source, &StageOneFile, &mut journal, None)
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Idle));
    }

    #[test]
    fn test_run_one_turn_commits_and_publishes() {
        let home = TempDir::new().unwrap();
        let driver = driver(home.path());
        let source = OneShotSource {
            items: Mutex::new(vec![WorkItemRef { id: "sbi-1".to_string() }]),
        };
        let mut journal = NdjsonJournal::new(home.path().join("journal.ndjson"));
        let outcome = driver
            .run_one_turn(&source, &StageOneFile, &mut journal, None)
            .unwrap();

        match outcome {
            TurnOutcome::Committed { item_id, .. } => assert_eq!(item_id, "sbi-1"),
            other => panic!("expected Committed, got {other:?}"),
        }
        assert_eq!(
            std::fs::read(driver.config.dest_root.join("out.txt")).unwrap(),
            b"turn output"
        );
        assert_eq!(driver.metrics.snapshot().commit_success, 1);

        let ids = crate::journal::read_txn_ids(&home.path().join("journal.ndjson")).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_state_lock_contention_reported_not_errored() {
        let home = TempDir::new().unwrap();
        let driver = driver(home.path());
        driver
            .locks
            .acquire_state_lock(RUN_LOCK_ID, "sbi:sbi-1", Duration::from_secs(60), None)
            .unwrap();

        let source = OneShotSource {
            items: Mutex::new(vec![WorkItemRef { id: "sbi-1".to_string() }]),
        };
        let mut journal = NdjsonJournal::new(home.path().join("journal.ndjson"));
        let outcome = driver
            .run_one_turn(&source, &StageOneFile, &mut journal, None)
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::StateLockContended { .. }));
    }

    #[test]
    fn test_clamp_interval_bounds() {
        assert_eq!(clamp_interval(Duration::from_millis(1)), Duration::from_secs(1));
        assert_eq!(clamp_interval(Duration::from_secs(9999)), Duration::from_secs(600));
        assert_eq!(clamp_interval(Duration::from_secs(30)), Duration::from_secs(30));
    }
}
