// src/cli.rs

//! CLI surface (spec §6): `run`/`lock`/`doctor`. This is a thin
//! collaborator boundary over the core — it owns process exit codes and
//! operator-facing output, nothing else.

use crate::config::Config;
use crate::driver::{self, clamp_interval, Driver, TurnOutcome, WorkItemRef, WorkItemSource};
use crate::error::Error;
use crate::journal::NdjsonJournal;
use crate::lock::LockService;
use crate::metrics::{MetricsCollector, ThresholdConfig};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install a SIGINT handler so Ctrl-C requests a clean, exit-0 shutdown
/// (spec §6) instead of killing the process mid-commit; the returned
/// reference is the cancellation token polled at commit/recovery/lock
/// I/O boundaries (spec §5).
fn install_cancel_handler() -> &'static AtomicBool {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
    &CANCEL_REQUESTED
}

#[derive(Parser)]
#[command(name = "deespec")]
#[command(author, version, about = "Crash-safe filesystem transaction engine", long_about = None)]
pub struct Cli {
    /// Home directory override (default: $DEE_HOME or .deespec/)
    #[arg(long, global = true)]
    pub home: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive turns continuously.
    Run {
        /// Polling interval between turns, clamped to 1s..10m.
        #[arg(long, default_value = "5s", value_parser = parse_duration)]
        interval: Duration,
        /// Number of work items processed per turn (reserved; driver
        /// currently processes one item per turn regardless).
        #[arg(long, default_value_t = 1)]
        parallel: u32,
        /// Run a single turn and exit instead of looping.
        #[arg(long)]
        once: bool,
    },
    /// List and inspect locks.
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Run validations; optionally emit JSON.
    Doctor {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum LockAction {
    /// List all held locks (run + state), noting active vs expired.
    List,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.len() - 1);
    let n: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        _ => Err(format!("unsupported duration unit in {s} (use s or m)")),
    }
}

/// A no-op work source used until the real work-item repository
/// collaborator is wired in; always reports no ready item.
struct EmptySource;

impl WorkItemSource for EmptySource {
    fn next_ready(&self) -> crate::error::Result<Option<WorkItemRef>> {
        Ok(None)
    }
}

struct NoopExecutor;

impl driver::TurnExecutor for NoopExecutor {
    fn execute(
        &self,
        _item: &WorkItemRef,
        _txn: &mut crate::transaction::Transaction,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}

pub fn run(cli: Cli) -> i32 {
    let config = Config::resolve(cli.home);
    if let Err(e) = config.ensure_layout() {
        tracing::error!(error = %e, "failed to prepare home directory layout");
        return crate::metrics::EXIT_FAIL;
    }

    match cli.command {
        Commands::Run {
            interval,
            parallel,
            once,
        } => run_command(&config, interval, parallel, once),
        Commands::Lock { action } => lock_command(&config, action),
        Commands::Doctor { json } => doctor_command(&config, json),
    }
}

fn run_command(config: &Config, interval: Duration, _parallel: u32, once: bool) -> i32 {
    let cancel = install_cancel_handler();
    let metrics = Arc::new(MetricsCollector::new(config.metrics_path()));

    if let Err(e) = driver::recover_at_startup(config, &metrics, Some(cancel)) {
        tracing::error!(error = %e, "startup recovery failed");
        return crate::metrics::EXIT_FAIL;
    }
    if let Err(e) = metrics.save(&config.metrics_path()) {
        tracing::warn!(error = %e, "failed to persist recovery metrics");
    }

    let locks = match LockService::open(&config.lock_db_path()) {
        Ok(locks) => Arc::new(locks),
        Err(e) => {
            tracing::error!(error = %e, "failed to open lock service");
            return crate::metrics::EXIT_FAIL;
        }
    };
    locks.start(&config.lock);

    let drv = Driver::new(config.clone(), Arc::clone(&locks), Arc::clone(&metrics));

    if let Err(e) = drv.acquire_run_lock(Some(cancel)) {
        tracing::error!(error = %e, "could not acquire run lock; another driver is active");
        return crate::metrics::EXIT_FAIL;
    }

    let interval = clamp_interval(interval);
    let source = EmptySource;
    let executor = NoopExecutor;
    let mut journal = NdjsonJournal::new(config.journal_path());

    let exit_code = loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested; exiting cleanly");
            break crate::metrics::EXIT_OK;
        }

        match drv.run_one_turn(&source, &executor, &mut journal, Some(cancel)) {
            Ok(TurnOutcome::Idle) => {
                if let Err(e) = metrics.save(&config.metrics_path()) {
                    tracing::warn!(error = %e, "failed to persist metrics");
                }
                if once {
                    break crate::metrics::EXIT_OK;
                }
            }
            Ok(TurnOutcome::Committed { item_id, txn_id }) => {
                tracing::info!(item_id, txn_id, "turn committed");
                let _ = metrics.save(&config.metrics_path());
                if once {
                    break crate::metrics::EXIT_OK;
                }
            }
            Ok(TurnOutcome::StateLockContended { item_id }) => {
                tracing::info!(item_id, "state lock contended; will retry next turn");
            }
            Err(Error::Cancelled(reason)) => {
                tracing::info!(reason, "turn cancelled; exiting cleanly");
                break crate::metrics::EXIT_OK;
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed; left intact for next recovery");
                let _ = metrics.save(&config.metrics_path());
            }
        }

        if once {
            break crate::metrics::EXIT_OK;
        }
        std::thread::sleep(interval);
    };

    if let Err(e) = drv.release_run_lock() {
        tracing::warn!(error = %e, "failed to release run lock on shutdown");
    }
    locks.stop();
    exit_code
}

fn lock_command(config: &Config, action: LockAction) -> i32 {
    let LockAction::List = action;
    let locks = match LockService::open(&config.lock_db_path()) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to open lock service");
            return crate::metrics::EXIT_FAIL;
        }
    };

    let now = chrono::Utc::now();
    match locks.list_run_locks().and_then(|mut run_locks| {
        run_locks.extend(locks.list_state_locks()?);
        Ok(run_locks)
    }) {
        Ok(all) => {
            for lock in all {
                let status = if lock.is_expired(now) { "expired" } else { "active" };
                println!(
                    "{}\t{}\t{}\tpid={}\t{}",
                    lock.lock_id, lock.lock_type, status, lock.pid, lock.expires_at
                );
            }
            crate::metrics::EXIT_OK
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to list locks");
            crate::metrics::EXIT_FAIL
        }
    }
}

fn doctor_command(config: &Config, json: bool) -> i32 {
    let scan = match crate::scanner::scan(&config.txn_root()) {
        Ok(scan) => scan,
        Err(e) => {
            tracing::error!(error = %e, "doctor scan failed");
            return crate::metrics::EXIT_FAIL;
        }
    };
    scan.log_summary();

    let threshold_config = ThresholdConfig {
        success_rate_threshold: 0.95,
        max_cas_conflicts: 50,
        max_recovery_count: 50,
        min_total_commits: 10,
        enabled: true,
    };
    let metrics_counters = crate::metrics::read_counters(&config.metrics_path()).unwrap_or_default();
    let report = crate::metrics::evaluate_thresholds(&metrics_counters, &threshold_config);

    if json {
        let body = serde_json::json!({
            "scan": {
                "total": scan.total,
                "committed": scan.committed.len(),
                "intent_only": scan.intent_only.len(),
                "incomplete": scan.incomplete.len(),
                "abandoned": scan.abandoned.len(),
            },
            "thresholds": {
                "passed": report.passed,
                "failed_checks": report.failed_checks,
                "warnings": report.warnings,
            },
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else {
        println!(
            "scan: total={} committed={} intent_only={} incomplete={} abandoned={}",
            scan.total,
            scan.committed.len(),
            scan.intent_only.len(),
            scan.incomplete.len(),
            scan.abandoned.len()
        );
        println!("thresholds: passed={}", report.passed);
        for check in &report.failed_checks {
            println!("  FAIL: {check}");
        }
        for warning in &report.warnings {
            println!("  WARN: {warning}");
        }
    }

    report.exit_code()
}
