// src/lib.rs

//! Crash-safe filesystem transaction engine with startup recovery and
//! SQLite-backed distributed locking.
//!
//! # Architecture
//!
//! - Transaction Manager: stage -> mark intent -> commit, via
//!   rename-based publish with a durable marker-file trail.
//! - Recovery Engine: scans the transaction root at startup and drives
//!   every partial transaction to a terminal state.
//! - Lock Service: a process-singleton run lock plus per-resource state
//!   locks, backed by a durable SQLite table with TTL expiry.
//! - Driver: the one-turn control flow tying staging, locking, and
//!   journaling together; the work-item repository and AI-agent
//!   adapter are out-of-scope collaborators behind trait seams.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod journal;
pub mod lock;
pub mod metrics;
pub mod recovery;
pub mod scanner;
pub mod transaction;

pub use config::Config;
pub use driver::{Driver, TurnExecutor, TurnOutcome, WorkItemRef, WorkItemSource};
pub use error::{Error, Result};
pub use hash::ChecksumInfo;
pub use journal::{JournalAppend, NdjsonJournal};
pub use lock::{Lock, LockService};
pub use metrics::{Counters, MetricsCollector, ThresholdConfig, ThresholdReport};
pub use recovery::{RecoveryOutcome, RecoveryReport};
pub use scanner::{Classification, ScanResult};
pub use transaction::{
    CommitRecord, FileOperation, IntentRecord, Manifest, OperationType, Transaction,
    TransactionState,
};
