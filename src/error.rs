// src/error.rs

//! The closed set of error kinds the transaction engine can surface.
//!
//! Call sites match on variants rather than sniffing message text (see
//! spec §7 / §9 REDESIGN FLAGS). `Io` and `Json` are transparent wrappers
//! for ambient failures that don't need a dedicated variant.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub type Result<T> = std::result::Result<T, Error>;

/// Cooperative cancellation signal (spec §5): an `Arc<AtomicBool>` (or
/// any borrow of one) polled at I/O boundaries inside `Begin`, `Commit`,
/// `RecoverAll`, and lock acquires. `None` means "never cancelled",
/// which is what every call site outside the `run` command's own loop
/// passes.
pub type CancelToken<'a> = Option<&'a AtomicBool>;

/// Returns `Err(Error::Cancelled)` if `token` is set and has fired.
pub fn check_cancelled(token: CancelToken) -> Result<()> {
    if token.map(|t| t.load(Ordering::Relaxed)).unwrap_or(false) {
        return Err(Error::Cancelled("operation cancelled".to_string()));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("stage dir {stage} and destination {dest} are on different devices")]
    CrossDevice { stage: PathBuf, dest: PathBuf },

    #[error("checksum mismatch for {path}: expected {expected} ({expected_size} bytes), got {actual} ({actual_size} bytes)")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        expected_size: u64,
        actual: String,
        actual_size: u64,
    },

    #[error("invalid state transition: {operation} requires state {expected:?}, found {actual:?}")]
    State {
        operation: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("recovery timed out after {0:?}")]
    RecoveryTimeout(std::time::Duration),

    #[error("metrics thresholds breached: {0}")]
    ThresholdFailure(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn state(operation: &'static str, expected: &'static str, actual: impl std::fmt::Debug) -> Self {
        Error::State {
            operation,
            expected,
            actual: format!("{actual:?}"),
        }
    }
}
