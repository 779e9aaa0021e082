// src/transaction/checksum_pool.rs

//! Bounded parallel checksum validation (spec §4.2).
//!
//! Used at commit time when a transaction stages more than a handful of
//! files: validating them sequentially would serialize I/O that the disk
//! can service concurrently, but an unbounded pool would thrash it. The
//! worker count is capped at `min(available_parallelism, 4, file_count)`
//! to bound I/O contention.
//!
//! Grounded on the teacher's `rayon` dependency (used there for parallel
//! package downloads); the pairing-preserving job/result pattern is
//! generalized from spec §4.2/§9's worker-pool guidance.

use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::Path;

/// Above this file count, dispatch to the parallel pool; at or below,
/// validate sequentially (pool setup isn't worth it for a handful of
/// files).
pub const PARALLEL_THRESHOLD: usize = 4;

/// Cap on worker threads, independent of how many cores are available.
pub const MAX_WORKERS: usize = 4;

/// One file's validation outcome, paired back to its manifest index so
/// callers can report which operation failed.
pub struct ValidationResult {
    pub index: usize,
    pub path: std::path::PathBuf,
    pub outcome: Result<()>,
}

fn worker_count(file_count: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.min(MAX_WORKERS).min(file_count).max(1)
}

/// Validate every `(path, expected)` pair, choosing sequential or
/// parallel execution per [`PARALLEL_THRESHOLD`]. Returns one result per
/// input, in the original order.
pub fn validate_all(files: &[(std::path::PathBuf, ChecksumInfo)]) -> Vec<ValidationResult> {
    if files.len() <= PARALLEL_THRESHOLD {
        return validate_sequential(files);
    }
    validate_parallel(files)
}

fn validate_one(path: &Path, expected: &ChecksumInfo) -> Result<()> {
    crate::hash::validate_file(path, expected)
}

fn validate_sequential(files: &[(std::path::PathBuf, ChecksumInfo)]) -> Vec<ValidationResult> {
    files
        .iter()
        .enumerate()
        .map(|(index, (path, expected))| ValidationResult {
            index,
            path: path.clone(),
            outcome: validate_one(path, expected),
        })
        .collect()
}

/// A disposable worker pool scoped to a single commit's validation pass.
/// `Close`/shutdown is implicit: the pool is dropped (and its threads
/// joined) when this value goes out of scope, after `validate` returns.
pub struct ChecksumPool {
    pool: ThreadPool,
}

impl ChecksumPool {
    pub fn new(file_count: usize) -> Result<Self> {
        let workers = worker_count(file_count);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::validation(format!("failed to build checksum pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn validate(&self, files: &[(std::path::PathBuf, ChecksumInfo)]) -> Vec<ValidationResult> {
        self.pool.install(|| {
            use rayon::prelude::*;
            files
                .par_iter()
                .enumerate()
                .map(|(index, (path, expected))| ValidationResult {
                    index,
                    path: path.clone(),
                    outcome: validate_one(path, expected),
                })
                .collect()
        })
    }
}

fn validate_parallel(files: &[(std::path::PathBuf, ChecksumInfo)]) -> Vec<ValidationResult> {
    match ChecksumPool::new(files.len()) {
        Ok(pool) => pool.validate(files),
        Err(_) => validate_sequential(files),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, ALGORITHM};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> (std::path::PathBuf, ChecksumInfo) {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let info = ChecksumInfo {
            algorithm: ALGORITHM.to_string(),
            value: hash_bytes(content),
            size: content.len() as u64,
            path: path.clone(),
        };
        (path, info)
    }

    #[test]
    fn test_worker_count_capped_at_four() {
        assert!(worker_count(1000) <= MAX_WORKERS);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(2).min(2), worker_count(2));
    }

    #[test]
    fn test_validate_all_sequential_path() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(&dir, "a", b"1"), write(&dir, "b", b"22")];
        let results = validate_all(&files);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome.is_ok()));
    }

    #[test]
    fn test_validate_all_parallel_path_detects_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut files = Vec::new();
        for i in 0..6 {
            files.push(write(&dir, &format!("f{i}"), format!("payload-{i}").as_bytes()));
        }
        // Tamper with one staged file after its checksum was recorded.
        std::fs::write(&files[3].0, b"tampered").unwrap();

        let results = validate_all(&files);
        assert_eq!(results.len(), 6);
        let failed: Vec<_> = results.iter().filter(|r| r.outcome.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 3);
    }

    #[test]
    fn test_validate_all_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut files = Vec::new();
        for i in 0..8 {
            files.push(write(&dir, &format!("f{i}"), format!("{i}").as_bytes()));
        }
        let results = validate_all(&files);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index, i);
        }
    }
}
