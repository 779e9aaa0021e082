// src/hash.rs

//! Checksum subsystem (spec §4.2).
//!
//! SHA-256 is the only accepted algorithm — anything else fails fast with
//! [`Error::UnsupportedAlgorithm`]. Two integration modes: a streaming tee
//! used while staging a file (hash computed in the same pass as the write,
//! avoiding a second read) and a validation mode that recomputes and
//! compares against a recorded checksum.
//!
//! Trimmed from the teacher's `src/hash.rs`, which also supported XXH128
//! for content-addressable storage — not needed here, and spec §4.2 is
//! explicit that only one algorithm is accepted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub const ALGORITHM: &str = "sha256";

/// Recorded checksum of a staged or published file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub algorithm: String,
    pub value: String,
    pub size: u64,
    pub path: PathBuf,
}

impl ChecksumInfo {
    pub fn matches(&self, other: &ChecksumInfo) -> bool {
        self.algorithm == other.algorithm && self.value == other.value && self.size == other.size
    }
}

impl fmt::Display for ChecksumInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({} bytes)", self.algorithm, self.value, self.size)
    }
}

/// Validate that `algorithm` is the one supported value.
pub fn validate_algorithm(algorithm: &str) -> Result<()> {
    if algorithm.eq_ignore_ascii_case(ALGORITHM) {
        Ok(())
    } else {
        Err(Error::UnsupportedAlgorithm(algorithm.to_string()))
    }
}

/// Compute the SHA-256 hex digest of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of everything read from `reader`.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 hex digest and byte length of a file on disk.
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

/// A writer wrapper that tees every byte written into both the
/// destination and a running SHA-256 hash — the single-pass staging I/O
/// path described in spec §4.2. Call [`TeeWriter::finish`] to obtain the
/// wrapped writer back plus the final [`ChecksumInfo`]; the caller is
/// still responsible for fsyncing the underlying file.
pub struct TeeWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    size: u64,
    path: PathBuf,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(inner: W, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
            path: path.into(),
        }
    }

    pub fn finish(self) -> (W, ChecksumInfo) {
        let value = format!("{:x}", self.hasher.finalize());
        let info = ChecksumInfo {
            algorithm: ALGORITHM.to_string(),
            value,
            size: self.size,
            path: self.path,
        };
        (self.inner, info)
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Recompute the checksum of `path` on disk and compare against `expected`
/// (spec §4.1's pre-commit re-validation step).
pub fn validate_file(path: &Path, expected: &ChecksumInfo) -> Result<()> {
    validate_algorithm(&expected.algorithm)?;
    let (actual_value, actual_size) = hash_file(path).map_err(Error::Io)?;
    if actual_value != expected.value || actual_size != expected.size {
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.value.clone(),
            expected_size: expected.size,
            actual: actual_value,
            actual_size,
        });
    }
    Ok(())
}

/// Recompute the checksum of an in-memory buffer and compare.
pub fn validate_bytes(data: &[u8], expected: &ChecksumInfo) -> Result<()> {
    validate_algorithm(&expected.algorithm)?;
    let actual_value = hash_bytes(data);
    let actual_size = data.len() as u64;
    if actual_value != expected.value || actual_size != expected.size {
        return Err(Error::ChecksumMismatch {
            path: expected.path.clone(),
            expected: expected.value.clone(),
            expected_size: expected.size,
            actual: actual_value,
            actual_size,
        });
    }
    Ok(())
}
