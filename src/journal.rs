// src/journal.rs

//! Journal append contract (spec §1, §6, §9's Workflow Turn
//! Orchestration supplement). The core treats journal *content* as
//! opaque — it only guarantees the append runs before the commit marker
//! and that whatever the callback writes is durable before it returns.
//!
//! Grounded on the teacher's `TransactionJournal` (CRC32-line-framed
//! append-only file, fsync-on-barrier discipline); the framing is
//! dropped here since content schema is explicitly out of scope and this
//! journal only needs durability, not structured-record recovery.

use crate::error::Result;
use crate::fsutil;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The boundary the Transaction Manager calls into during the commit
/// protocol's journal phase (spec §4.1 step 6).
pub trait JournalAppend {
    fn append(&mut self, txn_id: &str) -> Result<()>;
}

/// Reference implementation: appends one ndjson line per call to
/// `var/journal.ndjson`, fsyncing the file and its containing directory
/// before returning.
pub struct NdjsonJournal {
    path: PathBuf,
}

impl NdjsonJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        fsutil::fsync_file(&file)?;
        drop(file);

        if let Some(parent) = self.path.parent() {
            fsutil::fsync_dir(parent)?;
        }
        Ok(())
    }
}

impl JournalAppend for NdjsonJournal {
    fn append(&mut self, txn_id: &str) -> Result<()> {
        let record = serde_json::json!({
            "txn_id": txn_id,
            "at": chrono::Utc::now().to_rfc3339(),
        });
        self.append_line(&record.to_string())
    }
}

/// Read every record's `txn_id` currently in the journal, in append
/// order. Used by operator tooling; the core itself never reads back its
/// own journal.
pub fn read_txn_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let mut ids = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(id) = value.get("txn_id").and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("var").join("journal.ndjson");
        let mut journal = NdjsonJournal::new(&path);

        journal.append("txn_1_1").unwrap();
        journal.append("txn_2_2").unwrap();

        let ids = read_txn_ids(&path).unwrap();
        assert_eq!(ids, vec!["txn_1_1", "txn_2_2"]);
    }

    #[test]
    fn test_read_missing_journal_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.ndjson");
        assert!(read_txn_ids(&path).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.ndjson");
        std::fs::write(&path, "not json\n{\"txn_id\":\"txn_3_3\"}\n").unwrap();
        assert_eq!(read_txn_ids(&path).unwrap(), vec!["txn_3_3"]);
    }
}
