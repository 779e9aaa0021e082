// src/scanner.rs

//! Scanner (spec §4.3): classifies transaction directories by marker-file
//! presence, without mutating anything. Grounded on the teacher's
//! `find_incomplete_journals` directory-walk pattern, generalized to the
//! four-way truth table below.
//!
//! | commit | intent | manifest/stage | class |
//! |---|---|---|---|
//! | yes | * | * | committed |
//! | no | yes | * | intent_only |
//! | no | no | yes | incomplete |
//! | no | no | no | abandoned |

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Committed,
    IntentOnly,
    Incomplete,
    Abandoned,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::IntentOnly => "intent_only",
            Self::Incomplete => "incomplete",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Output of a scan: totals plus the four disjoint id lists (spec §3
/// `ScanResult`).
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub total: usize,
    pub committed: Vec<String>,
    pub intent_only: Vec<String>,
    pub incomplete: Vec<String>,
    pub abandoned: Vec<String>,
}

impl ScanResult {
    fn push(&mut self, id: String, class: Classification) {
        match class {
            Classification::Committed => self.committed.push(id),
            Classification::IntentOnly => self.intent_only.push(id),
            Classification::Incomplete => self.incomplete.push(id),
            Classification::Abandoned => self.abandoned.push(id),
        }
    }

    /// Structured, machine-readable summary log (spec §9: the
    /// specification assumes the machine-readable log format over human
    /// prose, resolving the corpus's format ambiguity).
    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total,
            committed = self.committed.len(),
            intent_only = self.intent_only.len(),
            incomplete = self.incomplete.len(),
            abandoned = self.abandoned.len(),
            committed_ids = ?truncated(&self.committed),
            intent_only_ids = ?truncated(&self.intent_only),
            incomplete_ids = ?truncated(&self.incomplete),
            abandoned_ids = ?truncated(&self.abandoned),
            "scan complete"
        );
    }
}

const LOG_ID_LIMIT: usize = 20;

fn truncated(ids: &[String]) -> &[String] {
    &ids[..ids.len().min(LOG_ID_LIMIT)]
}

fn classify_dir(dir: &Path) -> Classification {
    let has_commit = dir.join("status.commit").exists();
    let has_intent = dir.join("status.intent").exists();
    let has_manifest = dir.join("manifest.json").exists() || dir.join("stage").exists();

    if has_commit {
        Classification::Committed
    } else if has_intent {
        Classification::IntentOnly
    } else if has_manifest {
        Classification::Incomplete
    } else {
        Classification::Abandoned
    }
}

/// Walk the first level of `txn_root` and classify each child directory.
/// A missing transaction root is not an error; it yields an empty
/// result.
pub fn scan(txn_root: &Path) -> std::io::Result<ScanResult> {
    let mut result = ScanResult::default();

    let entries = match fs::read_dir(txn_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = match path.file_name().and_then(|n| n.to_str()) {
            Some(id) => id.to_string(),
            None => continue,
        };
        let class = classify_dir(&path);
        result.total += 1;
        result.push(id, class);
    }

    Ok(result)
}
