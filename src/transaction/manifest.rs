// src/transaction/manifest.rs

//! The transaction manifest (spec §3, §6): the ordered plan of file
//! operations a transaction will publish, plus the `status.intent` and
//! `status.commit` marker record shapes.

use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Rename,
}

/// One file mutation within a transaction (spec §3 `FileOperation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_info: Option<ChecksumInfo>,
    pub size: u64,
    pub mode: u32,
}

impl FileOperation {
    pub fn new_create(destination: PathBuf, size: u64, mode: u32) -> Self {
        Self {
            op_type: OperationType::Create,
            source: None,
            destination,
            checksum_info: None,
            size,
            mode,
        }
    }

    pub fn with_checksum(mut self, info: ChecksumInfo) -> Self {
        self.checksum_info = Some(info);
        self
    }

    /// Validate a single operation per spec §3 invariant 7: destination
    /// present, `source` set iff the op is a rename.
    pub fn validate(&self) -> Result<()> {
        if self.destination.as_os_str().is_empty() {
            return Err(Error::validation("file operation missing destination"));
        }
        match self.op_type {
            OperationType::Rename if self.source.is_none() => {
                return Err(Error::validation("rename operation missing source"));
            }
            OperationType::Rename => {}
            _ if self.source.is_some() => {
                return Err(Error::validation(
                    "source set on a non-rename operation",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// The transaction's plan document (spec §6 `manifest.json`), written
/// from `begin` onward and appended to as files are staged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub files: Vec<FileOperation>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            files: Vec::new(),
            created_at: Utc::now(),
            deadline: None,
            meta: serde_json::Map::new(),
        }
    }

    /// Manifest validation (spec §3 invariant 7): at least one file
    /// operation, every operation individually valid, creation timestamp
    /// set (guaranteed by construction, checked here for deserialized
    /// manifests recovered from disk).
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::validation("manifest has no file operations"));
        }
        if self.created_at.timestamp() == 0 {
            return Err(Error::validation("manifest missing created_at"));
        }
        for op in &self.files {
            op.validate()?;
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `status.intent` marker record (spec §6): written once staging
/// completes and the transaction is ready to commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub txn_id: String,
    pub marked_at: DateTime<Utc>,
    pub checksums: Vec<ChecksumInfo>,
    pub ready: bool,
}

impl IntentRecord {
    pub fn new(txn_id: impl Into<String>, checksums: Vec<ChecksumInfo>) -> Self {
        Self {
            txn_id: txn_id.into(),
            marked_at: Utc::now(),
            checksums,
            ready: true,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `status.commit` marker record (spec §6): writing this file is the
/// commit point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub txn_id: String,
    pub committed_at: DateTime<Utc>,
    pub committed_files: Vec<PathBuf>,
    pub success: bool,
}

impl CommitRecord {
    pub fn new(txn_id: impl Into<String>, committed_files: Vec<PathBuf>) -> Self {
        Self {
            txn_id: txn_id.into(),
            committed_at: Utc::now(),
            committed_files,
            success: true,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_requires_at_least_one_file() {
        let manifest = Manifest::new("txn_1_1");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_file_operation_rename_requires_source() {
        let mut op = FileOperation::new_create(PathBuf::from("dst"), 0, 0o644);
        op.op_type = OperationType::Rename;
        assert!(op.validate().is_err());
        op.source = Some(PathBuf::from("src"));
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_file_operation_non_rename_rejects_source() {
        let mut op = FileOperation::new_create(PathBuf::from("dst"), 0, 0o644);
        op.source = Some(PathBuf::from("src"));
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let mut manifest = Manifest::new("txn_1700000000_000000001");
        manifest
            .files
            .push(FileOperation::new_create(PathBuf::from("a.txt"), 6, 0o644).with_checksum(
                ChecksumInfo {
                    algorithm: "sha256".to_string(),
                    value: "deadbeef".to_string(),
                    size: 6,
                    path: PathBuf::from("a.txt"),
                },
            ));

        let json = manifest.to_json_pretty().unwrap();
        let parsed = Manifest::from_json(json.as_bytes()).unwrap();
        assert_eq!(parsed.id, manifest.id);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(
            parsed.files[0].checksum_info.as_ref().map(|c| c.value.as_str()),
            Some("deadbeef")
        );
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_intent_and_commit_record_roundtrip() {
        let intent = IntentRecord::new("txn_1_1", Vec::new());
        let parsed = IntentRecord::from_json(intent.to_json_pretty().unwrap().as_bytes()).unwrap();
        assert!(parsed.ready);

        let commit = CommitRecord::new("txn_1_1", vec![PathBuf::from("a.txt")]);
        let parsed = CommitRecord::from_json(commit.to_json_pretty().unwrap().as_bytes()).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.committed_files.len(), 1);
    }
}
