//! `manifest.json` written into every batch directory.
//!
//! Write-once audit record of what went into the batch; later stages read
//! the store, not the manifest.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One file placed into a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFileEntry {
    pub source_path: String,
    pub batch_path: String,
    /// Path relative to both the source root and the batch directory
    pub relative_path: String,
    pub size: u64,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch: String,
    pub created_at: DateTime<Utc>,
    pub file_count: u64,
    pub size_bytes: u64,
    pub files: Vec<BatchFileEntry>,
}

impl BatchManifest {
    pub fn new(batch: impl Into<String>, created_at: DateTime<Utc>, files: Vec<BatchFileEntry>) -> Self {
        Self {
            batch: batch.into(),
            created_at,
            file_count: files.len() as u64,
            size_bytes: files.iter().map(|f| f.size).sum(),
            files,
        }
    }

    /// Pretty-printed JSON with object keys in sorted order.
    pub fn to_json(&self) -> Result<String> {
        // Round-trip through `Value`: its map type keeps keys sorted.
        let value = serde_json::to_value(self).map_err(|e| IngestError::Manifest(e.to_string()))?;
        serde_json::to_string_pretty(&value).map_err(|e| IngestError::Manifest(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| IngestError::Manifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, size: u64) -> BatchFileEntry {
        BatchFileEntry {
            source_path: format!("/src/{}", name),
            batch_path: format!("/batches/batch_001/{}", name),
            relative_path: name.to_string(),
            size,
            fingerprint: Some(format!("fp-{}", name)),
        }
    }

    #[test]
    fn test_manifest_totals() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let manifest = BatchManifest::new("batch_001", created, vec![entry("a.jpg", 3), entry("b.jpg", 4)]);
        assert_eq!(manifest.file_count, 2);
        assert_eq!(manifest.size_bytes, 7);
    }

    #[test]
    fn test_manifest_keys_are_sorted() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let json = BatchManifest::new("batch_001", created, vec![entry("a.jpg", 3)])
            .to_json()
            .unwrap();

        let batch = json.find("\"batch\"").unwrap();
        let created_at = json.find("\"created_at\"").unwrap();
        let files = json.find("\"files\"").unwrap();
        let size_bytes = json.find("\"size_bytes\"").unwrap();
        assert!(batch < created_at && created_at < files && files < size_bytes);
        assert!(json.find("\"batch_path\"").unwrap() < json.find("\"source_path\"").unwrap());
    }

    #[test]
    fn test_manifest_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let manifest = BatchManifest::new("batch_002", Utc::now(), vec![entry("c.jpg", 1)]);

        manifest.write(&path).unwrap();
        assert_eq!(BatchManifest::load(&path).unwrap(), manifest);
    }
}
