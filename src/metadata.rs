//! Persistent record of every indexed file.
//!
//! The store is a single pretty-printed JSON object keyed by path relative
//! to the watched root (always `/`-separated). It is read in full at the
//! start of each pipeline run and rewritten in full on save.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const METADATA_FILE: &str = "file_metadata.json";

/// What is known about one indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: String,
    pub mtime: f64,
    pub processed_at: DateTime<Utc>,
    pub filename: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    /// Index entries produced from this file.
    #[serde(default)]
    pub chunk_ids: Vec<String>,
}

pub type FileMap = BTreeMap<String, FileRecord>;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Store backed by `file_metadata.json` inside `storage_dir`.
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty store.
    pub async fn load(&self) -> Result<FileMap> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_records(&path))
            .await
            .context("metadata load task panicked")?
    }

    /// Replace the stored records with `records`.
    pub async fn save(&self, records: FileMap) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_records(&path, &records))
            .await
            .context("metadata save task panicked")?
    }
}

fn read_records(path: &Path) -> Result<FileMap> {
    if !path.exists() {
        return Ok(FileMap::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(FileMap::new());
    }
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_records(path: &Path, records: &FileMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
