//! Brute-force in-memory [`VectorIndex`] with JSON persistence.
//!
//! Entries live in a `Vec` behind a `tokio::sync::RwLock`; queries compute
//! cosine similarity against every stored vector. On disk the index is a
//! single `index.json` whose vectors are base64-encoded little-endian f32
//! blobs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{IndexEntry, Provenance, ScoredChunk};

use super::{check_dims, VectorIndex};

/// File name of the persisted index inside the storage directory.
pub const INDEX_FILE: &str = "index.json";

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dims: usize,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk_id: String,
    document_id: String,
    text: String,
    provenance: Provenance,
    vector: String,
}

/// Flat (exhaustive search) vector index.
pub struct FlatIndex {
    dims: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl FlatIndex {
    /// Create an empty index of the given dimension.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Load the index persisted in `dir`, or create an empty one if the
    /// directory holds no index yet.
    ///
    /// # Errors
    ///
    /// Fails if the persisted file cannot be parsed, or if it was created
    /// with a different dimension than `dims`.
    pub async fn open(dir: &Path, dims: usize) -> Result<Self> {
        match Self::load(dir).await? {
            None => {
                tracing::info!(dir = %dir.display(), dims, "created new empty index");
                Ok(Self::new(dims))
            }
            Some(index) if index.dims != dims => bail!(
                "index at {} has dimension {}, but the embedder produces {}",
                index_path(dir).display(),
                index.dims,
                dims
            ),
            Some(index) => Ok(index),
        }
    }

    /// Load the index persisted in `dir` with whatever dimension it was
    /// saved with. Returns `None` if no index file exists.
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = index_path(dir);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        let persisted: PersistedIndex = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse index: {}", path.display()))?;

        let dims = persisted.dims;
        let engine = base64::engine::general_purpose::STANDARD;
        let mut entries = Vec::with_capacity(persisted.entries.len());
        for e in persisted.entries {
            let blob = engine
                .decode(e.vector.as_bytes())
                .with_context(|| format!("Corrupt vector for chunk {}", e.chunk_id))?;
            let vector = blob_to_vec(&blob);
            check_dims(dims, vector.len())?;
            entries.push(IndexEntry {
                chunk_id: e.chunk_id,
                document_id: e.document_id,
                text: e.text,
                provenance: e.provenance,
                vector,
            });
        }

        tracing::info!(path = %path.display(), entries = entries.len(), "loaded existing index");
        Ok(Some(Self {
            dims,
            entries: RwLock::new(entries),
        }))
    }
}

fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn insert(&self, new_entries: Vec<IndexEntry>) -> Result<()> {
        for e in &new_entries {
            check_dims(self.dims, e.vector.len())?;
        }
        let mut entries = self.entries.write().await;
        for e in new_entries {
            entries.retain(|existing| existing.chunk_id != e.chunk_id);
            entries.push(e);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        check_dims(self.dims, vector.len())?;
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk_id: e.chunk_id.clone(),
                document_id: e.document_id.clone(),
                text: e.text.clone(),
                provenance: e.provenance.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !chunk_ids.contains(&e.chunk_id));
        Ok(before - entries.len())
    }

    async fn persist(&self, dir: &Path) -> Result<()> {
        let engine = base64::engine::general_purpose::STANDARD;
        let persisted = {
            let entries = self.entries.read().await;
            PersistedIndex {
                dims: self.dims,
                entries: entries
                    .iter()
                    .map(|e| PersistedEntry {
                        chunk_id: e.chunk_id.clone(),
                        document_id: e.document_id.clone(),
                        text: e.text.clone(),
                        provenance: e.provenance.clone(),
                        vector: engine.encode(vec_to_blob(&e.vector)),
                    })
                    .collect(),
            }
        };
        let json = serde_json::to_vec(&persisted)?;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create storage dir: {}", dir.display()))?;
        let path = index_path(dir);
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace index: {}", path.display()))?;
        Ok(())
    }
}
