//! Vector index capability.
//!
//! The [`VectorIndex`] trait is the seam between the sync pipeline and
//! whatever nearest-neighbour store backs it. Removal by chunk id is part of
//! the trait, so every implementation can retract stale chunks and honour
//! explicit deletes.
//!
//! Implementations must be `Send + Sync`: chat sessions query the index
//! concurrently while the single writer inserts or deletes.

pub mod flat;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexEntry, ScoredChunk};

pub use flat::FlatIndex;

/// Abstract vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Add (or replace) embedded chunks |
/// | [`query`](VectorIndex::query) | Top-k chunks by cosine similarity |
/// | [`delete`](VectorIndex::delete) | Remove chunks by id |
/// | [`persist`](VectorIndex::persist) | Write the index to a directory |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embedding dimension fixed when the index was created.
    fn dims(&self) -> usize;

    /// Number of live entries.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert entries. Entries whose `chunk_id` already exists replace the
    /// old entry. The whole batch is rejected if any vector has the wrong
    /// dimension.
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Return up to `k` entries ranked by descending similarity.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove entries by chunk id, returning how many were removed.
    async fn delete(&self, chunk_ids: &[String]) -> Result<usize>;

    /// Write the index into `dir`.
    async fn persist(&self, dir: &Path) -> Result<()>;
}

/// Reject vectors whose length differs from the index dimension.
pub fn check_dims(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        anyhow::bail!(
            "vector dimension mismatch: index expects {}, got {}",
            expected,
            actual
        );
    }
    Ok(())
}
