//! Core data models shared by the loader, chunker, vector index and chat.
//!
//! These types describe the text that flows through the sync pipeline:
//! extracted [`DocumentRecord`]s are split into [`Chunk`]s, embedded, and
//! stored in a vector index as [`IndexEntry`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a piece of text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Path of the source file, relative to the watched root.
    pub source: String,
    /// Bare file name (last path component).
    pub filename: String,
    /// When the loader read the file.
    pub loaded_at: DateTime<Utc>,
}

/// Raw text extracted from one file (or one page of a file).
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub text: String,
    pub provenance: Provenance,
}

/// A window of a document's text, sized for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub provenance: Provenance,
}

/// One row of the vector index: an embedded chunk plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub provenance: Provenance,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            text: chunk.text,
            provenance: chunk.provenance,
            vector,
        }
    }
}

/// A chunk returned by a nearest-neighbour query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub provenance: Provenance,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}
