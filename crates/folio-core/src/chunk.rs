//! Sliding-window text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of at most `max_tokens` (approximated
//! as characters) with `overlap_tokens` of context repeated between
//! consecutive chunks, so a sentence that straddles a boundary still appears
//! whole in at least one chunk.
//!
//! # Algorithm
//!
//! 1. Convert token limits to character limits using a 4 chars/token ratio.
//! 2. Trim the input; empty or whitespace-only text yields no chunks.
//! 3. Take a window of up to `max_chars` bytes starting at `start`, snapped
//!    back to a UTF-8 char boundary.
//! 4. If the window does not reach the end of the text, pull its end back to
//!    the last whitespace inside the window (when there is one).
//! 5. Emit the trimmed window, then start the next window `overlap_chars`
//!    before the current end. The next start always moves forward.
//!
//! Boundaries depend only on the text and the parameters, so the same input
//! always produces the same chunk texts and hashes.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use folio_core::chunk::{chunk_text, ChunkParams};
//! use folio_core::models::Provenance;
//!
//! let prov = Provenance {
//!     source: "notes.md".to_string(),
//!     filename: "notes.md".to_string(),
//!     loaded_at: Utc::now(),
//! };
//! let chunks = chunk_text("doc-1", "Hello world.", &prov, &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Provenance};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunk sizing, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            overlap_tokens: 15,
        }
    }
}

impl ChunkParams {
    pub fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_tokens * CHARS_PER_TOKEN
    }
}

/// Split `text` into overlapping chunks.
///
/// # Guarantees
///
/// - Empty or whitespace-only text returns an empty vector.
/// - Text no longer than one window returns exactly one chunk.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - No chunk is longer than `max_chars` bytes, except when a single
///   character is wider than the window.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    provenance: &Provenance,
    params: &ChunkParams,
) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let max_chars = params.max_chars();
    let overlap_chars = params.overlap_chars();

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;
    let mut start = 0usize;

    while start < text.len() {
        let mut end = snap_back(text, (start + max_chars).min(text.len()));
        if end <= start {
            // Window narrower than the next character: take that character.
            end = next_char_end(text, start);
        } else if end < text.len() {
            if let Some(pos) = text[start..end].rfind(char::is_whitespace) {
                if pos > 0 {
                    end = start + pos;
                }
            }
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, piece, provenance));
            chunk_index += 1;
        }

        if end >= text.len() {
            break;
        }

        let mut next = snap_forward(text, end.saturating_sub(overlap_chars));
        if next <= start {
            next = end;
        }
        let rest = &text[next..];
        start = next + (rest.len() - rest.trim_start().len());
    }

    chunks
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_back(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn snap_forward(s: &str, index: usize) -> usize {
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn next_char_end(s: &str, start: usize) -> usize {
    s[start..]
        .chars()
        .next()
        .map(|c| start + c.len_utf8())
        .unwrap_or(s.len())
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, text: &str, provenance: &Provenance) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        provenance: provenance.clone(),
    }
}
