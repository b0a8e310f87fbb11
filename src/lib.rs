//! # Folio
//!
//! Local-first document chat. Folio watches a folder of documents, keeps a
//! vector index of their content up to date incrementally, and answers
//! questions grounded in that content.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Watched dir │──▶│  Scan+Load   │──▶│ index.json + │
//! │ pdf/docx/…  │   │ Chunk+Embed  │   │ file_metadata│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │ (folio)  │         │  (axum)  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! folio sync                     # index new and changed files
//! folio query "What does the report conclude?"
//! folio chat                     # multi-turn conversation
//! folio serve                    # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`fingerprint`] | Content hashing for change detection |
//! | [`metadata`] | Per-file records (`file_metadata.json`) |
//! | [`scan`] | Watched folder traversal |
//! | [`loader`] | PDF, DOCX, Markdown, text and CSV loading |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Language model providers |
//! | [`sync`] | The incremental sync pipeline ([`sync::Library`]) |
//! | [`sessions`] | Server-side chat sessions |
//! | [`server`] | HTTP API |
//! | [`progress`] | Sync progress reporting |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod metadata;
pub mod progress;
pub mod scan;
pub mod server;
pub mod sessions;
pub mod sync;

pub use error::FolioError;
