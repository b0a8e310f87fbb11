//! # Folio Core
//!
//! Shared logic for Folio: data models, the overlapping chunker, the
//! embedding / vector index / generation capability traits, a flat
//! reference vector index, and retrieval-augmented chat sessions.
//!
//! Filesystem scanning, document loading, metadata bookkeeping and the
//! HTTP surface live in the `folio` app crate.

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod models;
