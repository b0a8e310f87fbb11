//! Error taxonomy shared by the library, CLI and HTTP layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::loader::LoadError;

#[derive(Debug, Error)]
pub enum FolioError {
    /// No metadata record exists for the requested file.
    #[error("no indexed document named '{0}'")]
    NotFound(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to load {path}: {source}")]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    /// Embedding or vector index operation failed.
    #[error("index update failed: {0:#}")]
    IndexFailure(anyhow::Error),

    /// Saving the index or the metadata store failed. The index may hold
    /// content that metadata does not yet describe; the next sync repairs it.
    #[error("failed to persist state: {0:#}")]
    PersistenceFailure(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FolioError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FolioError::NotFound(_) => "not_found",
            FolioError::UnsupportedFormat(_) => "unsupported_format",
            FolioError::LoadFailure { .. } => "load_failure",
            FolioError::IndexFailure(_) => "index_failure",
            FolioError::PersistenceFailure(_) => "persistence_failure",
            FolioError::Io(_) => "io",
        }
    }
}

pub type Result<T, E = FolioError> = std::result::Result<T, E>;
