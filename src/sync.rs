//! Incremental sync pipeline.
//!
//! [`Library`] owns the watched root, the metadata store and the vector
//! index, and is the only component that mutates them.
//!
//! # Pipeline
//!
//! ```text
//! SCAN ──▶ DIFF ──▶ LOAD ──▶ CHUNK+EMBED ──▶ INDEX_UPDATE ──▶ METADATA_COMMIT
//!                     │            │               │
//!                     └────────────┴───────────────┴──▶ skipped (per file)
//! ```
//!
//! A file is selected when it has no record, or its hash or mtime differs
//! from the record. Failures in LOAD, CHUNK+EMBED or INDEX_UPDATE skip that
//! file only; its record is left untouched so the next sync retries it.
//!
//! Re-indexing a file inserts the new chunks first and then retracts the
//! chunk ids its previous record listed.
//!
//! # Concurrency
//!
//! Sync, ingest and delete take an internal writer lock, so at most one
//! mutation runs at a time. Chat and stats read the index concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_core::chat::{RetrievalParams, Retriever};
use folio_core::chunk::{chunk_text, ChunkParams};
use folio_core::embedding::Embedder;
use folio_core::generation::Generator;
use folio_core::index::{FlatIndex, VectorIndex};
use folio_core::models::{Chunk, IndexEntry};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{FolioError, Result};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::loader;
use crate::metadata::{FileMap, FileRecord, MetadataStore};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::scan::{relative_key, scan_root, ScannedFile};

/// Outcome of a sync or ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub files_processed: usize,
    /// Relative paths of the files that were (re)indexed.
    pub files: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

/// A file that could not be processed, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    /// Metadata key of the removed file.
    pub path: String,
    pub chunks_removed: usize,
    /// Whether the file was still on disk and has been removed.
    pub file_removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryStats {
    pub total_files: usize,
    pub files: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub index_size: usize,
}

/// The indexed document collection.
pub struct Library {
    root: PathBuf,
    storage_dir: PathBuf,
    store: MetadataStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunk_params: ChunkParams,
    batch_size: usize,
    writer: Mutex<()>,
}

impl Library {
    /// Open the library described by `config`, creating the watched root and
    /// storage directory if needed and loading any persisted index.
    pub async fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let root = config.storage.data_dir.clone();
        let storage_dir = config.storage.storage_dir.clone();
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(&storage_dir).await?;

        // A disabled embedder (dims 0) must still be able to read and delete
        // from an index built earlier with a real one.
        let index = if embedder.dims() == 0 {
            FlatIndex::load(&storage_dir)
                .await
                .map_err(FolioError::PersistenceFailure)?
                .unwrap_or_else(|| FlatIndex::new(0))
        } else {
            FlatIndex::open(&storage_dir, embedder.dims())
                .await
                .map_err(FolioError::PersistenceFailure)?
        };

        Ok(Self {
            store: MetadataStore::new(&storage_dir),
            root,
            storage_dir,
            index: Arc::new(index),
            embedder,
            chunk_params: config.chunking.params(),
            batch_size: config.embedding.batch_size.max(1),
            writer: Mutex::new(()),
        })
    }

    /// The watched root documents are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    /// A retriever over this library's index.
    pub fn retriever(&self, generator: Arc<dyn Generator>, params: RetrievalParams) -> Retriever {
        Retriever::new(self.index(), Arc::clone(&self.embedder), generator, params)
    }

    /// Scan the watched root and index every new or changed file.
    pub async fn sync(&self, progress: &dyn SyncProgressReporter) -> Result<SyncSummary> {
        let _writer = self.writer.lock().await;
        let started = std::time::Instant::now();

        progress.report(SyncProgressEvent::Scanning);
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || scan_root(&root))
            .await
            .map_err(join_error)?
            .map_err(|e| FolioError::Io(std::io::Error::other(format!("{:#}", e))))?;

        let mut records = self.store.load().await.map_err(FolioError::PersistenceFailure)?;
        let mut summary = SyncSummary::default();

        let total = files.len();
        let fingerprinted = fingerprint_all(files).await?;
        let mut selected = Vec::new();
        for (file, fp) in fingerprinted {
            match fp {
                Ok(fp) if needs_processing(records.get(&file.rel_path), &fp) => {
                    selected.push((file, fp))
                }
                Ok(_) => {}
                Err(e) => skip(&mut summary, &file.rel_path, e.to_string()),
            }
        }
        progress.report(SyncProgressEvent::Diffed {
            total: total as u64,
            changed: selected.len() as u64,
        });
        tracing::info!(total, changed = selected.len(), "diff complete");

        self.process(selected, &mut records, &mut summary, progress)
            .await;
        self.commit(&records, &summary).await?;

        tracing::info!(
            processed = summary.files_processed,
            skipped = summary.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync complete"
        );
        Ok(summary)
    }

    /// Index an explicit list of files inside the watched root, regardless
    /// of whether they changed.
    pub async fn ingest_files(&self, paths: &[PathBuf]) -> Result<SyncSummary> {
        let _writer = self.writer.lock().await;

        let mut records = self.store.load().await.map_err(FolioError::PersistenceFailure)?;
        let mut summary = SyncSummary::default();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match relative_key(&self.root, path) {
                Some(rel_path) => files.push(ScannedFile {
                    path: path.clone(),
                    rel_path,
                }),
                None => skip(
                    &mut summary,
                    &path.display().to_string(),
                    "outside the watched root".to_string(),
                ),
            }
        }

        let mut selected = Vec::new();
        for (file, fp) in fingerprint_all(files).await? {
            match fp {
                Ok(fp) => selected.push((file, fp)),
                Err(e) => skip(&mut summary, &file.rel_path, e.to_string()),
            }
        }

        self.process(selected, &mut records, &mut summary, &NoProgress)
            .await;
        self.commit(&records, &summary).await?;
        Ok(summary)
    }

    /// Remove a file from the index, the metadata store and the disk.
    ///
    /// `filename` is matched against metadata keys first, then against the
    /// bare file name of each record when exactly one record has it.
    pub async fn delete(&self, filename: &str) -> Result<DeleteOutcome> {
        let _writer = self.writer.lock().await;

        let mut records = self.store.load().await.map_err(FolioError::PersistenceFailure)?;
        let key = resolve_key(&records, filename)
            .ok_or_else(|| FolioError::NotFound(filename.to_string()))?;
        let Some(record) = records.remove(&key) else {
            return Err(FolioError::NotFound(filename.to_string()));
        };

        let chunks_removed = self
            .index
            .delete(&record.chunk_ids)
            .await
            .map_err(FolioError::IndexFailure)?;

        // The entries are already gone from the index, so removal from disk
        // must not abort before the record is dropped too.
        let path = self.root.join(&key);
        let file_removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not remove file from disk");
                false
            }
        };

        self.index
            .persist(&self.storage_dir)
            .await
            .map_err(FolioError::PersistenceFailure)?;
        self.store
            .save(records)
            .await
            .map_err(FolioError::PersistenceFailure)?;

        tracing::info!(path = %key, chunks_removed, file_removed, "deleted document");
        Ok(DeleteOutcome {
            path: key,
            chunks_removed,
            file_removed,
        })
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        let records = self.store.load().await.map_err(FolioError::PersistenceFailure)?;
        Ok(LibraryStats {
            total_files: records.len(),
            last_updated: records.values().map(|r| r.processed_at).max(),
            files: records.into_keys().collect(),
            index_size: self.index.len().await,
        })
    }

    /// Persist the index. Called on server shutdown.
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.index
            .persist(&self.storage_dir)
            .await
            .map_err(FolioError::PersistenceFailure)
    }

    async fn process(
        &self,
        selected: Vec<(ScannedFile, Fingerprint)>,
        records: &mut FileMap,
        summary: &mut SyncSummary,
        progress: &dyn SyncProgressReporter,
    ) {
        let total = selected.len() as u64;
        for (n, (file, fp)) in selected.into_iter().enumerate() {
            progress.report(SyncProgressEvent::Processing {
                n: n as u64 + 1,
                total,
                file: file.rel_path.clone(),
            });

            let result = self.index_file(&file, fp, records.get(&file.rel_path)).await;
            match result {
                Ok(record) => {
                    tracing::debug!(path = %file.rel_path, chunks = record.chunk_ids.len(), "indexed file");
                    records.insert(file.rel_path.clone(), record);
                    summary.files_processed += 1;
                    summary.files.push(file.rel_path);
                }
                Err(e) => skip(summary, &file.rel_path, e.to_string()),
            }
        }
    }

    /// LOAD, CHUNK+EMBED and INDEX_UPDATE for one file.
    async fn index_file(
        &self,
        file: &ScannedFile,
        fp: Fingerprint,
        previous: Option<&FileRecord>,
    ) -> Result<FileRecord> {
        let path = file.path.clone();
        let source = file.rel_path.clone();
        let documents = tokio::task::spawn_blocking(move || loader::load(&path, &source))
            .await
            .map_err(join_error)?
            .map_err(|source| FolioError::LoadFailure {
                path: file.path.clone(),
                source,
            })?;

        let doc_id = previous
            .and_then(|r| r.doc_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| chunk_text(&doc_id, &doc.text, &doc.provenance, &self.chunk_params))
            .collect();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = i as i64;
        }

        let entries = self.embed_chunks(chunks).await?;
        let new_ids: Vec<String> = entries.iter().map(|e| e.chunk_id.clone()).collect();

        self.index
            .insert(entries)
            .await
            .map_err(FolioError::IndexFailure)?;

        if let Some(prev) = previous {
            let stale: Vec<String> = prev
                .chunk_ids
                .iter()
                .filter(|id| !new_ids.contains(id))
                .cloned()
                .collect();
            retract_stale(self.index.as_ref(), &file.rel_path, &stale, &new_ids).await?;
        }

        let filename = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.rel_path.clone());

        Ok(FileRecord {
            hash: fp.hash,
            mtime: fp.mtime,
            processed_at: Utc::now(),
            filename,
            // A file with no text owns no index entries and so no document.
            doc_id: (!new_ids.is_empty()).then_some(doc_id),
            chunk_ids: new_ids,
        })
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::with_capacity(chunks.len());
        let mut remaining = chunks.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<Chunk> = remaining.by_ref().take(self.batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(FolioError::IndexFailure)?;
            if vectors.len() != batch.len() {
                return Err(FolioError::IndexFailure(anyhow::anyhow!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            tracing::debug!(batch = batch.len(), "embedded chunk batch");
            entries.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector)),
            );
        }
        Ok(entries)
    }

    /// METADATA_COMMIT: persist the index, then the metadata store.
    async fn commit(&self, records: &FileMap, summary: &SyncSummary) -> Result<()> {
        if summary.files_processed == 0 {
            return Ok(());
        }
        self.index
            .persist(&self.storage_dir)
            .await
            .map_err(FolioError::PersistenceFailure)?;
        self.store
            .save(records.clone())
            .await
            .map_err(FolioError::PersistenceFailure)?;
        Ok(())
    }
}

/// True when `fp` differs from what `record` remembers (or there is no record).
pub fn needs_processing(record: Option<&FileRecord>, fp: &Fingerprint) -> bool {
    match record {
        None => true,
        Some(r) => r.hash != fp.hash || r.mtime != fp.mtime,
    }
}

/// Remove `stale` ids once `fresh` ones are in the index. If that fails the
/// fresh ids are withdrawn again so the previous record stays in charge and
/// the next sync retries.
async fn retract_stale(
    index: &dyn VectorIndex,
    path: &str,
    stale: &[String],
    fresh: &[String],
) -> Result<()> {
    let Err(e) = index.delete(stale).await else {
        return Ok(());
    };
    if let Err(rollback) = index.delete(fresh).await {
        tracing::warn!(
            path,
            orphaned = fresh.len(),
            error = %rollback,
            "rollback of new chunks failed"
        );
    }
    Err(FolioError::IndexFailure(e))
}

fn resolve_key(records: &FileMap, filename: &str) -> Option<String> {
    if records.contains_key(filename) {
        return Some(filename.to_string());
    }
    let mut matches = records
        .iter()
        .filter(|(_, r)| r.filename == filename)
        .map(|(k, _)| k);
    match (matches.next(), matches.next()) {
        (Some(key), None) => Some(key.clone()),
        (Some(_), Some(_)) => {
            tracing::warn!(filename, "file name matches several records; use the relative path");
            None
        }
        _ => None,
    }
}

async fn fingerprint_all(
    files: Vec<ScannedFile>,
) -> Result<Vec<(ScannedFile, std::io::Result<Fingerprint>)>> {
    tokio::task::spawn_blocking(move || {
        files
            .into_iter()
            .map(|file| {
                let fp = fingerprint(&file.path);
                (file, fp)
            })
            .collect()
    })
    .await
    .map_err(join_error)
}

fn skip(summary: &mut SyncSummary, path: &str, reason: String) {
    tracing::warn!(path, reason = %reason, "skipped file");
    summary.skipped.push(SkippedFile {
        path: path.to_string(),
        reason,
    });
}

fn join_error(e: tokio::task::JoinError) -> FolioError {
    FolioError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_core::models::ScoredChunk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Index whose deletes always fail, counting the attempts.
    #[derive(Default)]
    struct BrokenDeleteIndex {
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for BrokenDeleteIndex {
        fn dims(&self) -> usize {
            2
        }
        async fn len(&self) -> usize {
            0
        }
        async fn insert(&self, _entries: Vec<IndexEntry>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn query(&self, _vector: &[f32], _k: usize) -> anyhow::Result<Vec<ScoredChunk>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _chunk_ids: &[String]) -> anyhow::Result<usize> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("index is read-only")
        }
        async fn persist(&self, _dir: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn record(hash: &str, mtime: f64, filename: &str) -> FileRecord {
        FileRecord {
            hash: hash.to_string(),
            mtime,
            processed_at: Utc::now(),
            filename: filename.to_string(),
            doc_id: None,
            chunk_ids: Vec::new(),
        }
    }

    #[test]
    fn selection_rule() {
        let fp = Fingerprint {
            hash: "h1".to_string(),
            mtime: 10.5,
        };
        assert!(needs_processing(None, &fp));
        assert!(!needs_processing(Some(&record("h1", 10.5, "a.txt")), &fp));
        assert!(needs_processing(Some(&record("h2", 10.5, "a.txt")), &fp));
        assert!(needs_processing(Some(&record("h1", 11.0, "a.txt")), &fp));
    }

    #[test]
    fn resolve_key_prefers_exact_key_then_unique_name() {
        let mut records = FileMap::new();
        records.insert("a.txt".to_string(), record("h", 1.0, "a.txt"));
        records.insert("sub/b.txt".to_string(), record("h", 1.0, "b.txt"));
        records.insert("x/c.txt".to_string(), record("h", 1.0, "c.txt"));
        records.insert("y/c.txt".to_string(), record("h", 1.0, "c.txt"));

        assert_eq!(resolve_key(&records, "a.txt").as_deref(), Some("a.txt"));
        assert_eq!(resolve_key(&records, "b.txt").as_deref(), Some("sub/b.txt"));
        assert_eq!(resolve_key(&records, "c.txt"), None);
        assert_eq!(resolve_key(&records, "missing.txt"), None);
    }

    #[tokio::test]
    async fn failed_retraction_rolls_back_and_reports() {
        let index = BrokenDeleteIndex::default();
        let err = retract_stale(
            &index,
            "a.txt",
            &["old".to_string()],
            &["new".to_string()],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FolioError::IndexFailure(_)));
        // The stale delete and the rollback were both attempted.
        assert_eq!(index.deletes.load(Ordering::SeqCst), 2);
    }
}
