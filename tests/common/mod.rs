//! Shared fixtures for integration tests: deterministic providers, a
//! temp-dir config, and minimal PDF / DOCX builders.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use folio::config::Config;
use folio::sync::Library;
use folio_core::embedding::Embedder;
use folio_core::generation::{ChatMessage, Generator, Role};
use tempfile::TempDir;

pub const DIMS: usize = 16;

/// Bag-of-words embedder: each lowercase word bumps one of `DIMS` buckets.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for word in t.split_whitespace() {
                    let word = word.to_lowercase();
                    let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % DIMS;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Embedder that always fails, to exercise per-file skipping.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

/// Generator that answers with the grounding context it was given.
pub struct ContextEchoGenerator;

#[async_trait]
impl Generator for ContextEchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

/// Generator that fails the way a misconfigured provider does, with
/// credentials and paths in the error text.
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("OpenAI API error 401 Unauthorized: Incorrect API key provided: sk-abc123 at /srv/internal/path")
    }
}

/// Config rooted in `tmp`: documents in `docs/`, state in `storage/`.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::minimal();
    cfg.storage.data_dir = tmp.path().join("docs");
    cfg.storage.storage_dir = tmp.path().join("storage");
    cfg.embedding.batch_size = 4;
    cfg
}

pub async fn open_library(cfg: &Config) -> Library {
    Library::open(cfg, Arc::new(HashEmbedder::default()))
        .await
        .unwrap()
}

/// Minimal one-page PDF whose text is "demo test phrase".
pub fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 48 >> stream\nBT /F1 12 Tf 100 700 Td (demo test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal DOCX holding one paragraph per entry of `paragraphs`.
pub fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}
