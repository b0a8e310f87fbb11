//! Turns files on disk into [`DocumentRecord`]s.
//!
//! Dispatch is by lowercase extension. PDFs yield one record per page;
//! every other format yields a single record. Failures are per-file: the
//! pipeline records the file as skipped and moves on.

use std::io::Read;
use std::path::Path;

use chrono::Utc;
use folio_core::models::{DocumentRecord, Provenance};

use crate::scan::extension_of;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
}

/// Load `path`, labelling records with `source` (the relative key).
pub fn load(path: &Path, source: &str) -> Result<Vec<DocumentRecord>, LoadError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string());
    let ext = extension_of(&filename).unwrap_or_default();

    let texts = match ext.as_str() {
        "pdf" => extract_pdf(&std::fs::read(path)?)?,
        "docx" => vec![extract_docx(&std::fs::read(path)?)?],
        "md" | "txt" => vec![String::from_utf8_lossy(&std::fs::read(path)?).into_owned()],
        "csv" => vec![extract_csv(&std::fs::read(path)?)?],
        _ => return Err(LoadError::UnsupportedFormat(filename)),
    };

    let loaded_at = Utc::now();
    Ok(texts
        .into_iter()
        .map(|text| DocumentRecord {
            text,
            provenance: Provenance {
                source: source.to_string(),
                filename: filename.clone(),
                loaded_at,
            },
        })
        .collect())
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    Ok(pages
        .iter()
        .map(|page| page.trim())
        .filter(|page| !page.is_empty())
        .map(str::to_string)
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&doc_xml)
}

/// Concatenate `w:t` runs, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, LoadError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| LoadError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join("\n"))
}

fn extract_csv(bytes: &[u8]) -> Result<String, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LoadError::Csv(e.to_string()))?;
        let line = record.iter().map(str::trim).collect::<Vec<_>>().join(", ");
        if !line.trim_matches([',', ' ']).is_empty() {
            lines.push(line);
        }
    }
    Ok(lines.join("\n"))
}
