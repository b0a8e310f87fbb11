//! Walks the watched root and lists supported documents.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the loader understands, lowercase without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "md", "txt", "csv"];

/// A supported file found under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the root with `/` separators. Used as the metadata key.
    pub rel_path: String,
}

/// True when `name` ends in one of [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(name: &str) -> bool {
    extension_of(name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lowercase extension of `name`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Relative key for `path` under `root`, or `None` if it lies outside.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// List every supported regular file under `root`, sorted by relative path.
pub fn scan_root(root: &Path) -> Result<Vec<ScannedFile>> {
    if !root.exists() {
        bail!("Watched root does not exist: {}", root.display());
    }

    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/.*".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(rel_path) = relative_key(root, path) else {
            continue;
        };

        if exclude_set.is_match(&rel_path) || !is_supported(&rel_path) {
            continue;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            rel_path,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("a.MD"), "a").unwrap();
        std::fs::write(root.join("sub/c.csv"), "x,y").unwrap();
        std::fs::write(root.join("image.png"), [0u8; 4]).unwrap();
        std::fs::write(root.join(".hidden.txt"), "h").unwrap();

        let files = scan_root(root).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(keys, vec!["a.MD", "b.txt", "sub/c.csv"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_root(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn supported_extension_is_case_insensitive() {
        assert!(is_supported("Report.PDF"));
        assert!(is_supported("notes.docx"));
        assert!(!is_supported("archive.zip"));
        assert!(!is_supported("README"));
    }

    #[test]
    fn relative_key_uses_forward_slashes() {
        let root = Path::new("/data");
        let path = root.join("a").join("b.txt");
        assert_eq!(relative_key(root, &path).as_deref(), Some("a/b.txt"));
        assert_eq!(relative_key(root, Path::new("/other/x.txt")), None);
    }
}
