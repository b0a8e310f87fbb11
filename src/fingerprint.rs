//! Content fingerprints used to detect changed files.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 4096;

/// Hash and modification time of a file at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256 of the file contents.
    pub hash: String,
    /// Modification time in fractional seconds since the Unix epoch.
    pub mtime: f64,
}

/// Fingerprint `path`, streaming the contents in fixed-size blocks.
pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    let modified = file.metadata()?.modified()?;
    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    Ok(Fingerprint {
        hash: format!("{:x}", hasher.finalize()),
        mtime,
    })
}
