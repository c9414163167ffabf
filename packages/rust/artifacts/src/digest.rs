//! SHA-256 content digests used as cache keys and manifest checksums.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use headway_shared::{HeadwayError, Result};

use crate::artifact::sorted_entries;

/// Hex SHA-256 of a single file, streamed.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_file_into(&mut hasher, path)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 over a file, or over every file under a directory keyed by its
/// relative path. Independent of filesystem iteration order.
pub fn content_digest(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path).map_err(|e| HeadwayError::io(path, e))?;
    if meta.is_file() {
        return file_digest(path);
    }

    let mut hasher = Sha256::new();
    for entry in sorted_entries(path)? {
        let full = path.join(&entry);
        if full.is_file() {
            hasher.update(entry.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(file_digest(&full)?.as_bytes());
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_file_into(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| HeadwayError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| HeadwayError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}
