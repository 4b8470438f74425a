// src/store/fingerprint.rs

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::types::HashAlgorithm;

/// Compute the BLAKE3 hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Fingerprint an existing file with the given algorithm.
///
/// The algorithm name is part of the fingerprint, so switching algorithms
/// invalidates every record instead of comparing unlike values.
pub fn fingerprint(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    match algorithm {
        HashAlgorithm::SizeTimestamp => {
            let meta = fs::metadata(path)
                .with_context(|| format!("reading metadata of {:?}", path))?;
            let mtime = meta
                .modified()
                .with_context(|| format!("reading mtime of {:?}", path))?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(format!("sizetimestamp:{}:{}", meta.len(), mtime))
        }
        HashAlgorithm::Blake3 => Ok(format!("blake3:{}", compute_file_hash(path)?)),
    }
}
