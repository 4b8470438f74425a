// src/store/cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::store::fingerprint::fingerprint;
use crate::types::HashAlgorithm;

/// In-memory cache of source-input fingerprints.
///
/// Many tasks commonly read the same source raster; with BLAKE3 hashing this
/// avoids re-reading it once per task. Entries are only valid while the
/// source is not being written, so the scheduler clears the cache at the
/// start of every join.
#[derive(Debug)]
pub struct FingerprintCache {
    algorithm: HashAlgorithm,
    /// `None` records that the path did not exist.
    entries: HashMap<PathBuf, Option<String>>,
}

impl FingerprintCache {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            entries: HashMap::new(),
        }
    }

    /// Fingerprint of `path`, or `None` if it does not exist locally.
    pub fn get_or_compute(&mut self, path: &Path) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(path) {
            return Ok(entry.clone());
        }

        debug!("cache miss: fingerprinting {:?}", path);
        let entry = if path.exists() {
            Some(fingerprint(path, self.algorithm)?)
        } else {
            None
        };
        self.entries.insert(path.to_path_buf(), entry.clone());
        Ok(entry)
    }

    /// Forget the cached fingerprint for a path.
    pub fn invalidate(&mut self, path: &Path) {
        if self.entries.remove(path).is_some() {
            debug!("invalidated fingerprint cache for {:?}", path);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn caches_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.tif");
        fs::write(&path, b"v1").unwrap();

        let mut cache = FingerprintCache::new(HashAlgorithm::Blake3);
        let first = cache.get_or_compute(&path).unwrap();

        fs::write(&path, b"v2").unwrap();
        assert_eq!(cache.get_or_compute(&path).unwrap(), first);

        cache.invalidate(&path);
        assert_ne!(cache.get_or_compute(&path).unwrap(), first);
    }

    #[test]
    fn absent_paths_are_cached_as_none() {
        let mut cache = FingerprintCache::new(HashAlgorithm::SizeTimestamp);
        let remote = Path::new("/vsicurl/https://example.com/a.tif");
        assert_eq!(cache.get_or_compute(remote).unwrap(), None);
        assert_eq!(cache.len(), 1);
    }
}
