//! Resumable build cache.
//!
//! The cache is the set of views that succeeded in previous, not fully
//! successful runs. Views in it are not rebuilt on the next run. A run in
//! which nothing failed or was skipped clears it, which on disk means the
//! cache file is removed.
//!
//! The file is a postcard-encoded, versioned envelope holding the keys.

use crate::backend::StorageError;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_core::{CoreResult, ViewKey};
use tracing::{debug, info};

/// Default cache file name
pub const DEFAULT_CACHE_PATH: &str = ".strata_cache.bin";

/// Current cache format version
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    keys: Vec<ViewKey>,
}

/// Persistent cache of succeeded views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    path: PathBuf,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH)
    }
}

impl CacheStore {
    /// Create a store at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached set; `fresh` ignores whatever is on disk
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or decoded
    pub fn load(&self, fresh: bool) -> CoreResult<IndexSet<ViewKey>> {
        if fresh || !self.path.exists() {
            return Ok(IndexSet::new());
        }

        let bytes = std::fs::read(&self.path)?;
        let envelope: CacheEnvelope = postcard::from_bytes(&bytes)?;
        if envelope.version != CACHE_FORMAT_VERSION {
            return Err(StorageError::CacheVersion {
                found: envelope.version,
                expected: CACHE_FORMAT_VERSION,
            }
            .into());
        }

        debug!(path = %self.path.display(), count = envelope.keys.len(), "Loaded cache");
        Ok(envelope.keys.into_iter().collect())
    }

    /// Persist `keys`; an empty set removes the file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written or removed
    pub fn save(&self, keys: &IndexSet<ViewKey>) -> CoreResult<()> {
        if keys.is_empty() {
            return self.clear();
        }

        let envelope = CacheEnvelope {
            version: CACHE_FORMAT_VERSION,
            keys: keys.iter().cloned().collect(),
        };
        let bytes = postcard::to_allocvec(&envelope)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), count = keys.len(), "Saved cache");
        Ok(())
    }

    /// Remove the cache file if present
    ///
    /// # Errors
    ///
    /// Returns error if the file exists and cannot be removed
    pub fn clear(&self) -> CoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Cache content after a run.
///
/// Empty when nothing failed or was skipped; otherwise the previous cache
/// plus this run's successes, minus anything that failed or was skipped.
#[must_use]
pub fn next_cache(
    previous: &IndexSet<ViewKey>,
    succeeded: &IndexSet<ViewKey>,
    failed_or_skipped: &IndexSet<ViewKey>,
) -> IndexSet<ViewKey> {
    if failed_or_skipped.is_empty() {
        return IndexSet::new();
    }
    previous
        .union(succeeded)
        .filter(|k| !failed_or_skipped.contains(*k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    fn set(keys: &[&str]) -> IndexSet<ViewKey> {
        keys.iter().map(|k| key(k)).collect()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.bin"));
        assert!(store.load(false).unwrap().is_empty());
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("nested/cache.bin"));
        store.save(&set(&["s.a", "s.b"])).unwrap();
        assert_eq!(store.load(false).unwrap(), set(&["s.a", "s.b"]));
        assert!(store.load(true).unwrap().is_empty());
    }

    #[test]
    fn test_empty_save_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.bin"));
        store.save(&set(&["s.a"])).unwrap();
        assert!(store.path().exists());
        store.save(&IndexSet::new()).unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.bin"));
        let bytes = postcard::to_allocvec(&CacheEnvelope {
            version: 99,
            keys: vec![key("s.a")],
        })
        .unwrap();
        std::fs::write(store.path(), bytes).unwrap();
        assert!(store.load(false).is_err());
        assert!(store.load(true).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.bin"));
        std::fs::write(store.path(), [0xff, 0xff, 0xff]).unwrap();
        assert!(store.load(false).is_err());
    }

    #[test]
    fn test_next_cache_resumes() {
        // Run 1: A ok, B failed, C skipped
        let after_first = next_cache(&IndexSet::new(), &set(&["s.a"]), &set(&["s.b", "s.c"]));
        assert_eq!(after_first, set(&["s.a"]));

        // Run 2: A cached, B fails again
        let after_second = next_cache(&after_first, &IndexSet::new(), &set(&["s.b", "s.c"]));
        assert_eq!(after_second, set(&["s.a"]));

        // Run 3: B and C succeed
        let after_third = next_cache(&after_second, &set(&["s.b", "s.c"]), &IndexSet::new());
        assert!(after_third.is_empty());
    }

    #[test]
    fn test_next_cache_drops_rebuilt_failures() {
        let previous = set(&["s.a", "s.b"]);
        let next = next_cache(&previous, &set(&["s.c"]), &set(&["s.b"]));
        assert_eq!(next, set(&["s.a", "s.c"]));
    }
}
