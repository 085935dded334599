//! On-disk key-value store
//!
//! Keeps one file per key under a cache directory. File names are the SHA1
//! of the key so arbitrary key text never touches the filesystem. Writes go
//! through a temp file and a rename, so a reader sees either the old value
//! or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use super::{KeyValueStore, StoreError, StoreResult};

/// Extension of committed entries
const ENTRY_EXTENSION: &str = "entry";

/// Extension of in-flight writes
const TEMP_EXTENSION: &str = "tmp";

/// File-per-key [`KeyValueStore`]
pub struct DiskStore {
    /// Root directory for entries
    root: PathBuf,
}

impl DiskStore {
    /// Open the store in the platform cache directory
    pub fn new() -> Result<Self> {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("fileserver-preview-sync");

        Self::open(root)
    }

    /// Open (or create) a store rooted at `root`
    pub fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store directory: {:?}", root))?;

        let store = Self { root };

        // Writes interrupted by a crash leave temp files behind
        store.cleanup();

        info!(root = %store.root.display(), "Disk store initialized");
        Ok(store)
    }

    /// Remove stale temp files left by interrupted writes
    pub fn cleanup(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.root) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of committed entries
    pub fn entry_count(&self) -> usize {
        fs::read_dir(&self.root)
            .map(|read_dir| {
                read_dir
                    .flatten()
                    .filter(|entry| {
                        entry
                            .path()
                            .extension()
                            .is_some_and(|ext| ext == ENTRY_EXTENSION)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        let name = format!("{:x}.{}", hasher.finalize(), ENTRY_EXTENSION);
        self.root.join(name)
    }
}

/// Write `value` to `path` atomically
fn write_atomic(root: &Path, path: &Path, value: &str) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .suffix(&format!(".{}", TEMP_EXTENSION))
        .tempfile_in(root)?;
    tmp.write_all(value.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for DiskStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.entry_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let root = self.root.clone();
        let path = self.entry_path(key);
        let value = value.to_string();

        tokio::task::spawn_blocking(move || write_atomic(&root, &path, &value))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        debug!(key = key, "Stored entry on disk");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().to_path_buf()).unwrap();

        assert_eq!(store.get("@preview_1").await.unwrap(), None);

        store.set("@preview_1", "aGVsbG8=").await.unwrap();
        assert_eq!(
            store.get("@preview_1").await.unwrap(),
            Some("aGVsbG8=".to_string())
        );

        store.set("@preview_1", "d29ybGQ=").await.unwrap();
        assert_eq!(
            store.get("@preview_1").await.unwrap(),
            Some("d29ybGQ=".to_string())
        );

        store.delete("@preview_1").await.unwrap();
        assert_eq!(store.get("@preview_1").await.unwrap(), None);
        store.delete("@preview_1").await.unwrap();
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path().to_path_buf()).unwrap();
            store.set("@folder_3", r#"{"id":3}"#).await.unwrap();
        }
        let store = DiskStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            store.get("@folder_3").await.unwrap(),
            Some(r#"{"id":3}"#.to_string())
        );
    }

    #[test]
    fn test_cleanup_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("leftover.tmp");
        fs::write(&stale, "partial").unwrap();

        let _store = DiskStore::open(dir.path().to_path_buf()).unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_entry_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.entry_count(), 0);

        store.set("@preview_1", "AAAA").await.unwrap();
        store.set("@preview_2", "BBBB").await.unwrap();
        store.set("@preview_2", "CCCC").await.unwrap();
        assert_eq!(store.entry_count(), 2);

        store.delete("@preview_1").await.unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_entry_paths_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().to_path_buf()).unwrap();
        assert_ne!(store.entry_path("@preview_1"), store.entry_path("@folder_1"));
        assert!(store.entry_path("a/../b").starts_with(dir.path()));
    }
}
