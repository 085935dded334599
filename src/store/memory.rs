//! In-memory store backed by Moka
//!
//! Nothing survives the process. Used for tests and for running the
//! sync layer without a cache directory.

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::trace;

use super::{KeyValueStore, StoreResult};

/// Moka-backed [`KeyValueStore`]
pub struct MemoryStore {
    entries: Cache<String, String>,
}

impl MemoryStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().name("preview_sync_memory_store").build(),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self.entries.get(key);
        trace!(key = key, found = value.is_some(), "Memory store read");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.invalidate(key);
        Ok(())
    }
}
