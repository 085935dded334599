//! Key-value store adapters
//!
//! The caches sit on top of a plain asynchronous string-to-string store.
//! Adapters only move bytes; prefixing, case folding and error swallowing
//! happen one layer up in [`crate::cache::NamespacedCache`].

pub mod disk;
pub mod memory;

use async_trait::async_trait;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Errors raised by a store adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable asynchronous string-keyed storage
///
/// Keys are passed through untouched. The bulk operations default to
/// one call per key; adapters with a native batch primitive override them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Read several keys, preserving the order of `keys`
    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push((key.clone(), self.get(key).await?));
        }
        Ok(values)
    }

    /// Remove several keys
    async fn multi_delete(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}
