//! Preview and folder snapshot caches
//!
//! Two logical tables share one physical key-value store and are kept
//! apart by fixed key prefixes.

pub mod namespaced;
pub mod preview;
pub mod snapshot;

pub use namespaced::{CacheValue, NamespacedCache};
pub use preview::{PreviewCache, PREVIEW_PREFIX};
pub use snapshot::{FolderSnapshotCache, FOLDER_PREFIX};

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use crate::store::{KeyValueStore, StoreError, StoreResult};

    /// Store whose every operation fails
    pub struct FailingStore;

    fn unavailable<T>() -> StoreResult<T> {
        Err(StoreError::Unavailable("simulated store failure".to_string()))
    }

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            unavailable()
        }

        async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
            unavailable()
        }

        async fn delete(&self, _key: &str) -> StoreResult<()> {
            unavailable()
        }
    }
}
