//! Preview Cache
//!
//! Base64 file previews keyed by file id, with bulk operations scoped to
//! the files currently listed in a folder.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::debug;

use super::namespaced::NamespacedCache;
use crate::api::{FileId, FolderPreviews, FolderRecord};
use crate::store::KeyValueStore;

/// Key prefix of the preview table
pub const PREVIEW_PREFIX: &str = "@preview_";

/// Per-file preview cache
pub struct PreviewCache {
    table: NamespacedCache,
}

impl PreviewCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            table: NamespacedCache::new(store, PREVIEW_PREFIX),
        }
    }

    pub async fn store(&self, file_id: FileId, preview: &str) {
        self.table.put(&file_id.to_string(), preview).await;
    }

    pub async fn get(&self, file_id: FileId) -> Option<String> {
        self.table.get(&file_id.to_string()).await
    }

    /// Cached previews for every file listed in `folder`
    ///
    /// Files without a cached preview are left out. An empty map means
    /// nothing is cached for the folder and a refill is needed.
    pub async fn get_for_folder(&self, folder: &FolderRecord) -> FolderPreviews {
        let keys: Vec<String> = folder.file_ids().map(|id| id.to_string()).collect();
        if keys.is_empty() {
            return FolderPreviews::new();
        }

        let previews: FolderPreviews = self
            .table
            .get_many(&keys)
            .await
            .into_iter()
            .zip(folder.file_ids())
            .filter_map(|((_, value), id)| {
                value
                    .and_then(|v| v.into_typed::<String>().ok())
                    .map(|preview| (id, preview))
            })
            .collect();

        debug!(
            folder_id = folder.id,
            files = keys.len(),
            cached = previews.len(),
            "Read folder previews from cache"
        );
        previews
    }

    /// Write every preview in `previews`
    pub async fn store_for_folder(&self, previews: &FolderPreviews) {
        join_all(
            previews
                .iter()
                .map(|(id, preview)| self.store(*id, preview)),
        )
        .await;
        debug!(count = previews.len(), "Stored previews");
    }

    /// Write `previews` in the background
    ///
    /// Await the handle only when a following read must observe the writes.
    pub fn spawn_store_for_folder(self: &Arc<Self>, previews: FolderPreviews) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move { cache.store_for_folder(&previews).await })
    }

    /// Drop the previews of every file listed in `folder`
    pub async fn delete_for_folder(&self, folder: &FolderRecord) {
        let ids: Vec<FileId> = folder.file_ids().collect();
        self.delete_multiple(&ids).await;
        debug!(folder_id = folder.id, count = ids.len(), "Invalidated folder previews");
    }

    pub async fn delete_multiple(&self, file_ids: &[FileId]) {
        let keys: Vec<String> = file_ids.iter().map(|id| id.to_string()).collect();
        self.table.delete_many(&keys).await;
    }

    pub fn stats(&self) -> (u64, u64, f64) {
        self.table.stats()
    }

    pub fn log_metrics(&self) {
        self.table.log_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FileRecord;
    use crate::cache::test_support::FailingStore;
    use crate::store::MemoryStore;

    fn folder(ids: &[FileId]) -> FolderRecord {
        FolderRecord::new(10, "pics").with_files(
            ids.iter()
                .map(|id| FileRecord::new(*id, format!("{}.png", id)).with_type("Image"))
                .collect(),
        )
    }

    fn previews(pairs: &[(FileId, &str)]) -> FolderPreviews {
        pairs.iter().map(|(id, p)| (*id, p.to_string())).collect()
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.get(1).await, None);

        cache.store(1, "aGVsbG8=").await;
        assert_eq!(cache.get(1).await.as_deref(), Some("aGVsbG8="));
    }

    #[tokio::test]
    async fn test_get_for_folder_omits_uncached() {
        let cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        let folder = folder(&[1, 2, 3]);

        assert!(cache.get_for_folder(&folder).await.is_empty());

        cache.store_for_folder(&previews(&[(1, "AAAA"), (3, "CCCC")])).await;
        assert_eq!(
            cache.get_for_folder(&folder).await,
            previews(&[(1, "AAAA"), (3, "CCCC")])
        );
    }

    #[tokio::test]
    async fn test_get_for_folder_ignores_files_outside_folder() {
        let cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        cache.store(99, "ZZZZ").await;
        cache.store(1, "AAAA").await;

        assert_eq!(
            cache.get_for_folder(&folder(&[1])).await,
            previews(&[(1, "AAAA")])
        );
    }

    #[tokio::test]
    async fn test_delete_for_folder_empties_folder() {
        let cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        let folder = folder(&[1, 2]);
        cache.store_for_folder(&previews(&[(1, "AAAA"), (2, "BBBB"), (7, "other")])).await;

        cache.delete_for_folder(&folder).await;
        assert!(cache.get_for_folder(&folder).await.is_empty());
        // Files of other folders are untouched
        assert_eq!(cache.get(7).await.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_delete_multiple() {
        let cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        cache.store_for_folder(&previews(&[(1, "AAAA"), (2, "BBBB"), (3, "CCCC")])).await;

        cache.delete_multiple(&[1, 3]).await;
        assert_eq!(cache.get(1).await, None);
        assert_eq!(cache.get(2).await.as_deref(), Some("BBBB"));
        assert_eq!(cache.get(3).await, None);
    }

    #[tokio::test]
    async fn test_spawned_store_is_visible_after_join() {
        let cache = Arc::new(PreviewCache::new(Arc::new(MemoryStore::new())));
        cache
            .spawn_store_for_folder(previews(&[(5, "EEEE")]))
            .await
            .unwrap();
        assert_eq!(cache.get(5).await.as_deref(), Some("EEEE"));
    }

    #[tokio::test]
    async fn test_failing_store_reads_as_empty() {
        let cache = PreviewCache::new(Arc::new(FailingStore));
        cache.store(1, "AAAA").await;
        assert_eq!(cache.get(1).await, None);
        assert!(cache.get_for_folder(&folder(&[1, 2])).await.is_empty());
        cache.delete_for_folder(&folder(&[1])).await;
    }
}
