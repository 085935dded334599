//! Folder Snapshot Cache
//!
//! Keeps the last metadata seen for each folder. A snapshot is only ever
//! compared against fresh metadata to find preview changes; it is never
//! shown to the user, so staleness is harmless.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::namespaced::NamespacedCache;
use super::preview::PreviewCache;
use crate::api::{FileId, FolderId, FolderRecord};
use crate::store::KeyValueStore;

/// Key prefix of the snapshot table
pub const FOLDER_PREFIX: &str = "@folder_";

/// Appended to a folder id for the files the server has no preview for
const NO_PREVIEW_SUFFIX: &str = "_nopreview";

fn no_preview_key(folder_id: FolderId) -> String {
    format!("{}{}", folder_id, NO_PREVIEW_SUFFIX)
}

/// Last-seen folder metadata, one record per folder id
pub struct FolderSnapshotCache {
    table: NamespacedCache,
    /// Cleared along with snapshots on cascading deletes
    previews: Arc<PreviewCache>,
}

impl FolderSnapshotCache {
    pub fn new(store: Arc<dyn KeyValueStore>, previews: Arc<PreviewCache>) -> Self {
        Self {
            table: NamespacedCache::new(store, FOLDER_PREFIX),
            previews,
        }
    }

    /// Replace the snapshot of `folder.id`
    pub async fn store(&self, folder: &FolderRecord) {
        self.table.put_json(&folder.id.to_string(), folder).await;
        debug!(folder_id = folder.id, files = folder.files.len(), "Stored folder snapshot");
    }

    pub async fn get(&self, folder_id: FolderId) -> Option<FolderRecord> {
        self.table.get(&folder_id.to_string()).await
    }

    /// Drop the snapshot and no-preview set of one folder, not its children
    pub async fn forget(&self, folder_id: FolderId) {
        self.table
            .delete_many(&[folder_id.to_string(), no_preview_key(folder_id)])
            .await;
    }

    /// Files of `folder_id` last reported as having no preview
    pub async fn no_preview(&self, folder_id: FolderId) -> HashSet<FileId> {
        self.table
            .get::<Vec<FileId>>(&no_preview_key(folder_id))
            .await
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }

    /// Replace the no-preview set of `folder_id`
    pub async fn set_no_preview(&self, folder_id: FolderId, file_ids: &HashSet<FileId>) {
        let key = no_preview_key(folder_id);
        if file_ids.is_empty() {
            self.table.delete(&key).await;
            return;
        }
        let mut ids: Vec<FileId> = file_ids.iter().copied().collect();
        ids.sort_unstable();
        self.table.put_json(&key, &ids).await;
    }

    /// Delete `folder` and everything cached beneath it
    ///
    /// Every descendant loses its snapshot and previews first, then the
    /// folder's own previews, then its own snapshot. Descendants are
    /// walked with an explicit stack. A descendant's cached snapshot is
    /// preferred over the nested record because it lists that folder's own
    /// files and children.
    pub async fn delete(&self, folder: &FolderRecord) {
        let mut pending: Vec<FolderRecord> = folder.subfolders.clone();
        let mut visited: HashSet<FolderId> = HashSet::from([folder.id]);
        let mut descendants = 0usize;

        while let Some(nested) = pending.pop() {
            if !visited.insert(nested.id) {
                continue;
            }

            let cached = self.get(nested.id).await;
            let mut file_ids: HashSet<FileId> = nested.file_ids().collect();
            if let Some(cached) = &cached {
                file_ids.extend(cached.file_ids());
                pending.extend(cached.subfolders.iter().cloned());
            }
            pending.extend(nested.subfolders);

            let file_ids: Vec<FileId> = file_ids.into_iter().collect();
            self.previews.delete_multiple(&file_ids).await;
            self.forget(nested.id).await;
            descendants += 1;
        }

        self.previews.delete_for_folder(folder).await;
        self.forget(folder.id).await;

        info!(
            folder_id = folder.id,
            descendants = descendants,
            "Deleted folder caches"
        );
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

    fn caches() -> (Arc<PreviewCache>, FolderSnapshotCache) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let previews = Arc::new(PreviewCache::new(store.clone()));
        let snapshots = FolderSnapshotCache::new(store, previews.clone());
        (previews, snapshots)
    }

    fn file(id: FileId) -> FileRecord {
        FileRecord::new(id, format!("file{}", id)).with_type("Image")
    }

    #[tokio::test]
    async fn test_store_replaces_previous_snapshot() {
        let (_, snapshots) = caches();
        assert_eq!(snapshots.get(4).await, None);

        let first = FolderRecord::new(4, "docs").with_files(vec![file(1), file(2)]);
        snapshots.store(&first).await;
        assert_eq!(snapshots.get(4).await, Some(first));

        let second = FolderRecord::new(4, "docs").with_files(vec![file(3)]);
        snapshots.store(&second).await;
        assert_eq!(snapshots.get(4).await, Some(second));
    }

    #[tokio::test]
    async fn test_snapshots_do_not_collide_with_previews() {
        let (previews, snapshots) = caches();
        previews.store(4, "AAAA").await;
        snapshots.store(&FolderRecord::new(4, "docs")).await;

        assert_eq!(previews.get(4).await.as_deref(), Some("AAAA"));
        assert_eq!(snapshots.get(4).await.map(|f| f.id), Some(4));
    }

    #[tokio::test]
    async fn test_no_preview_set_is_dropped_with_snapshot() {
        let (_, snapshots) = caches();
        assert!(snapshots.no_preview(4).await.is_empty());

        snapshots.store(&FolderRecord::new(4, "docs")).await;
        snapshots.set_no_preview(4, &HashSet::from([3, 1])).await;
        assert_eq!(snapshots.no_preview(4).await, HashSet::from([1, 3]));
        assert_eq!(snapshots.get(4).await.map(|f| f.id), Some(4));

        snapshots.forget(4).await;
        assert!(snapshots.no_preview(4).await.is_empty());
        assert_eq!(snapshots.get(4).await, None);
    }

    #[tokio::test]
    async fn test_cascading_delete() {
        let (previews, snapshots) = caches();

        // root(1) -> child(2) -> grandchild(3); the grandchild is only
        // known through the child's own snapshot
        let grandchild = FolderRecord::new(3, "deep").with_files(vec![file(30)]);
        let child = FolderRecord::new(2, "child")
            .with_files(vec![file(20)])
            .with_subfolders(vec![grandchild.clone()]);
        let root = FolderRecord::new(1, "root")
            .with_files(vec![file(10)])
            .with_subfolders(vec![FolderRecord::new(2, "child")]);

        for folder in [&root, &child, &grandchild] {
            snapshots.store(folder).await;
        }
        for id in [10, 20, 30] {
            previews.store(id, "AAAA").await;
        }
        let unrelated = FolderRecord::new(9, "other").with_files(vec![file(90)]);
        snapshots.store(&unrelated).await;
        previews.store(90, "ZZZZ").await;

        snapshots.delete(&root).await;

        for id in [1, 2, 3] {
            assert_eq!(snapshots.get(id).await, None, "snapshot {} survived", id);
        }
        for id in [10, 20, 30] {
            assert_eq!(previews.get(id).await, None, "preview {} survived", id);
        }
        assert_eq!(snapshots.get(9).await, Some(unrelated));
        assert_eq!(previews.get(90).await.as_deref(), Some("ZZZZ"));
    }

    #[tokio::test]
    async fn test_cascading_delete_survives_cycles() {
        let (_, snapshots) = caches();
        // A corrupt snapshot that lists its own parent as a child
        let child = FolderRecord::new(2, "child").with_subfolders(vec![FolderRecord::new(1, "root")]);
        let root = FolderRecord::new(1, "root").with_subfolders(vec![child.clone()]);
        snapshots.store(&root).await;
        snapshots.store(&child).await;

        snapshots.delete(&root).await;
        assert_eq!(snapshots.get(1).await, None);
        assert_eq!(snapshots.get(2).await, None);
    }

    #[tokio::test]
    async fn test_failing_store_reads_as_absent() {
        let store: Arc<dyn KeyValueStore> = Arc::new(FailingStore);
        let previews = Arc::new(PreviewCache::new(store.clone()));
        let snapshots = FolderSnapshotCache::new(store, previews);

        let folder = FolderRecord::new(1, "root").with_files(vec![file(1)]);
        snapshots.store(&folder).await;
        assert_eq!(snapshots.get(1).await, None);
        snapshots.delete(&folder).await;
    }
}
