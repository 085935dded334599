//! Sync policy
//!
//! Decides how to repopulate a folder's previews after its file list
//! changed. Small changes are fetched file by file; large ones, or a
//! folder seen for the first time, use a single bulk request so the
//! server is never flooded.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::delta::compute_delta;
use super::SyncSettings;
use crate::api::{FileId, FolderPreviews, FolderRecord, PreviewSource};
use crate::cache::{FolderSnapshotCache, PreviewCache};

/// How a reconciliation refetched previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchStrategy {
    /// No snapshot to compare against; the whole folder was fetched
    Full,
    /// One request per file
    PerFile,
    /// One bulk request for the folder
    Bulk,
}

impl fmt::Display for RefetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::PerFile => "per-file",
            Self::Bulk => "bulk",
        };
        f.write_str(name)
    }
}

/// Outcome of one reconciliation
///
/// All id lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub strategy: RefetchStrategy,
    /// Previews fetched and cached
    pub fetched: Vec<FileId>,
    /// Files the server has no preview for
    pub missing: Vec<FileId>,
    /// Files whose preview could not be fetched this time
    pub failed: Vec<FileId>,
    /// Stale previews dropped before refetching
    pub evicted: Vec<FileId>,
}

impl ReconcileReport {
    fn new(strategy: RefetchStrategy) -> Self {
        Self {
            strategy,
            fetched: Vec::new(),
            missing: Vec::new(),
            failed: Vec::new(),
            evicted: Vec::new(),
        }
    }

    /// Some previews are unavailable and worth retrying later
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    fn finish(mut self) -> Self {
        for ids in [
            &mut self.fetched,
            &mut self.missing,
            &mut self.failed,
            &mut self.evicted,
        ] {
            ids.sort_unstable();
        }
        self
    }
}

/// Keeps the preview cache consistent with a folder's current files
pub struct SyncPolicy {
    previews: Arc<PreviewCache>,
    snapshots: Arc<FolderSnapshotCache>,
    source: Arc<dyn PreviewSource>,
    settings: SyncSettings,
}

impl SyncPolicy {
    pub fn new(
        previews: Arc<PreviewCache>,
        snapshots: Arc<FolderSnapshotCache>,
        source: Arc<dyn PreviewSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            previews,
            snapshots,
            source,
            settings,
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Bring the preview cache in line with `folder`
    ///
    /// `snapshot` is the folder as it was last seen, if ever. Afterwards
    /// every file of `folder` has either a fresh cached preview or none at
    /// all. Network failures never escape; they are listed in the report.
    pub async fn reconcile(
        &self,
        folder: &FolderRecord,
        snapshot: Option<&FolderRecord>,
    ) -> ReconcileReport {
        let report = match snapshot {
            None => {
                // Nothing to diff against, so every cached preview of the folder is suspect
                let wanted: Vec<FileId> = folder.file_ids().collect();
                self.previews.delete_multiple(&wanted).await;

                let mut report = self
                    .refetch_bulk(folder, RefetchStrategy::Full, wanted.clone())
                    .await;
                report.evicted = wanted;
                report
            }
            Some(snapshot) => {
                let delta = compute_delta(&snapshot.files, &folder.files);
                let evicted = delta.to_evict();
                // Stale entries go first so a failed refetch leaves a gap, not a wrong preview
                self.previews.delete_multiple(&evicted).await;

                let wanted: Vec<FileId> = delta.to_refetch().iter().map(|f| f.id).collect();
                let mut report = if wanted.len() > self.settings.bulk_threshold {
                    self.refetch_bulk(folder, RefetchStrategy::Bulk, wanted).await
                } else {
                    self.refetch_each(wanted).await
                };
                report.evicted = evicted;
                report
            }
        }
        .finish();

        self.record_no_preview(folder, &report).await;

        info!(
            folder_id = folder.id,
            strategy = %report.strategy,
            fetched = report.fetched.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            evicted = report.evicted.len(),
            "Reconciled folder previews"
        );
        report
    }

    /// One bulk request, keeping only previews of files now in the folder
    async fn refetch_bulk(
        &self,
        folder: &FolderRecord,
        strategy: RefetchStrategy,
        wanted: Vec<FileId>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::new(strategy);
        let current: HashSet<FileId> = folder.file_ids().collect();

        match self.source.fetch_folder_previews_bulk(folder.id).await {
            Ok(mut previews) => {
                previews.retain(|id, _| current.contains(id));
                for id in wanted {
                    if previews.contains_key(&id) {
                        report.fetched.push(id);
                    } else {
                        report.missing.push(id);
                    }
                }

                if let Err(e) = self.previews.spawn_store_for_folder(previews).await {
                    warn!(folder_id = folder.id, error = %e, "Bulk preview write task failed");
                }
            }
            Err(e) => {
                warn!(
                    folder_id = folder.id,
                    error = %e,
                    "Bulk preview fetch failed, dropping snapshot"
                );
                // Without a snapshot the next visit refills the whole folder
                self.snapshots.forget(folder.id).await;
                report.failed = wanted;
            }
        }
        report
    }

    /// Remember which files of `folder` the server has no preview for
    ///
    /// Ids touched by this reconciliation take their new outcome; earlier
    /// entries for untouched files still in the folder are kept.
    async fn record_no_preview(&self, folder: &FolderRecord, report: &ReconcileReport) {
        let current: HashSet<FileId> = folder.file_ids().collect();
        let touched: HashSet<FileId> = report
            .fetched
            .iter()
            .chain(&report.failed)
            .chain(&report.evicted)
            .copied()
            .collect();

        let mut no_preview = match report.strategy {
            RefetchStrategy::Full => HashSet::new(),
            _ => self.snapshots.no_preview(folder.id).await,
        };
        no_preview.retain(|id| current.contains(id) && !touched.contains(id));
        no_preview.extend(report.missing.iter().copied());

        self.snapshots.set_no_preview(folder.id, &no_preview).await;
    }

    /// Fetch each preview individually with bounded concurrency
    async fn refetch_each(&self, wanted: Vec<FileId>) -> ReconcileReport {
        let mut report = ReconcileReport::new(RefetchStrategy::PerFile);
        if wanted.is_empty() {
            return report;
        }

        let limit = self.settings.max_concurrent_fetches.max(1);
        let source = Arc::clone(&self.source);
        let results: Vec<_> = stream::iter(wanted)
            .map(move |id| {
                let source = Arc::clone(&source);
                async move { (id, source.fetch_file_preview(id).await) }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut fetched = FolderPreviews::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(Some(preview)) => {
                    fetched.insert(id, preview);
                }
                Ok(None) => {
                    debug!(file_id = id, "Server has no preview");
                    report.missing.push(id);
                }
                Err(e) => {
                    warn!(file_id = id, error = %e, "Preview fetch failed");
                    report.failed.push(id);
                }
            }
        }

        self.previews.store_for_folder(&fetched).await;
        report.fetched = fetched.into_keys().collect();
        report
    }

    /// Previews for `folder`, refreshing the cache first if needed
    ///
    /// The cache is returned as is when the snapshot matches the folder and
    /// either holds at least one preview or every file is known to have
    /// none. Otherwise an empty cache with an unchanged snapshot counts as
    /// never seen and triggers a full refill.
    pub async fn get_or_refresh_previews(
        &self,
        folder: &FolderRecord,
        snapshot: Option<&FolderRecord>,
    ) -> FolderPreviews {
        let snapshot = match snapshot {
            Some(snapshot) if compute_delta(&snapshot.files, &folder.files).is_empty() => {
                let cached = self.previews.get_for_folder(folder).await;
                if !cached.is_empty() {
                    debug!(folder_id = folder.id, cached = cached.len(), "Previews served from cache");
                    return cached;
                }
                let no_preview = self.snapshots.no_preview(folder.id).await;
                if folder.file_ids().all(|id| no_preview.contains(&id)) {
                    debug!(folder_id = folder.id, "Folder has no previews to fetch");
                    return cached;
                }
                None
            }
            other => other,
        };

        self.reconcile(folder, snapshot).await;
        self.previews.get_for_folder(folder).await
    }

    /// Forget everything cached for `folder` so the next load refills it
    pub async fn invalidate_folder(&self, folder: &FolderRecord) {
        self.previews.delete_for_folder(folder).await;
        self.snapshots.forget(folder.id).await;
        info!(folder_id = folder.id, "Invalidated folder cache");
    }
}
