//! Folder session
//!
//! Drives one folder view: read the old snapshot, fetch fresh metadata,
//! replace the snapshot, then reconcile previews in the background while
//! the caller already shows the listing.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::policy::{ReconcileReport, RefetchStrategy, SyncPolicy};
use super::SyncSettings;
use crate::api::{FileId, FolderId, FolderPreviews, FolderRecord, PreviewSource};
use crate::cache::{FolderSnapshotCache, PreviewCache};

/// Progress of a folder view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for folder metadata
    Loading,
    /// Metadata shown, previews being reconciled
    Reconciling,
    /// Previews reconciled
    Ready,
    /// Metadata could not be fetched
    Failed,
}

/// A folder whose metadata has loaded
pub struct OpenedFolder {
    pub folder: FolderRecord,
    reconcile: JoinHandle<ReconcileReport>,
}

impl OpenedFolder {
    /// Wait for background reconciliation to finish
    pub async fn wait(self) -> Result<ReconcileReport> {
        self.reconcile
            .await
            .with_context(|| format!("Reconciliation of folder {} panicked", self.folder.id))
    }
}

/// Per-view controller tying the caches, the policy and the network together
pub struct FolderSession {
    previews: Arc<PreviewCache>,
    snapshots: Arc<FolderSnapshotCache>,
    source: Arc<dyn PreviewSource>,
    policy: Arc<SyncPolicy>,
    state: Arc<watch::Sender<SyncState>>,
}

impl FolderSession {
    pub fn new(
        previews: Arc<PreviewCache>,
        snapshots: Arc<FolderSnapshotCache>,
        source: Arc<dyn PreviewSource>,
        settings: SyncSettings,
    ) -> Self {
        let policy = Arc::new(SyncPolicy::new(
            previews.clone(),
            snapshots.clone(),
            source.clone(),
            settings,
        ));
        let (state, _) = watch::channel(SyncState::Loading);
        Self {
            previews,
            snapshots,
            source,
            policy,
            state: Arc::new(state),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Load a folder and start reconciling its previews
    ///
    /// Returns as soon as fresh metadata is cached; metadata errors are
    /// returned to the caller. Reconciliation continues in a spawned task
    /// and moves the state to `Ready` when done.
    pub async fn open(&self, folder_id: FolderId) -> Result<OpenedFolder> {
        self.state.send_replace(SyncState::Loading);

        let snapshot = self.snapshots.get(folder_id).await;
        let folder = match self.source.fetch_folder_metadata(folder_id).await {
            Ok(folder) => folder,
            Err(e) => {
                error!(folder_id = folder_id, error = %e, "Failed to load folder metadata");
                self.state.send_replace(SyncState::Failed);
                return Err(e.context(format!("Failed to open folder {}", folder_id)));
            }
        };
        info!(
            folder_id = folder_id,
            files = folder.files.len(),
            subfolders = folder.subfolders.len(),
            cached_snapshot = snapshot.is_some(),
            "Loaded folder metadata"
        );

        self.snapshots.store(&folder).await;
        self.state.send_replace(SyncState::Reconciling);

        let reconcile = tokio::spawn(reconcile_in_background(
            self.policy.clone(),
            self.snapshots.clone(),
            self.state.clone(),
            folder.clone(),
            snapshot,
        ));

        Ok(OpenedFolder { folder, reconcile })
    }

    /// Previews to render for `folder`
    ///
    /// Served from cache; files missing from the stored snapshot are
    /// fetched from the server first.
    pub async fn previews(&self, folder: &FolderRecord) -> FolderPreviews {
        let snapshot = self.snapshots.get(folder.id).await;
        self.policy
            .get_or_refresh_previews(folder, snapshot.as_ref())
            .await
    }

    /// Cached previews only, never touching the network
    pub async fn cached_previews(&self, folder: &FolderRecord) -> FolderPreviews {
        self.previews.get_for_folder(folder).await
    }

    pub fn log_metrics(&self) {
        self.previews.log_metrics();
        self.snapshots.log_metrics();
    }
}

async fn reconcile_in_background(
    policy: Arc<SyncPolicy>,
    snapshots: Arc<FolderSnapshotCache>,
    state: Arc<watch::Sender<SyncState>>,
    folder: FolderRecord,
    snapshot: Option<FolderRecord>,
) -> ReconcileReport {
    let report = policy.reconcile(&folder, snapshot.as_ref()).await;

    // Bulk failures already dropped the snapshot. Per-file failures are
    // left out of it so the next visit sees them as added.
    if report.strategy == RefetchStrategy::PerFile && report.is_partial() {
        let failed: HashSet<FileId> = report.failed.iter().copied().collect();
        let mut retry = folder.clone();
        retry.files.retain(|f| !failed.contains(&f.id));
        snapshots.store(&retry).await;
        debug!(
            folder_id = folder.id,
            failed = failed.len(),
            "Snapshot stored without failed previews"
        );
    }

    state.send_replace(SyncState::Ready);
    report
}
