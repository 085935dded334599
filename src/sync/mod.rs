//! Folder preview synchronization
//!
//! Compares the last snapshot of a folder with fresh metadata and brings
//! the preview cache back in line with the fewest possible requests.

pub mod delta;
pub mod policy;
pub mod session;

pub use delta::{compute_delta, FileListDelta};
pub use policy::{ReconcileReport, RefetchStrategy, SyncPolicy};
pub use session::{FolderSession, SyncState};

/// Refetch counts above this go through the bulk folder endpoint
pub const DEFAULT_BULK_THRESHOLD: usize = 12;

/// Per-file preview requests allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Tuning knobs of the sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub bulk_threshold: usize,
    pub max_concurrent_fetches: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}
