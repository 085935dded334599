//! Preview cache and sync layer for a self-hosted file server
//!
//! Keeps file previews cached locally and, when a folder is revisited,
//! refetches only what changed since the last visit.

pub mod api;
pub mod cache;
pub mod config;
pub mod store;
pub mod sync;

pub use api::{FileRecord, FolderRecord, PreviewSource, ServerClient};
pub use cache::{FolderSnapshotCache, PreviewCache};
pub use config::Config;
pub use store::{DiskStore, KeyValueStore, MemoryStore};
pub use sync::{FolderSession, ReconcileReport, SyncPolicy, SyncState};
