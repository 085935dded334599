//! File server API client

pub mod client;
pub mod errors;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::ServerClient;
pub use errors::ApiError;
pub use types::*;

/// Network operations the sync layer depends on
///
/// `fetch_file_preview` returns `Ok(None)` when the server has no preview
/// for the file. That is a final answer, not a failure.
#[async_trait]
pub trait PreviewSource: Send + Sync {
    /// Current metadata of a folder
    async fn fetch_folder_metadata(&self, folder_id: FolderId) -> Result<FolderRecord>;

    /// Preview of one file as base64, `None` if the file has no preview
    async fn fetch_file_preview(&self, file_id: FileId) -> Result<Option<String>>;

    /// Previews of every file in a folder, in one request
    async fn fetch_folder_previews_bulk(&self, folder_id: FolderId) -> Result<FolderPreviews>;
}
