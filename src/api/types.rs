//! File server API types
//!
//! Folder and file metadata as returned by the server, plus the preview
//! payload conversions the caches need.

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Server-assigned file id
pub type FileId = u64;

/// Server-assigned folder id
pub type FolderId = u64;

/// Base64 previews keyed by file id
pub type FolderPreviews = HashMap<FileId, String>;

/// Deserialize an optional size that might be encoded as a number, a string or null.
fn deserialize_flexible_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleSizeVisitor;

    impl<'de> de::Visitor<'de> for FlexibleSizeVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<u64>, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<u64>, E> {
            u64::try_from(value)
                .map(Some)
                .map_err(|_| de::Error::custom("negative file size"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<u64>, E> {
            value.parse::<u64>().map(Some).map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(FlexibleSizeVisitor)
}

/// Tag attached to a file or folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub title: String,
}

/// File metadata
///
/// Identity is `id`. `file_type` is the only field that decides whether a
/// cached preview is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    /// Server-side classification ("Image", "Document", ...)
    #[serde(rename = "fileType", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    /// Size in bytes
    #[serde(
        default,
        deserialize_with = "deserialize_flexible_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<u64>,
    #[serde(rename = "dateCreated", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl FileRecord {
    /// A file with only an id and a name
    pub fn new(id: FileId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            file_type: None,
            folder_id: None,
            size: None,
            created_at: None,
            tags: Vec::new(),
        }
    }

    pub fn with_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }
}

/// Folder metadata, one level deep
///
/// Only `files` matters for preview caching. `subfolders` are carried
/// through as the server sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: FolderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<FolderId>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "folders", default)]
    pub subfolders: Vec<FolderRecord>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl FolderRecord {
    /// An empty folder
    pub fn new(id: FolderId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            parent_id: None,
            path: name.clone(),
            name,
            subfolders: Vec::new(),
            files: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<FileRecord>) -> Self {
        self.files = files;
        self
    }

    pub fn with_subfolders(mut self, subfolders: Vec<FolderRecord>) -> Self {
        self.subfolders = subfolders;
        self
    }

    /// Ids of the files directly inside this folder
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.files.iter().map(|f| f.id)
    }
}

/// Response of the version endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// Encode raw preview bytes the way the caches store them
pub fn encode_preview(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Convert the bulk preview response into cacheable previews
///
/// The server keys the response by the decimal file id and sends each
/// preview as an array of byte values. Keys that are not valid ids are
/// skipped.
pub fn previews_from_bulk(raw: HashMap<String, Vec<u8>>) -> FolderPreviews {
    let mut previews = FolderPreviews::with_capacity(raw.len());
    for (key, bytes) in raw {
        match key.parse::<FileId>() {
            Ok(id) => {
                previews.insert(id, encode_preview(&bytes));
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping bulk preview with invalid file id");
            }
        }
    }
    previews
}
