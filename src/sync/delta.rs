//! File list delta
//!
//! Pure comparison of two file lists. A file is identified by its id; only
//! a change of `file_type` makes a cached preview stale, so renames, size
//! and tag edits are not reported.

use std::collections::BTreeMap;

use crate::api::{FileId, FileRecord};

/// Difference between a folder's previous and current file list
///
/// The three sequences are disjoint by id and ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileListDelta {
    /// Only in the current list
    pub added: Vec<FileRecord>,
    /// Only in the previous list
    pub removed: Vec<FileRecord>,
    /// In both with a different type; holds the current record
    pub changed: Vec<FileRecord>,
}

impl FileListDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Files whose preview must be fetched again
    pub fn to_refetch(&self) -> Vec<FileRecord> {
        self.added.iter().chain(&self.changed).cloned().collect()
    }

    /// Files whose cached preview must be dropped before refetching
    pub fn to_evict(&self) -> Vec<FileId> {
        self.removed
            .iter()
            .chain(&self.changed)
            .map(|f| f.id)
            .collect()
    }
}

fn index(files: &[FileRecord]) -> BTreeMap<FileId, &FileRecord> {
    // Later duplicates replace earlier ones
    files.iter().map(|f| (f.id, f)).collect()
}

/// Compare `previous` against `current`
pub fn compute_delta(previous: &[FileRecord], current: &[FileRecord]) -> FileListDelta {
    let before = index(previous);
    let after = index(current);
    let mut delta = FileListDelta::default();

    for (id, file) in &after {
        match before.get(id) {
            None => delta.added.push((*file).clone()),
            Some(old) if old.file_type != file.file_type => delta.changed.push((*file).clone()),
            Some(_) => {}
        }
    }

    delta.removed = before
        .iter()
        .filter(|(id, _)| !after.contains_key(id))
        .map(|(_, file)| (*file).clone())
        .collect();

    delta
}
