//! In-memory file/folder mirror decoupled from persistent storage.

use std::{collections::HashMap, sync::RwLock};

use thiserror::Error;

/// Overlay lookup error.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("no file at {0}")]
    NotFound(String),
}

/// A single overlay entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dirent {
    /// Regular file with its full content.
    File { content: String, is_binary: bool },
    /// Folder marker; carries no content.
    Folder,
}

/// Normalized path -> dirent map mirroring writes made through the runtime.
///
/// Every file's ancestors exist as folder entries, materialized implicitly
/// on write. Reads may run concurrently with the single writer; each path
/// mutation is atomic on its own, there is no multi-key transaction.
///
/// Deleting a folder entry does not cascade to entries nested under it —
/// recursive deletion is the caller's concern.
#[derive(Debug, Default)]
pub struct FileOverlay {
    entries: RwLock<HashMap<String, Dirent>>,
}

impl FileOverlay {
    /// Create an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a file entry, creating missing ancestor folders.
    ///
    /// Idempotent: writing identical content twice leaves one stable entry.
    /// Returns the normalized path the entry lives under.
    pub fn write(&self, path: &str, content: impl Into<String>) -> String {
        let normalized = normalize(path);
        let mut entries = self.entries.write().unwrap();

        for ancestor in ancestors(&normalized) {
            entries.entry(ancestor).or_insert(Dirent::Folder);
        }
        entries.insert(
            normalized.clone(),
            Dirent::File {
                content: content.into(),
                is_binary: false,
            },
        );
        tracing::debug!(path = %normalized, "overlay write");
        normalized
    }

    /// Read a file's content.
    ///
    /// # Errors
    /// `NotFound` when no entry exists at the normalized path or the entry
    /// is a folder.
    pub fn read(&self, path: &str) -> Result<String, OverlayError> {
        let normalized = normalize(path);
        match self.entries.read().unwrap().get(&normalized) {
            Some(Dirent::File { content, .. }) => Ok(content.clone()),
            Some(Dirent::Folder) | None => Err(OverlayError::NotFound(normalized)),
        }
    }

    /// Remove the entry at `path`. Deleting a missing path is a no-op.
    ///
    /// Shallow: children of a deleted folder stay in the overlay.
    pub fn delete(&self, path: &str) {
        let normalized = normalize(path);
        if self.entries.write().unwrap().remove(&normalized).is_some() {
            tracing::debug!(path = %normalized, "overlay delete");
        }
    }

    /// Snapshot of the entry at `path`, folder or file.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<Dirent> {
        self.entries.read().unwrap().get(&normalize(path)).cloned()
    }

    /// Number of file entries (folders excluded).
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|entry| matches!(entry, Dirent::File { .. }))
            .count()
    }
}

/// Collapse separators and dot segments; all lookups go through this.
fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            segment => parts.push(segment),
        }
    }

    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Proper ancestor paths of `normalized`, shallowest first.
fn ancestors(normalized: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (index, ch) in normalized.char_indices() {
        if ch == '/' && index > 0 {
            out.push(normalized[..index].to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_roundtrips() {
        let overlay = FileOverlay::new();
        overlay.write("src/main.rs", "fn main() {}");
        assert_eq!(overlay.read("src/main.rs").unwrap(), "fn main() {}");
    }

    #[test]
    fn test_write_materializes_ancestors() {
        let overlay = FileOverlay::new();
        overlay.write("a/b/c.txt", "x");
        assert_eq!(overlay.entry("a"), Some(Dirent::Folder));
        assert_eq!(overlay.entry("a/b"), Some(Dirent::Folder));
        assert_eq!(overlay.file_count(), 1);
    }

    #[test]
    fn test_write_is_idempotent() {
        let overlay = FileOverlay::new();
        overlay.write("note.md", "same");
        overlay.write("note.md", "same");
        assert_eq!(overlay.file_count(), 1);
        assert_eq!(overlay.read("note.md").unwrap(), "same");
    }

    #[test]
    fn test_read_folder_is_not_found() {
        let overlay = FileOverlay::new();
        overlay.write("dir/file.txt", "x");
        assert!(matches!(
            overlay.read("dir"),
            Err(OverlayError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let overlay = FileOverlay::new();
        overlay.delete("ghost.txt");
    }

    #[test]
    fn test_folder_delete_is_shallow() {
        let overlay = FileOverlay::new();
        overlay.write("a/b.txt", "kept");
        overlay.delete("a");
        assert_eq!(overlay.entry("a"), None);
        assert_eq!(overlay.read("a/b.txt").unwrap(), "kept");
    }

    #[test]
    fn test_paths_are_normalized_before_lookup() {
        let overlay = FileOverlay::new();
        overlay.write(r"src\lib.rs", "pub fn f() {}");
        assert_eq!(overlay.read("src//./lib.rs").unwrap(), "pub fn f() {}");
        overlay.delete("src/lib.rs");
        assert!(overlay.read(r"src\lib.rs").is_err());
    }

    #[test]
    fn test_dot_dot_segments_collapse() {
        assert_eq!(normalize("a/b/../c.txt"), "a/c.txt");
        assert_eq!(normalize("/root//x/./y"), "/root/x/y");
    }
}
