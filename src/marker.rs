//! The persisted sync marker.
//!
//! One small file (`dbcommit`) at the repository root holds the hex id of
//! the commit the external cache was last synchronized to. Immediately
//! after a successful commit the marker equals the new head id; recovery
//! compares it against the actual head on startup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StoreResult;
use crate::types::CommitId;

/// filename of the marker at the repository root
pub const MARKER_FILE: &str = "dbcommit";

#[derive(Debug, Clone)]
pub struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_repository(root: &Path) -> Self {
        Self::new(root.join(MARKER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker. An absent file or unparseable content reads as
    /// None, which recovery treats as a mismatch.
    pub fn read(&self) -> StoreResult<Option<CommitId>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let line = text.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(None);
        }

        match CommitId::from_hex(line) {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                warn!(marker = %self.path.display(), content = line, "unreadable sync marker, forcing rebuild");
                Ok(None)
            }
        }
    }

    pub fn write(&self, id: CommitId) -> StoreResult<()> {
        fs::write(&self.path, format!("{}\n", id))?;
        Ok(())
    }

    /// Remove the marker file if present.
    pub fn clear(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_marker_reads_none() {
        let dir = TempDir::new().unwrap();
        let marker = Marker::in_repository(dir.path());
        assert_eq!(marker.read().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let marker = Marker::in_repository(dir.path());

        let id = CommitId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        marker.write(id).unwrap();
        assert_eq!(marker.read().unwrap(), Some(id));

        // trailing newline, single line
        let raw = std::fs::read_to_string(marker.path()).unwrap();
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_garbage_marker_reads_none() {
        let dir = TempDir::new().unwrap();
        let marker = Marker::in_repository(dir.path());
        std::fs::write(marker.path(), "not a commit id\n").unwrap();
        assert_eq!(marker.read().unwrap(), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let marker = Marker::in_repository(dir.path());
        marker.clear().unwrap();

        let id = CommitId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        marker.write(id).unwrap();
        marker.clear().unwrap();
        assert_eq!(marker.read().unwrap(), None);
    }
}
