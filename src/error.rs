//! Error types for the store.
//!
//! All errors that can occur during storage operations are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::EncodeError;
use crate::types::{InvalidNameError, TreePath};

/// the main error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// a git subcommand run by the porcelain backend failed
    #[error("git command failed ({command}): {stderr}")]
    GitCommand { command: String, stderr: String },

    /// move/remove referenced a path absent from the current tree;
    /// indicates an ordering bug in the caller
    #[error("path not found in tree: {0}")]
    PathNotFound(TreePath),

    /// a bulk (non-per-record) mutation was requested
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// a field could not be rendered to or parsed from text
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// invalid collection, key or path name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a record referenced a collection with no registered schema
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// the same collection was registered twice
    #[error("collection already registered: {0}")]
    CollectionAlreadyRegistered(String),

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}")]
    UnexpectedEntryType { path: String, expected: &'static str },

    /// repository is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the dispatcher worker thread has exited
    #[error("dispatcher worker is gone")]
    WorkerGone,
}

impl StoreError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::PathNotFound(_) | StoreError::UnknownCollection(_)
        )
    }
}

/// result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let path = TreePath::parse("test/1.txt").unwrap();
        let not_found = StoreError::PathNotFound(path);
        assert!(not_found.is_not_found());

        let bulk = StoreError::UnsupportedOperation("bulk delete".to_string());
        assert!(!bulk.is_not_found());
    }
}
