//! The two interchangeable storage backends.
//!
//! Both implement the same five-operation contract. The object-graph
//! backend builds blobs, trees and commits directly against the object
//! store and is the authoritative implementation; the porcelain backend
//! drives a working directory through `git` subcommands and is kept as a
//! compatibility mode.

mod object;
mod porcelain;

pub use object::ObjectBackend;
pub use porcelain::PorcelainBackend;

pub(crate) use object::head_of;

use crate::error::StoreResult;
use crate::types::{CommitId, TreePath};

/// Which backend a store instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// direct object-graph construction, no working-directory checkout
    #[default]
    ObjectGraph,
    /// working-directory writes plus git subcommands (compatibility mode)
    Porcelain,
}

/// The mutation/commit/reset contract shared by both backends.
///
/// Implementations are owned by the dispatcher's single worker thread, so
/// they take `&mut self` and never need internal locking.
pub trait Backend: Send {
    /// Write `content` at `path`. Writing identical content is a no-op.
    fn write(&mut self, path: &TreePath, content: &str) -> StoreResult<()>;

    /// Remove the file at `path`. Removing an absent path is a no-op.
    fn remove(&mut self, path: &TreePath) -> StoreResult<()>;

    /// Move the file at `old` to `new`. Fails with `PathNotFound` when
    /// `old` has no current entry.
    fn rename(&mut self, old: &TreePath, new: &TreePath) -> StoreResult<()>;

    /// Commit everything pending since the last commit or reset. Returns
    /// None when nothing pending materializes to a change.
    fn commit(&mut self) -> StoreResult<Option<CommitId>>;

    /// Discard all uncommitted state, back to the last real commit.
    fn reset(&mut self) -> StoreResult<()>;
}
