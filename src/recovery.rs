//! Startup consistency protocol.
//!
//! The external cache (whatever holds the fast queryable copy of the
//! records) is disposable; the repository is the source of truth. On
//! startup the sync marker is compared against the actual head commit.
//! If they match, the cache is trusted as-is. If they diverge in any way
//! the cache is discarded and rebuilt from the head tree, collection by
//! collection.

use std::path::Path;

use git2::Repository;
use tracing::{info, warn};

use crate::backend::head_of;
use crate::codec::{Record, SchemaRegistry};
use crate::error::StoreResult;
use crate::marker::Marker;
use crate::types::{CollectionName, CommitId};

/// What synchronization found and did.
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// marker matched the head; the cache was left untouched
    Synchronized { head: CommitId },
    /// marker missing or stale; the cache was discarded and reloaded
    Rebuilt { head: CommitId, records: usize },
    /// the repository has no commits yet; the cache was emptied
    EmptyRepository,
}

/// The cache side of recovery. Implemented by whatever mirrors the
/// records outside the repository.
pub trait SnapshotCache {
    /// Throw away all cached state.
    fn discard(&mut self) -> StoreResult<()>;

    /// Load every record of one collection. Called once per registered
    /// collection, in registration order, after `discard`.
    fn load_collection(
        &mut self,
        collection: &CollectionName,
        records: Vec<Record>,
    ) -> StoreResult<()>;
}

/// Bring `cache` in line with the repository at `root`.
///
/// Unreadable record files are skipped with a warning rather than
/// aborting the rebuild; one corrupt file should not take the whole
/// store down.
pub fn synchronize(
    root: &Path,
    registry: &SchemaRegistry,
    cache: &mut dyn SnapshotCache,
    marker: &Marker,
) -> StoreResult<RecoveryOutcome> {
    let repo = Repository::open(root)?;

    let Some((head, _)) = head_of(&repo)? else {
        cache.discard()?;
        return Ok(RecoveryOutcome::EmptyRepository);
    };

    if marker.read()? == Some(head) {
        return Ok(RecoveryOutcome::Synchronized { head });
    }

    info!(head = %head.short(), "sync marker stale, rebuilding cache from head");
    cache.discard()?;

    let head_tree = repo.find_commit(head.raw())?.tree()?;
    let mut total = 0usize;

    for schema in registry.iter() {
        let collection = schema.collection();

        let subtree = match head_tree.get_name(collection.as_str()) {
            Some(entry) => match entry.to_object(&repo)?.into_tree() {
                Ok(tree) => tree,
                Err(_) => {
                    warn!(collection = %collection, "collection entry is not a directory, skipping");
                    continue;
                }
            },
            None => {
                cache.load_collection(collection, Vec::new())?;
                continue;
            }
        };

        let mut records = Vec::new();
        for entry in subtree.iter() {
            let Some(name) = entry.name() else {
                continue;
            };
            if !name.ends_with(".txt") {
                continue;
            }

            let object = entry.to_object(&repo)?;
            let Some(blob) = object.as_blob() else {
                continue;
            };

            let text = match std::str::from_utf8(blob.content()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(collection = %collection, file = name, "record file is not utf-8, skipping");
                    continue;
                }
            };

            match schema.decode(text) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(collection = %collection, file = name, %err, "unreadable record file, skipping");
                }
            }
        }

        total += records.len();
        cache.load_collection(collection, records)?;
    }

    marker.write(head)?;
    Ok(RecoveryOutcome::Rebuilt {
        head,
        records: total,
    })
}
