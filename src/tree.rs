//! Pure tree algebra over the git object graph.
//!
//! Git trees are immutable and content-addressed, so every mutation
//! produces a new tree id and the input tree is never touched. Each
//! function recurses over the ordered path segments of a [`TreePath`],
//! rebuilding one treebuilder per level on the way back up.
//!
//! Removal prunes transitively: a subtree that collapses to the
//! well-known empty-tree id is dropped from its parent instead of being
//! left behind as an empty directory.

use git2::{FileMode, ObjectType, Oid, Repository, Tree};

use crate::error::{StoreError, StoreResult};
use crate::types::{TreeId, TreePath};

/// A resolved tree entry: object id plus the git file mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEntry {
    pub id: Oid,
    pub mode: i32,
}

impl PathEntry {
    pub fn blob(id: Oid) -> Self {
        Self {
            id,
            mode: FileMode::Blob.into(),
        }
    }

    pub fn is_tree(&self) -> bool {
        self.mode == i32::from(FileMode::Tree)
    }
}

/// The id of the empty tree, used for pruning checks.
pub fn empty_tree_id(repo: &Repository) -> StoreResult<TreeId> {
    let builder = repo.treebuilder(None)?;
    Ok(TreeId::new(builder.write()?))
}

/// Upsert `entry` at `path`, creating intermediate directories as needed.
/// Returns the new root tree id.
pub fn insert(
    repo: &Repository,
    tree: TreeId,
    path: &TreePath,
    entry: PathEntry,
) -> StoreResult<TreeId> {
    let root = repo.find_tree(tree.raw())?;
    insert_at(repo, Some(&root), path.segments(), entry).map(TreeId::new)
}

fn insert_at(
    repo: &Repository,
    tree: Option<&Tree<'_>>,
    segments: &[String],
    entry: PathEntry,
) -> StoreResult<Oid> {
    let (head, rest) = segments.split_first().expect("TreePath is never empty");
    let mut builder = repo.treebuilder(tree)?;

    if rest.is_empty() {
        builder.insert(head, entry.id, entry.mode)?;
    } else {
        // descend into the subtree, creating it if absent; a blob sitting
        // where a directory is needed gets shadowed by the new directory
        let subtree = match tree.and_then(|t| t.get_name(head)) {
            Some(e) if e.kind() == Some(ObjectType::Tree) => Some(repo.find_tree(e.id())?),
            _ => None,
        };
        let new_subtree = insert_at(repo, subtree.as_ref(), rest, entry)?;
        builder.insert(head, new_subtree, FileMode::Tree.into())?;
    }

    Ok(builder.write()?)
}

/// Remove the entry at `path`, pruning directories that become empty all
/// the way up. Returns the new root tree id; `PathNotFound` if absent.
pub fn remove(repo: &Repository, tree: TreeId, path: &TreePath) -> StoreResult<TreeId> {
    let root = repo.find_tree(tree.raw())?;
    remove_at(repo, &root, path.segments(), path).map(TreeId::new)
}

fn remove_at(
    repo: &Repository,
    tree: &Tree<'_>,
    segments: &[String],
    full_path: &TreePath,
) -> StoreResult<Oid> {
    let (head, rest) = segments.split_first().expect("TreePath is never empty");
    let mut builder = repo.treebuilder(Some(tree))?;

    if rest.is_empty() {
        if tree.get_name(head).is_none() {
            return Err(StoreError::PathNotFound(full_path.clone()));
        }
        builder.remove(head)?;
    } else {
        let entry = tree
            .get_name(head)
            .ok_or_else(|| StoreError::PathNotFound(full_path.clone()))?;
        if entry.kind() != Some(ObjectType::Tree) {
            return Err(StoreError::UnexpectedEntryType {
                path: full_path.to_string(),
                expected: "tree (directory)",
            });
        }
        let subtree = repo.find_tree(entry.id())?;
        let new_subtree = remove_at(repo, &subtree, rest, full_path)?;

        if new_subtree == empty_tree_id(repo)?.raw() {
            builder.remove(head)?;
        } else {
            builder.insert(head, new_subtree, FileMode::Tree.into())?;
        }
    }

    Ok(builder.write()?)
}

/// Move the entry at `old` to `new`, preserving its file mode.
/// Overwrites an existing entry at `new`; `PathNotFound` if `old` is absent.
pub fn rename(
    repo: &Repository,
    tree: TreeId,
    old: &TreePath,
    new: &TreePath,
) -> StoreResult<TreeId> {
    let entry = lookup(repo, tree, old)?.ok_or_else(|| StoreError::PathNotFound(old.clone()))?;
    let pruned = remove(repo, tree, old)?;
    insert(repo, pruned, new, entry)
}

/// Recursive descent lookup. Returns None when any segment is absent or a
/// blob sits where a directory is expected (no partial matches).
pub fn lookup(repo: &Repository, tree: TreeId, path: &TreePath) -> StoreResult<Option<PathEntry>> {
    let mut current = repo.find_tree(tree.raw())?;
    let segments = path.segments();

    for (i, segment) in segments.iter().enumerate() {
        let next = {
            let Some(entry) = current.get_name(segment) else {
                return Ok(None);
            };
            if i + 1 == segments.len() {
                return Ok(Some(PathEntry {
                    id: entry.id(),
                    mode: entry.filemode(),
                }));
            }
            if entry.kind() != Some(ObjectType::Tree) {
                return Ok(None);
            }
            entry.id()
        };
        current = repo.find_tree(next)?;
    }

    unreachable!("TreePath is never empty")
}
