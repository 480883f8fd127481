//! The object-graph backend.
//!
//! Builds record state directly in the git object store: content blobs,
//! trees via the pure algebra in [`crate::tree`], and commits advancing
//! the current branch. No index, no checkout. An optional on-disk mirror
//! keeps a conventional working copy in step for humans who want to look
//! at the files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, Repository};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};
use crate::marker::Marker;
use crate::tree::{self, PathEntry};
use crate::types::{CommitId, CommitSignature, TreeId, TreePath};

/// Resolve the current head commit and its tree, or None when the head
/// reference is unborn (fresh repository).
pub(crate) fn head_of(repo: &Repository) -> StoreResult<Option<(CommitId, TreeId)>> {
    match repo.head() {
        Ok(reference) => {
            let commit = reference.peel_to_commit()?;
            Ok(Some((
                CommitId::new(commit.id()),
                TreeId::new(commit.tree_id()),
            )))
        }
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub struct ObjectBackend {
    repo: Repository,
    /// the tree reflecting all pending changes since the last commit
    working_tree: TreeId,
    /// human-readable change descriptions, joined into the commit message
    pending_log: Vec<String>,
    /// mirror every mutation into this working copy when configured
    mirror: Option<PathBuf>,
    signature: CommitSignature,
    marker: Marker,
}

impl ObjectBackend {
    /// Open the backend on an existing repository.
    ///
    /// The commit identity comes from the repository configuration; when
    /// none is configured (or `signature` overrides it) the crate default
    /// is used. `mirror_working_copy` replays every mutation onto the
    /// checkout as plain file operations.
    pub fn open(
        path: &Path,
        signature: Option<CommitSignature>,
        mirror_working_copy: bool,
    ) -> StoreResult<Self> {
        let repo = Repository::open(path)
            .map_err(|_| StoreError::NotInitialized(path.to_path_buf()))?;

        let signature = signature.unwrap_or_else(|| match repo.signature() {
            Ok(sig) => CommitSignature::new(
                sig.name().unwrap_or("gitrows"),
                sig.email().unwrap_or("gitrows@localhost"),
            ),
            Err(_) => CommitSignature::gitrows(),
        });

        let working_tree = match head_of(&repo)? {
            Some((_, tree)) => tree,
            None => tree::empty_tree_id(&repo)?,
        };

        let marker = Marker::in_repository(path);
        let mirror = mirror_working_copy.then(|| path.to_path_buf());

        Ok(Self {
            repo,
            working_tree,
            pending_log: Vec::new(),
            mirror,
            signature,
            marker,
        })
    }

    /// the tree all pending changes have been applied to (for tests)
    pub fn working_tree(&self) -> TreeId {
        self.working_tree
    }

    pub fn pending_log(&self) -> &[String] {
        &self.pending_log
    }

    fn mirror_write(&self, path: &TreePath, content: &str) -> StoreResult<()> {
        let Some(root) = &self.mirror else {
            return Ok(());
        };
        let target = root.join(path.to_rel_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)?;
        Ok(())
    }

    fn mirror_remove(&self, path: &TreePath) -> StoreResult<()> {
        let Some(root) = &self.mirror else {
            return Ok(());
        };
        match fs::remove_file(root.join(path.to_rel_path())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mirror_rename(&self, old: &TreePath, new: &TreePath) -> StoreResult<()> {
        let Some(root) = &self.mirror else {
            return Ok(());
        };
        let from = root.join(old.to_rel_path());
        if !from.exists() {
            return Ok(());
        }
        let to = root.join(new.to_rel_path());
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)?;
        Ok(())
    }
}

impl Backend for ObjectBackend {
    fn write(&mut self, path: &TreePath, content: &str) -> StoreResult<()> {
        let content_id = Oid::hash_object(ObjectType::Blob, content.as_bytes())?;
        let existing = tree::lookup(&self.repo, self.working_tree, path)?;

        if let Some(entry) = &existing {
            if entry.id == content_id {
                debug!(%path, "write is a no-op, content unchanged");
                return Ok(());
            }
        }

        let blob = self.repo.blob(content.as_bytes())?;
        self.working_tree =
            tree::insert(&self.repo, self.working_tree, path, PathEntry::blob(blob))?;
        self.mirror_write(path, content)?;

        let action = if existing.is_some() { 'M' } else { 'A' };
        self.pending_log.push(format!("{} {}", action, path));
        debug!(%path, action = %action, "staged write");
        Ok(())
    }

    fn remove(&mut self, path: &TreePath) -> StoreResult<()> {
        if tree::lookup(&self.repo, self.working_tree, path)?.is_none() {
            debug!(%path, "remove is a no-op, path absent");
            return Ok(());
        }

        self.working_tree = tree::remove(&self.repo, self.working_tree, path)?;
        self.mirror_remove(path)?;
        self.pending_log.push(format!("D {}", path));
        debug!(%path, "staged removal");
        Ok(())
    }

    fn rename(&mut self, old: &TreePath, new: &TreePath) -> StoreResult<()> {
        self.working_tree = tree::rename(&self.repo, self.working_tree, old, new)?;
        self.mirror_rename(old, new)?;
        self.pending_log.push(format!("R {} -> {}", old, new));
        debug!(%old, %new, "staged rename");
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<Option<CommitId>> {
        let head = head_of(&self.repo)?;

        match &head {
            Some((_, head_tree)) => {
                // nothing pending materialized to a change
                if *head_tree == self.working_tree {
                    self.pending_log.clear();
                    return Ok(None);
                }
            }
            None => {
                // fresh repository and nothing written: don't create an
                // empty initial commit
                if self.pending_log.is_empty()
                    && self.working_tree == tree::empty_tree_id(&self.repo)?
                {
                    return Ok(None);
                }
            }
        }

        let tree = self.repo.find_tree(self.working_tree.raw())?;
        let sig = self.signature.to_git2_signature()?;
        let message = self.pending_log.join("\n");

        let oid = match head {
            Some((parent_id, _)) => {
                let parent = self.repo.find_commit(parent_id.raw())?;
                self.repo
                    .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?
            }
            None => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?,
        };

        let id = CommitId::new(oid);
        // head only advances once the commit object is fully written, so a
        // retried commit after a failure reproduces the same tree id
        self.marker.write(id)?;
        self.pending_log.clear();
        info!(commit = %id.short(), "committed pending changes");
        Ok(Some(id))
    }

    fn reset(&mut self) -> StoreResult<()> {
        self.working_tree = match head_of(&self.repo)? {
            Some((_, tree)) => tree,
            None => tree::empty_tree_id(&self.repo)?,
        };
        let discarded = self.pending_log.len();
        self.pending_log.clear();
        debug!(discarded, "reset working tree to head");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectBackend) {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let backend = ObjectBackend::open(dir.path(), None, false).unwrap();
        (dir, backend)
    }

    fn path(s: &str) -> TreePath {
        TreePath::parse(s).unwrap()
    }

    fn blob_at(dir: &TempDir, commit: CommitId, p: &str) -> Option<String> {
        let repo = Repository::open(dir.path()).unwrap();
        let commit = repo.find_commit(commit.raw()).unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(std::path::Path::new(p)).ok()?;
        let blob = repo.find_blob(entry.id()).unwrap();
        Some(String::from_utf8(blob.content().to_vec()).unwrap())
    }

    #[test]
    fn test_write_and_commit() {
        let (dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "id: 1\nfoo: probe\n").unwrap();
        assert_eq!(backend.pending_log(), &["A test/1.txt"]);

        let commit = backend.commit().unwrap().unwrap();
        assert_eq!(
            blob_at(&dir, commit, "test/1.txt").unwrap(),
            "id: 1\nfoo: probe\n"
        );
        assert!(backend.pending_log().is_empty());

        // marker equals new head
        let marker = Marker::in_repository(dir.path());
        assert_eq!(marker.read().unwrap(), Some(commit));
    }

    #[test]
    fn test_idempotent_write() {
        let (dir, mut backend) = setup();
        let p = path("test/1.txt");

        backend.write(&p, "same content").unwrap();
        backend.write(&p, "same content").unwrap();
        // no duplicate change-log entry
        assert_eq!(backend.pending_log(), &["A test/1.txt"]);

        let first = backend.commit().unwrap().unwrap();

        // identical write after commit, then commit: no second commit
        backend.write(&p, "same content").unwrap();
        assert!(backend.pending_log().is_empty());
        assert!(backend.commit().unwrap().is_none());

        let repo = Repository::open(dir.path()).unwrap();
        let head = head_of(&repo).unwrap().unwrap();
        assert_eq!(head.0, first);
    }

    #[test]
    fn test_modify_vs_add_log_entries() {
        let (_dir, mut backend) = setup();
        let p = path("test/1.txt");

        backend.write(&p, "v1").unwrap();
        backend.commit().unwrap().unwrap();

        backend.write(&p, "v2").unwrap();
        assert_eq!(backend.pending_log(), &["M test/1.txt"]);
    }

    #[test]
    fn test_commit_message_is_the_pending_log() {
        let (dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "a").unwrap();
        backend.write(&path("test/2.txt"), "b").unwrap();
        let commit = backend.commit().unwrap().unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let message = repo
            .find_commit(commit.raw())
            .unwrap()
            .message()
            .unwrap()
            .to_string();
        assert_eq!(message, "A test/1.txt\nA test/2.txt");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (_dir, mut backend) = setup();
        backend.remove(&path("test/ghost.txt")).unwrap();
        assert!(backend.pending_log().is_empty());
        assert!(backend.commit().unwrap().is_none());
    }

    #[test]
    fn test_remove_then_commit() {
        let (dir, mut backend) = setup();
        let p = path("test/1.txt");

        backend.write(&p, "x").unwrap();
        backend.commit().unwrap().unwrap();

        backend.remove(&p).unwrap();
        assert_eq!(backend.pending_log(), &["D test/1.txt"]);
        let commit = backend.commit().unwrap().unwrap();

        // collection directory pruned from the committed tree
        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.find_commit(commit.raw()).unwrap().tree().unwrap();
        assert!(tree.get_name("test").is_none());
    }

    #[test]
    fn test_rename() {
        let (dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "id: 1\n").unwrap();
        backend.commit().unwrap().unwrap();

        backend
            .rename(&path("test/1.txt"), &path("test/2.txt"))
            .unwrap();
        assert_eq!(backend.pending_log(), &["R test/1.txt -> test/2.txt"]);
        let commit = backend.commit().unwrap().unwrap();

        assert!(blob_at(&dir, commit, "test/1.txt").is_none());
        assert_eq!(blob_at(&dir, commit, "test/2.txt").unwrap(), "id: 1\n");
    }

    #[test]
    fn test_rename_missing_source_fails() {
        let (_dir, mut backend) = setup();
        let result = backend.rename(&path("test/1.txt"), &path("test/2.txt"));
        assert!(matches!(result, Err(StoreError::PathNotFound(_))));
    }

    #[test]
    fn test_commit_noop_when_nothing_pending() {
        let (dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "x").unwrap();
        let first = backend.commit().unwrap().unwrap();
        assert!(backend.commit().unwrap().is_none());

        // exactly one real commit with no parent
        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.find_commit(first.raw()).unwrap();
        assert_eq!(head.parent_count(), 0);
    }

    #[test]
    fn test_write_then_remove_commits_nothing() {
        let (_dir, mut backend) = setup();
        let p = path("test/1.txt");

        backend.write(&p, "x").unwrap();
        backend.commit().unwrap().unwrap();

        // a change that cancels itself out materializes to no commit
        backend.write(&p, "y").unwrap();
        backend.write(&p, "x").unwrap();
        assert!(backend.commit().unwrap().is_none());
    }

    #[test]
    fn test_reset_discards_pending() {
        let (_dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "committed").unwrap();
        backend.commit().unwrap().unwrap();
        let committed_tree = backend.working_tree();

        backend.write(&path("test/1.txt"), "uncommitted").unwrap();
        backend.write(&path("test/2.txt"), "also uncommitted").unwrap();
        backend.reset().unwrap();

        assert_eq!(backend.working_tree(), committed_tree);
        assert!(backend.pending_log().is_empty());
        assert!(backend.commit().unwrap().is_none());
    }

    #[test]
    fn test_mirror_working_copy() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let mut backend = ObjectBackend::open(dir.path(), None, true).unwrap();

        backend.write(&path("test/1.txt"), "id: 1\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("test/1.txt")).unwrap(),
            "id: 1\n"
        );

        backend
            .rename(&path("test/1.txt"), &path("test/2.txt"))
            .unwrap();
        assert!(!dir.path().join("test/1.txt").exists());
        assert!(dir.path().join("test/2.txt").exists());

        backend.remove(&path("test/2.txt")).unwrap();
        assert!(!dir.path().join("test/2.txt").exists());
    }

    #[test]
    fn test_commit_chain_parents() {
        let (dir, mut backend) = setup();

        backend.write(&path("test/1.txt"), "v1").unwrap();
        let first = backend.commit().unwrap().unwrap();

        backend.write(&path("test/1.txt"), "v2").unwrap();
        let second = backend.commit().unwrap().unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let commit = repo.find_commit(second.raw()).unwrap();
        assert_eq!(commit.parent_count(), 1);
        assert_eq!(commit.parent_id(0).unwrap(), first.raw());
    }
}
