//! The porcelain backend.
//!
//! Drives the same contract as [`super::ObjectBackend`] through an actual
//! working directory and `git` subcommands. Kept as a compatibility mode;
//! the object-graph backend is authoritative.
//!
//! The commit message is the `git status --porcelain` output of what is
//! being committed, with the incidental untracked lines (the sync marker,
//! the external cache file) filtered out.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};
use crate::marker::{Marker, MARKER_FILE};
use crate::types::{CommitId, TreePath};

pub struct PorcelainBackend {
    root: PathBuf,
    /// paths written since the last commit, staged in bulk at commit time
    written: Vec<String>,
    /// paths deleted since the last commit (already staged via `git rm`)
    deleted: Vec<String>,
    /// untracked filenames filtered out of the commit-message diff
    excluded_untracked: Vec<String>,
    marker: Marker,
}

impl PorcelainBackend {
    pub fn open(root: &Path, excluded_untracked: Vec<String>) -> StoreResult<Self> {
        if !root.join(".git").exists() {
            return Err(StoreError::NotInitialized(root.to_path_buf()));
        }

        let mut excluded = excluded_untracked;
        if !excluded.iter().any(|n| n == MARKER_FILE) {
            excluded.push(MARKER_FILE.to_string());
        }

        Ok(Self {
            root: root.to_path_buf(),
            written: Vec::new(),
            deleted: Vec::new(),
            excluded_untracked: excluded,
            marker: Marker::in_repository(root),
        })
    }

    /// run a git subcommand against the working directory, failing on a
    /// nonzero exit status
    fn git(&self, args: &[&str]) -> StoreResult<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()?;

        if !output.status.success() {
            return Err(StoreError::GitCommand {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// run a git subcommand where a nonzero exit is an answer, not an error
    fn git_ok(&self, args: &[&str]) -> StoreResult<bool> {
        let status = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()?
            .status;
        Ok(status.success())
    }

    fn is_tracked(&self, path: &str) -> StoreResult<bool> {
        self.git_ok(&["ls-files", "--error-unmatch", path])
    }

    fn has_head(&self) -> StoreResult<bool> {
        self.git_ok(&["rev-parse", "--verify", "HEAD"])
    }

    fn current_head(&self) -> StoreResult<CommitId> {
        let out = self.git(&["rev-parse", "HEAD"])?;
        let line = out.lines().next().unwrap_or("").trim();
        Ok(CommitId::from_hex(line)?)
    }

    /// the status diff used as the commit message, with incidental
    /// untracked files stripped
    fn status_for_message(&self) -> StoreResult<String> {
        let status = self.git(&["status", "--porcelain"])?;
        let kept: Vec<&str> = status
            .lines()
            .filter(|line| {
                !self
                    .excluded_untracked
                    .iter()
                    .any(|name| *line == format!("?? {}", name))
            })
            .collect();
        Ok(kept.join("\n"))
    }
}

impl Backend for PorcelainBackend {
    fn write(&mut self, path: &TreePath, content: &str) -> StoreResult<()> {
        let target = self.root.join(path.to_rel_path());

        // skip the disk write entirely when the content is unchanged
        if let Ok(existing) = fs::read_to_string(&target) {
            if existing == content {
                debug!(%path, "write is a no-op, content unchanged");
                return Ok(());
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        self.written.push(path.to_string());
        debug!(%path, "wrote file");
        Ok(())
    }

    fn remove(&mut self, path: &TreePath) -> StoreResult<()> {
        let rel = path.to_string();
        self.deleted.push(rel.clone());
        self.git(&["rm", "-f", "--ignore-unmatch", &rel])?;

        // an uncommitted write is invisible to `git rm`, clean it up by hand
        let target = self.root.join(path.to_rel_path());
        match fs::remove_file(target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.written.retain(|w| *w != rel);
        debug!(%path, "removed file");
        Ok(())
    }

    fn rename(&mut self, old: &TreePath, new: &TreePath) -> StoreResult<()> {
        let from = self.root.join(old.to_rel_path());
        if !from.exists() {
            return Err(StoreError::PathNotFound(old.clone()));
        }

        let to = self.root.join(new.to_rel_path());
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        let old_rel = old.to_string();
        let new_rel = new.to_string();
        if self.is_tracked(&old_rel)? {
            self.git(&["mv", "-f", &old_rel, &new_rel])?;
        } else {
            // not yet known to git, a plain rename is equivalent
            fs::rename(from, to)?;
            self.written.retain(|w| *w != old_rel);
        }
        self.written.push(new_rel);
        debug!(%old, %new, "renamed file");
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<Option<CommitId>> {
        if self.written.is_empty() && self.deleted.is_empty() {
            return Ok(None);
        }

        if !self.written.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(self.written.iter().map(String::as_str));
            self.git(&args)?;
        }
        self.written.clear();
        self.deleted.clear();

        let message = self.status_for_message()?;
        if message.is_empty() {
            // everything pending cancelled out
            return Ok(None);
        }

        self.git(&["commit", "-m", &message])?;
        let head = self.current_head()?;
        self.marker.write(head)?;
        info!(commit = %head.short(), "committed pending changes");
        Ok(Some(head))
    }

    fn reset(&mut self) -> StoreResult<()> {
        // stage pending writes first so the hard reset actually discards them
        if !self.written.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(self.written.iter().map(String::as_str));
            self.git(&args)?;
        }
        let discarded = self.written.len() + self.deleted.len();
        self.written.clear();
        self.deleted.clear();

        if self.has_head()? {
            self.git(&["reset", "--hard", "HEAD"])?;
        }
        debug!(discarded, "hard reset to last commit");
        Ok(())
    }
}
