//! The store facade.
//!
//! [`GitStore`] is what host applications hold: it owns the schema
//! registry and the dispatcher, translates record-level change
//! notifications into tree operations, and runs recovery on open. All
//! notification methods enqueue and return immediately; [`GitStore::drain`]
//! is the barrier that also surfaces deferred backend errors.

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::info;

use crate::backend::{head_of, Backend, BackendKind, ObjectBackend, PorcelainBackend};
use crate::codec::{Record, Schema, SchemaRegistry};
use crate::dispatch::Dispatcher;
use crate::error::{StoreError, StoreResult};
use crate::marker::Marker;
use crate::recovery::{self, RecoveryOutcome, SnapshotCache};
use crate::types::{CommitId, CommitSignature, RecordKey};

/// How to open a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    path: PathBuf,
    backend: BackendKind,
    signature: Option<CommitSignature>,
    mirror_working_copy: bool,
    excluded_untracked: Vec<String>,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: BackendKind::default(),
            signature: None,
            mirror_working_copy: false,
            // the host's own database file commonly sits next to the
            // record tree; never mention it in commit messages
            excluded_untracked: vec!["database.db".to_string()],
        }
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// commit identity; defaults to the repository config, then a
    /// built-in fallback
    pub fn signature(mut self, signature: CommitSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// keep a plain-file checkout next to `.git` (object-graph mode only)
    pub fn mirror_working_copy(mut self, mirror: bool) -> Self {
        self.mirror_working_copy = mirror;
        self
    }

    /// add an untracked root file the porcelain backend must keep out of
    /// commit messages
    pub fn exclude_untracked(mut self, name: impl Into<String>) -> Self {
        self.excluded_untracked.push(name.into());
        self
    }
}

/// A git-backed record store.
pub struct GitStore {
    registry: SchemaRegistry,
    dispatcher: Dispatcher,
    root: PathBuf,
}

impl GitStore {
    /// Create an empty repository at `path`. Idempotent on an existing
    /// repository.
    pub fn init(path: &Path) -> StoreResult<()> {
        Repository::init(path)?;
        Ok(())
    }

    /// Open the store: run recovery against `cache`, then start the
    /// worker that owns the chosen backend.
    pub fn open(
        options: StoreOptions,
        registry: SchemaRegistry,
        cache: &mut dyn SnapshotCache,
    ) -> StoreResult<(Self, RecoveryOutcome)> {
        let marker = Marker::in_repository(&options.path);
        let outcome = recovery::synchronize(&options.path, &registry, cache, &marker)?;
        info!(root = %options.path.display(), outcome = ?outcome, "store opened");

        let backend: Box<dyn Backend> = match options.backend {
            BackendKind::ObjectGraph => Box::new(ObjectBackend::open(
                &options.path,
                options.signature,
                options.mirror_working_copy,
            )?),
            BackendKind::Porcelain => Box::new(PorcelainBackend::open(
                &options.path,
                options.excluded_untracked,
            )?),
        };

        let dispatcher = Dispatcher::spawn(backend)?;
        let store = Self {
            registry,
            dispatcher,
            root: options.path,
        };
        Ok((store, outcome))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn schema(&self, collection: &str) -> StoreResult<&Schema> {
        self.registry
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    /// A record was inserted: stage its file.
    pub fn record_inserted(&self, collection: &str, record: &Record) -> StoreResult<()> {
        let schema = self.schema(collection)?;
        let key = schema.key_of(record)?;
        let body = schema.encode(record)?;
        self.dispatcher.write(schema.path_of(&key), body)
    }

    /// A record was updated: stage the new file body. When the primary
    /// key changed, pass the previous key so the file is moved first and
    /// its history stays connected.
    pub fn record_updated(
        &self,
        collection: &str,
        record: &Record,
        old_key: Option<&RecordKey>,
    ) -> StoreResult<()> {
        let schema = self.schema(collection)?;
        let key = schema.key_of(record)?;

        if let Some(old) = old_key {
            if old != &key {
                self.dispatcher
                    .rename(schema.path_of(old), schema.path_of(&key))?;
            }
        }

        let body = schema.encode(record)?;
        self.dispatcher.write(schema.path_of(&key), body)
    }

    /// A record was deleted: stage the removal of its file.
    pub fn record_deleted(&self, collection: &str, record: &Record) -> StoreResult<()> {
        let schema = self.schema(collection)?;
        let key = schema.key_of(record)?;
        self.dispatcher.remove(schema.path_of(&key))
    }

    /// The host transaction committed: turn everything staged since the
    /// last commit into one git commit.
    pub fn transaction_committed(&self) -> StoreResult<()> {
        self.dispatcher.commit()
    }

    /// The host transaction rolled back: discard everything staged since
    /// the last commit.
    pub fn transaction_rolled_back(&self) -> StoreResult<()> {
        self.dispatcher.reset()
    }

    /// Bulk statements bypass per-record change tracking, so their
    /// effects cannot be mirrored. Always errors, before anything is
    /// enqueued; the host must fail its transaction.
    pub fn bulk_mutation(&self, description: &str) -> StoreResult<()> {
        Err(StoreError::UnsupportedOperation(description.to_string()))
    }

    /// Block until every enqueued operation has been applied, surfacing
    /// the first deferred backend error.
    pub fn drain(&self) -> StoreResult<()> {
        self.dispatcher.drain()
    }

    /// Drain and shut down the worker.
    pub fn close(self) -> StoreResult<()> {
        let Self { dispatcher, .. } = self;
        dispatcher.close()
    }

    /// The current head commit, straight from the repository.
    pub fn head(&self) -> StoreResult<Option<CommitId>> {
        let repo = Repository::open(&self.root)?;
        Ok(head_of(&repo)?.map(|(commit, _)| commit))
    }
}
