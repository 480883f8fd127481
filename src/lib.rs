//! gitrows - a git repository as a transactional record store
//!
//! Each record of a host application becomes one plain-text file at
//! `<collection>/<key>.txt`; each host transaction becomes one git
//! commit. The full history of every record is preserved in `.git/`,
//! and the host's fast queryable copy of the data can always be
//! rebuilt from the repository head.
//!
//! # Example
//!
//! ```no_run
//! use gitrows::{
//!     FieldDef, FieldKind, FieldValue, GitStore, Record, Schema, SchemaRegistry, StoreOptions,
//! };
//! # use gitrows::{SnapshotCache, StoreResult, CollectionName};
//! # struct NullCache;
//! # impl SnapshotCache for NullCache {
//! #     fn discard(&mut self) -> StoreResult<()> { Ok(()) }
//! #     fn load_collection(&mut self, _: &CollectionName, _: Vec<Record>) -> StoreResult<()> { Ok(()) }
//! # }
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register(Schema::new(
//!     "users",
//!     vec![
//!         FieldDef::primary_key("id", FieldKind::Integer),
//!         FieldDef::new("name", FieldKind::Text),
//!     ],
//! )?)?;
//!
//! GitStore::init("./my_store".as_ref())?;
//! let mut cache = NullCache;
//! let (store, _) = GitStore::open(StoreOptions::new("./my_store"), registry, &mut cache)?;
//!
//! let alice = Record::new()
//!     .with("id", FieldValue::Integer(1))
//!     .with("name", FieldValue::Text("Alice".to_string()));
//! store.record_inserted("users", &alice)?;
//! store.transaction_committed()?;
//! store.close()?;
//! # Ok::<(), gitrows::StoreError>(())
//! ```

pub mod backend;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod marker;
pub mod recovery;
pub mod store;
pub mod tree;
pub mod types;

pub use backend::{Backend, BackendKind, ObjectBackend, PorcelainBackend};
pub use codec::{EncodeError, FieldDef, FieldKind, FieldValue, Record, Schema, SchemaRegistry};
pub use dispatch::Dispatcher;
pub use error::{StoreError, StoreResult};
pub use marker::{Marker, MARKER_FILE};
pub use recovery::{RecoveryOutcome, SnapshotCache};
pub use store::{GitStore, StoreOptions};
pub use types::{
    CollectionName, CommitId, CommitSignature, InvalidNameError, RecordKey, TreePath,
};
