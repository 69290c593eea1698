//! chainlog: hash-chained JSON document log
//!
//! An append-only log of atomic, multi-key updates over a single JSON-like
//! tree. Every transaction names its predecessor by SHA-256 hash, so the
//! history is tamper-evident; state at any point is recovered by replaying
//! transactions onto an empty (or checkpointed) snapshot.
//!
//! - Structural diff of two trees into minimal path-addressed actions
//! - Optimistic-concurrency apply: every action carries the value it expects
//! - Content-addressed transaction store with chain walks
//! - Pluggable merge strategies for diverging branches
//! - Line-delimited log reader/writer and snapshot checkpoints
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`value`] | Tree values, paths, slots and actions |
//! | [`codec`] | Canonical JSON encoding, extension registry and content hashing |
//! | [`hash`] | SHA-256 transaction identity |
//! | [`transaction`] | Immutable, hash-chained transactions |
//! | [`snapshot`] | Materialized state, apply, commit and checkpoints |
//! | [`diff`] | Structural diff engine |
//! | [`store`] | Content-addressed transaction store |
//! | [`merge`] | Merge-strategy contract and the disjoint-paths strategy |
//! | [`log`] | Line-delimited log reader/writer and replay |
//! | [`error`] | Error types |
//!
//! # Quick Start
//!
//! ```
//! use chainlog::{Path, Snapshot, Value};
//!
//! let genesis = Snapshot::new();
//!
//! // edit a private copy, then turn the edit into transaction 0
//! let edited = genesis.edit(|data| {
//!     data.insert("foo".into(), Value::from(serde_json::json!({"bar": 1})));
//! });
//! let (t0, s0) = edited.commit(&genesis).unwrap();
//! assert_eq!(t0.tid(), 0);
//! assert_eq!(t0.actions().len(), 1);
//!
//! // change a nested value; only that leaf shows up in the transaction
//! let (t1, s1) = s0
//!     .commit_edit(|data| {
//!         if let Some(Value::Map(foo)) = data.get_mut("foo") {
//!             foo.insert("bar".into(), Value::from(2i64));
//!         }
//!     })
//!     .unwrap();
//! assert_eq!(t1.parent(), Some(t0.hash()));
//! assert_eq!(t1.actions()[0].path(), &Path::root().key("foo").key("bar"));
//!
//! // replaying the chain reproduces the state
//! assert_eq!(genesis.apply_all([&t0, &t1]).unwrap(), s1);
//! ```

pub mod codec;
pub mod diff;
pub mod error;
pub mod hash;
pub mod log;
pub mod merge;
pub mod snapshot;
pub mod store;
pub mod transaction;
pub mod value;

pub use codec::{ExtensionCodec, ExtensionRegistry};
pub use diff::{diff, diff_maps, diff_with, DiffOptions, SequenceDiff};
pub use error::{
    ApplyError, CodecError, Error, InvalidAction, InvalidReason, InvalidTransaction, Result,
    StoreError,
};
pub use hash::Hash;
pub use log::{LogReader, LogWriter, TransactionSink, TransactionSource};
pub use merge::{Conflict, DisjointPaths, MergeStrategy, Resolution};
pub use snapshot::Snapshot;
pub use store::TransactionStore;
pub use transaction::{StoredTransaction, Transaction};
pub use value::{Action, ActionKind, ExtValue, Map, Path, PathSegment, Slot, Value};
