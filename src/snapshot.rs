//! Snapshots: materialized state at a transaction
//!
//! A snapshot pairs the last applied [`Transaction`] with the tree it
//! produced. Snapshots are values: `apply`, `edit` and `commit` all return
//! new snapshots and never touch `self`. The tree is shared behind an
//! `Arc` and only handed out by shared reference, so cloning a snapshot is
//! cheap and historical snapshots cannot be mutated.
//!
//! # Example
//!
//! ```
//! use chainlog::{Snapshot, Value, Path};
//!
//! let genesis = Snapshot::new();
//! let (t0, s0) = genesis
//!     .commit_edit(|data| {
//!         data.insert("foo".into(), Value::from(serde_json::json!({"bar": 1})));
//!     })
//!     .unwrap();
//! assert_eq!(t0.tid(), 0);
//! assert_eq!(s0.get(&Path::root().key("foo").key("bar")), Some(&Value::from(1i64)));
//!
//! // replaying the transaction on the old snapshot yields the same state
//! assert_eq!(genesis.apply(&t0).unwrap(), s0);
//! ```

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use crate::codec::{self, ExtensionRegistry};
use crate::diff::{diff_maps, DiffOptions};
use crate::error::{ApplyError, CodecError, Result};
use crate::hash::Hash;
use crate::transaction::Transaction;
use crate::value::{Action, Map, Path, PathSegment, Slot, Value};

/// Tree state after a given transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    transaction: Option<Transaction>,
    data: Arc<Map>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Empty tree, before genesis.
    pub fn new() -> Self {
        Self::with_data(Map::new())
    }

    /// Caller-supplied initial tree, before genesis. The first transaction
    /// applied must still be tid 0.
    pub fn with_data(data: Map) -> Self {
        Self {
            transaction: None,
            data: Arc::new(data),
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// `None` before genesis.
    pub fn tid(&self) -> Option<u64> {
        self.transaction.as_ref().map(Transaction::tid)
    }

    pub fn hash(&self) -> Option<&Hash> {
        self.transaction.as_ref().map(Transaction::hash)
    }

    pub fn data(&self) -> &Map {
        &self.data
    }

    /// Node at `path`, if it exists. The empty path is not a node.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        rest.iter()
            .try_fold(self.data.get(key)?, |node, segment| node.get(segment))
    }

    /// Tid the next applied transaction must carry, `None` once the tid
    /// space is used up.
    pub fn next_tid(&self) -> Option<u64> {
        match self.tid() {
            None => Some(0),
            Some(tid) => tid.checked_add(1),
        }
    }

    // ── Apply ──────────────────────────────────────────────────────────

    /// Replay `tx` on top of this snapshot, producing the next snapshot.
    ///
    /// All-or-nothing: if any action fails nothing is produced and `self`
    /// is left as it was.
    pub fn apply(&self, tx: &Transaction) -> std::result::Result<Snapshot, ApplyError> {
        self.check_successor(tx)?;

        let mut root = Value::Map(self.data.as_ref().clone());
        for action in tx.actions() {
            trace!(tid = tx.tid(), %action, "apply");
            if let Err(err) = apply_action(&mut root, action) {
                warn!(tid = tx.tid(), hash = %tx.hash(), error = %err, "transaction rejected");
                return Err(err);
            }
        }
        let Value::Map(data) = root else {
            return Err(ApplyError::TypeMismatch { path: Path::root() });
        };

        debug!(
            tid = tx.tid(),
            hash = %tx.hash(),
            actions = tx.actions().len(),
            "applied transaction"
        );
        Ok(Snapshot {
            transaction: Some(tx.clone()),
            data: Arc::new(data),
        })
    }

    /// Fold `apply` over `txs` in order, stopping at the first failure.
    pub fn apply_all<'a, I>(&self, txs: I) -> std::result::Result<Snapshot, ApplyError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        txs.into_iter()
            .try_fold(self.clone(), |snapshot, tx| snapshot.apply(tx))
    }

    fn check_successor(&self, tx: &Transaction) -> std::result::Result<(), ApplyError> {
        let expected = self
            .next_tid()
            .ok_or(ApplyError::TidExhausted { tid: u64::MAX })?;
        if tx.tid() != expected {
            return Err(ApplyError::TidMismatch {
                expected,
                actual: tx.tid(),
            });
        }
        if let Some(head) = &self.transaction {
            if tx.parent() != Some(head.hash()) {
                return Err(ApplyError::ParentMismatch {
                    tid: tx.tid(),
                    expected: *head.hash(),
                    actual: tx.parent().copied(),
                });
            }
        }
        Ok(())
    }

    // ── Diff & commit ──────────────────────────────────────────────────

    /// Actions that turn `baseline` into `self`.
    pub fn diff(&self, baseline: &Snapshot) -> Vec<Action> {
        diff_maps(&baseline.data, &self.data, &DiffOptions::default())
    }

    /// Same transaction, data edited by `f` on a private deep copy.
    pub fn edit<F: FnOnce(&mut Map)>(&self, f: F) -> Snapshot {
        let mut data = self.data.as_ref().clone();
        f(&mut data);
        Snapshot {
            transaction: self.transaction.clone(),
            data: Arc::new(data),
        }
    }

    /// Turn the edits of `self` relative to `baseline` into the next
    /// transaction, chained onto `self`'s transaction.
    ///
    /// Fails only when `self` already sits at the last representable tid.
    pub fn commit(
        &self,
        baseline: &Snapshot,
    ) -> std::result::Result<(Transaction, Snapshot), ApplyError> {
        self.commit_with(baseline, &DiffOptions::default())
    }

    pub fn commit_with(
        &self,
        baseline: &Snapshot,
        options: &DiffOptions,
    ) -> std::result::Result<(Transaction, Snapshot), ApplyError> {
        let actions = diff_maps(&baseline.data, &self.data, options);
        let tx = Transaction::new(self.transaction.as_ref(), actions)
            .map_err(|err| ApplyError::TidExhausted { tid: err.tid })?;
        debug!(tid = tx.tid(), hash = %tx.hash(), actions = tx.actions().len(), "committed");
        let snapshot = Snapshot {
            transaction: Some(tx.clone()),
            data: Arc::clone(&self.data),
        };
        Ok((tx, snapshot))
    }

    /// Edit, commit against `self`, and validate by replaying the result.
    pub fn commit_edit<F: FnOnce(&mut Map)>(
        &self,
        f: F,
    ) -> std::result::Result<(Transaction, Snapshot), ApplyError> {
        let (tx, _) = self.edit(f).commit(self)?;
        let next = self.apply(&tx)?;
        Ok((tx, next))
    }

    // ── Checkpoints ────────────────────────────────────────────────────

    /// Checkpoint form: `{"data": {...}, "transaction": <record>|null}`.
    pub fn to_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("data".to_owned(), codec::encode_value(&Value::Map(self.data.as_ref().clone())));
        let tx = match &self.transaction {
            Some(tx) => codec::transaction_record(tx.tid(), tx.parent(), tx.actions(), tx.hash()),
            None => Json::Null,
        };
        obj.insert("transaction".to_owned(), tx);
        codec::to_canonical_string(&Json::Object(obj))
    }

    /// Load a checkpoint. The embedded transaction is hash-verified; the
    /// data is taken as recorded.
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_json_with(s, ExtensionRegistry::builtin())
    }

    /// [`Snapshot::from_json`] resolving extension tags through `registry`.
    pub fn from_json_with(s: &str, registry: &ExtensionRegistry) -> Result<Self> {
        let Json::Object(mut obj) = serde_json::from_str::<Json>(s)? else {
            return Err(CodecError::Shape {
                expected: "checkpoint object",
                found: s.chars().take(32).collect(),
            }
            .into());
        };
        if let Some(extra) = obj.keys().find(|k| *k != "data" && *k != "transaction") {
            return Err(CodecError::Shape {
                expected: "checkpoint field",
                found: extra.clone(),
            }
            .into());
        }
        let data = match codec::decode_value_with(obj.remove("data").unwrap_or(Json::Null), registry)? {
            Value::Map(map) => map,
            other => {
                return Err(CodecError::Shape {
                    expected: "checkpoint data map",
                    found: other.kind_name().to_owned(),
                }
                .into())
            }
        };
        let transaction = match obj.remove("transaction") {
            None | Some(Json::Null) => None,
            Some(record) => Some(Transaction::from_record(record, registry)?),
        };
        Ok(Self {
            transaction,
            data: Arc::new(data),
        })
    }
}

// ── Action application ─────────────────────────────────────────────────

fn apply_action(root: &mut Value, action: &Action) -> std::result::Result<(), ApplyError> {
    let path = action.path();
    let (last, parents) = path
        .segments()
        .split_last()
        .ok_or(ApplyError::EmptyPath)?;
    let container = descend(root, parents)?;

    let not_found = || ApplyError::PathNotFound {
        prefix: Path::from(parents),
        segment: last.clone(),
    };

    match (container, last) {
        (Value::Map(map), PathSegment::Key(key)) => {
            check_old(path, map.get(key), action.old(), not_found)?;
            match action.new_value() {
                Slot::Present(value) => {
                    map.insert(key.clone(), value.clone());
                }
                Slot::Absent => {
                    map.remove(key).ok_or_else(not_found)?;
                }
            }
        }
        (Value::Seq(items), PathSegment::Index(index)) => {
            let index = *index;
            check_old(path, items.get(index), action.old(), not_found)?;
            match action.new_value() {
                Slot::Present(value) if index < items.len() => items[index] = value.clone(),
                Slot::Present(value) if index == items.len() => items.push(value.clone()),
                Slot::Present(_) => return Err(not_found()),
                Slot::Absent if index < items.len() => {
                    items.remove(index);
                }
                Slot::Absent => return Err(not_found()),
            }
        }
        _ => return Err(ApplyError::TypeMismatch { path: path.clone() }),
    }
    Ok(())
}

/// Walk `prefix` from `root`; every step must exist.
fn descend<'v>(
    root: &'v mut Value,
    prefix: &[PathSegment],
) -> std::result::Result<&'v mut Value, ApplyError> {
    let mut node = root;
    for (depth, segment) in prefix.iter().enumerate() {
        let not_found = || ApplyError::PathNotFound {
            prefix: Path::from(&prefix[..depth]),
            segment: segment.clone(),
        };
        node = match (node, segment) {
            (Value::Map(map), PathSegment::Key(key)) => map.get_mut(key).ok_or_else(not_found)?,
            (Value::Seq(items), PathSegment::Index(i)) => items.get_mut(*i).ok_or_else(not_found)?,
            _ => {
                return Err(ApplyError::TypeMismatch {
                    path: Path::from(&prefix[..=depth]),
                })
            }
        };
    }
    Ok(node)
}

/// Optimistic-concurrency guard: a present `old` must match what is there.
fn check_old(
    path: &Path,
    current: Option<&Value>,
    old: &Slot,
    not_found: impl Fn() -> ApplyError,
) -> std::result::Result<(), ApplyError> {
    let Some(expected) = old.as_value() else {
        return Ok(());
    };
    match current {
        None => Err(not_found()),
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(ApplyError::PreconditionFailed {
            path: path.clone(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
    }
}
