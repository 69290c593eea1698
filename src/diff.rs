//! Structural diff
//!
//! Computes the minimal list of [`Action`]s that turns one tree into
//! another. Equal subtrees produce nothing; maps are compared over the
//! union of their keys; sequences are compared position by position and
//! length changes are resolved by [`SequenceDiff`].
//!
//! `diff` and `Snapshot::apply` are inverses: applying the actions of
//! `diff(a, b)` to `a` yields exactly `b`.

use std::collections::BTreeSet;

use tracing::trace;

use crate::value::{Action, Map, Path, PathSegment, Slot, Value};

// ── Configuration ──────────────────────────────────────────────────────

/// How two sequences of different length are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceDiff {
    /// Diff the shared prefix element-wise, then emit appends for extra new
    /// elements (ascending indices) and truncations for extra old elements
    /// (descending indices, so each one removes the current last element).
    #[default]
    Positional,
    /// Replace the whole sequence with one action when the lengths differ.
    Replace,
}

/// Diff configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub sequences: SequenceDiff,
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequences(mut self, sequences: SequenceDiff) -> Self {
        self.sequences = sequences;
        self
    }
}

// ── Diff ───────────────────────────────────────────────────────────────

/// Actions turning `old` into `new`, rooted at the empty path.
pub fn diff(old: &Value, new: &Value) -> Vec<Action> {
    diff_with(old, new, &DiffOptions::default())
}

pub fn diff_with(old: &Value, new: &Value, options: &DiffOptions) -> Vec<Action> {
    let mut differ = Differ::new(options);
    differ.slots(Some(old), Some(new));
    differ.ops
}

/// Diff two root maps (snapshot data).
pub fn diff_maps(old: &Map, new: &Map, options: &DiffOptions) -> Vec<Action> {
    let mut differ = Differ::new(options);
    differ.maps(old, new);
    differ.ops
}

struct Differ<'o> {
    options: &'o DiffOptions,
    path: Vec<PathSegment>,
    ops: Vec<Action>,
}

impl<'o> Differ<'o> {
    fn new(options: &'o DiffOptions) -> Self {
        Self {
            options,
            path: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// `None` stands for an absent side.
    fn slots(&mut self, old: Option<&Value>, new: Option<&Value>) {
        match (old, new) {
            (Some(a), Some(b)) if a == b => {}
            (Some(Value::Map(a)), Some(Value::Map(b))) => self.maps(a, b),
            (Some(Value::Seq(a)), Some(Value::Seq(b))) => self.seqs(a, b),
            (None, None) => {
                // Key iteration is over the union of both maps, so a key is
                // always present on at least one side.
                debug_assert!(false, "absent on both sides at {}", Path::from(&self.path[..]));
            }
            (old, new) => self.emit(old, new),
        }
    }

    fn maps(&mut self, old: &Map, new: &Map) {
        let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        for key in keys {
            self.path.push(PathSegment::Key(key.clone()));
            self.slots(old.get(key), new.get(key));
            self.path.pop();
        }
    }

    fn seqs(&mut self, old: &[Value], new: &[Value]) {
        if old.len() != new.len() && self.options.sequences == SequenceDiff::Replace {
            self.emit(Some(&Value::Seq(old.to_vec())), Some(&Value::Seq(new.to_vec())));
            return;
        }

        let shared = old.len().min(new.len());
        for i in 0..shared {
            self.path.push(PathSegment::Index(i));
            self.slots(Some(&old[i]), Some(&new[i]));
            self.path.pop();
        }
        // appends
        for (i, item) in new.iter().enumerate().skip(shared) {
            self.path.push(PathSegment::Index(i));
            self.emit(None, Some(item));
            self.path.pop();
        }
        // truncations, last index first
        for (i, item) in old.iter().enumerate().skip(shared).rev() {
            self.path.push(PathSegment::Index(i));
            self.emit(Some(item), None);
            self.path.pop();
        }
    }

    fn emit(&mut self, old: Option<&Value>, new: Option<&Value>) {
        let action = Action::new_unchecked(
            Path::from(&self.path[..]),
            Slot::from(old.cloned()),
            Slot::from(new.cloned()),
        );
        trace!(%action, "diff");
        self.ops.push(action);
    }
}
