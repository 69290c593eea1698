//! Merge strategies for diverging branches
//!
//! Two transactions built on the same parent cannot both extend the
//! chain. A [`MergeStrategy`] decides what to do: either rebase the other
//! branch's work on top of the surviving head as one new transaction, or
//! report conflicts for the caller to settle.

use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::transaction::Transaction;
use crate::value::{Action, Path, PathSegment};

/// Overlapping edits that a strategy refused to combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Location of the incoming edit
    pub path: Path,
    /// Description of the conflict
    pub description: String,
    /// Surviving-branch actions that touch the same location
    pub ours: Vec<Action>,
    /// Incoming actions
    pub theirs: Vec<Action>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.description)
    }
}

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Transaction to apply on top of `ours`
    Merged(Transaction),
    /// Conflicts that need manual resolution
    Conflict(Vec<Conflict>),
}

impl Resolution {
    /// True if merge is clean (no conflicts)
    pub fn is_clean(&self) -> bool {
        matches!(self, Resolution::Merged(_))
    }
}

/// Reconciles two transactions that share a parent.
///
/// `baseline` is the snapshot both were built on; `ours` is the branch
/// that survives. A merged transaction names `ours` as its parent and must
/// apply cleanly to `baseline.apply(ours)`.
pub trait MergeStrategy {
    fn resolve(
        &self,
        baseline: &Snapshot,
        ours: &Transaction,
        theirs: &Transaction,
    ) -> Result<Resolution>;
}

// ── Disjoint paths ─────────────────────────────────────────────────────

/// Keep incoming actions whose paths do not overlap any action of `ours`.
///
/// Two paths overlap when one is a prefix of the other, or when they part
/// ways at two indices of the same sequence (positions shift under
/// appends and truncations). An incoming action identical to the single
/// surviving action it overlaps is already applied and is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisjointPaths;

impl MergeStrategy for DisjointPaths {
    fn resolve(
        &self,
        baseline: &Snapshot,
        ours: &Transaction,
        theirs: &Transaction,
    ) -> Result<Resolution> {
        if ours.parent() != theirs.parent() || ours.tid() != theirs.tid() {
            return Err(Error::UnrelatedBranches {
                ours: *ours.hash(),
                theirs: *theirs.hash(),
            });
        }
        let head = baseline.apply(ours)?;

        let mut kept = Vec::new();
        let mut conflicts = Vec::new();
        for action in theirs.actions() {
            let overlapping: Vec<Action> = ours
                .actions()
                .iter()
                .filter(|o| paths_overlap(o.path(), action.path()))
                .cloned()
                .collect();
            match overlapping.as_slice() {
                [] => kept.push(action.clone()),
                [same] if same == action => {}
                _ => conflicts.push(Conflict {
                    path: action.path().clone(),
                    description: format!(
                        "overlaps {} action(s) on the surviving branch",
                        overlapping.len()
                    ),
                    ours: overlapping,
                    theirs: vec![action.clone()],
                }),
            }
        }

        if !conflicts.is_empty() {
            debug!(
                ours = %ours.hash(),
                theirs = %theirs.hash(),
                conflicts = conflicts.len(),
                "merge conflicted"
            );
            return Ok(Resolution::Conflict(conflicts));
        }

        let merged = Transaction::new(Some(ours), kept)?;
        head.apply(&merged)?;
        debug!(
            ours = %ours.hash(),
            theirs = %theirs.hash(),
            merged = %merged.hash(),
            actions = merged.actions().len(),
            "merged branches"
        );
        Ok(Resolution::Merged(merged))
    }
}

/// True if edits at `a` and `b` can interfere.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    let diverge = a
        .segments()
        .iter()
        .zip(b.segments())
        .find(|(x, y)| x != y);
    match diverge {
        // one is a prefix of the other
        None => true,
        Some((PathSegment::Index(_), PathSegment::Index(_))) => true,
        Some(_) => false,
    }
}
