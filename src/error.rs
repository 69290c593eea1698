//! Error taxonomy
//!
//! Every failure is surfaced to the immediate caller as a typed value
//! carrying the offending path, tid or hash. Nothing here is retried.

use crate::hash::Hash;
use crate::value::{Path, PathSegment, Value};

// ── Transaction construction ───────────────────────────────────────────

/// Structural defect found while building or reconstructing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transaction {tid}: {reason}")]
pub struct InvalidTransaction {
    /// The tid the transaction claimed
    pub tid: u64,
    /// What was wrong with it
    pub reason: InvalidReason,
}

/// Why a transaction was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// Explicit tid disagrees with the tid implied by the parent.
    #[error("expected tid {expected}, got {actual}")]
    TidMismatch { expected: u64, actual: u64 },
    /// Recorded hash disagrees with the recomputed content hash.
    #[error("recorded hash {actual} does not match computed hash {expected}")]
    HashMismatch { expected: Hash, actual: Hash },
    /// A transaction without a parent that is not tid 0.
    #[error("transaction without a parent must have tid 0")]
    RootWithoutZeroTid,
    /// Tid 0 claiming a parent.
    #[error("transaction 0 must not have a parent")]
    GenesisWithParent,
    /// The parent already carries the largest representable tid.
    #[error("tid {0} has no successor")]
    TidOverflow(u64),
}

impl InvalidTransaction {
    pub(crate) fn new(tid: u64, reason: InvalidReason) -> Self {
        Self { tid, reason }
    }
}

/// An action with neither an old nor a new value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action at {path} has neither an old nor a new value")]
pub struct InvalidAction {
    pub path: Path,
}

// ── Apply ──────────────────────────────────────────────────────────────

/// Failure while replaying a transaction onto a snapshot.
///
/// Any of these aborts the whole `apply` call; the source snapshot is
/// never touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("cannot apply tid {actual} to a snapshot expecting tid {expected}")]
    TidMismatch { expected: u64, actual: u64 },
    #[error("transaction {tid} names parent {actual:?}, snapshot head is {expected}")]
    ParentMismatch {
        tid: u64,
        expected: Hash,
        actual: Option<Hash>,
    },
    #[error("{prefix} has no entry {segment}")]
    PathNotFound { prefix: Path, segment: PathSegment },
    #[error("type mismatch while descending into {path}")]
    TypeMismatch { path: Path },
    #[error("expected {path} == {expected}, got {actual}")]
    PreconditionFailed {
        path: Path,
        expected: Value,
        actual: Value,
    },
    #[error("action has an empty path")]
    EmptyPath,
    #[error("snapshot at tid {tid} has no successor tid")]
    TidExhausted { tid: u64 },
}

// ── Codec ──────────────────────────────────────────────────────────────

/// Failure while decoding the canonical JSON form.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid hash encoding {0:?}")]
    InvalidHash(String),
    #[error("unknown extension tag {0:?}")]
    UnknownExtension(String),
    #[error("extension tag {0:?} is reserved")]
    ReservedExtension(String),
    #[error("absent marker is not allowed inside a value")]
    UnexpectedAbsent,
    #[error("expected {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: String,
    },
    #[error(transparent)]
    Action(#[from] InvalidAction),
}

impl CodecError {
    pub(crate) fn shape(expected: &'static str, found: &serde_json::Value) -> Self {
        Self::Shape {
            expected,
            found: found.to_string(),
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────────

/// Failure while indexing or walking stored transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown transaction {0}")]
    UnknownTransaction(Hash),
    #[error("transaction {tid} references missing parent {parent}")]
    MissingParent { tid: u64, parent: Hash },
    #[error("{base} is not an ancestor of {head}")]
    NotAncestor { base: Hash, head: Hash },
}

// ── Crate error ────────────────────────────────────────────────────────

/// Any error produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidTransaction(#[from] InvalidTransaction),
    #[error(transparent)]
    InvalidAction(#[from] InvalidAction),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transactions {ours} and {theirs} do not share a parent")]
    UnrelatedBranches { ours: Hash, theirs: Hash },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(CodecError::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
