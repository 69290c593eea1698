//! Transactions and the hash chain
//!
//! A transaction is an immutable, ordered batch of actions. It is named
//! by the SHA-256 of its canonical body `{actions, parent, tid}` and
//! names its predecessor by that predecessor's hash, so the log is
//! tamper-evident end to end.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{self, ExtensionRegistry};
use crate::error::{InvalidReason, InvalidTransaction, Result};
use crate::hash::Hash;
use crate::value::Action;

/// An immutable, hash-identified state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredTransaction", try_from = "StoredTransaction")]
pub struct Transaction {
    tid: u64,
    parent: Option<Hash>,
    actions: Vec<Action>,
    hash: Hash,
}

/// Wire form of a transaction, as persisted or received.
///
/// Nothing in here is trusted: turning it back into a [`Transaction`]
/// recomputes and checks the hash. Fields are declared in key order so the
/// serde form is byte-identical to [`Transaction::to_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredTransaction {
    pub actions: Vec<Action>,
    pub hash: Hash,
    pub parent: Option<Hash>,
    pub tid: u64,
}

/// Tid implied by `parent`.
fn successor_tid(parent: Option<&Transaction>) -> std::result::Result<u64, InvalidTransaction> {
    match parent {
        None => Ok(0),
        Some(p) => p
            .tid
            .checked_add(1)
            .ok_or_else(|| InvalidTransaction::new(p.tid, InvalidReason::TidOverflow(p.tid))),
    }
}

impl Transaction {
    /// Chain a new transaction onto `parent` (or start a chain with `None`).
    ///
    /// Fails only when the parent sits at `u64::MAX`.
    pub fn new(
        parent: Option<&Transaction>,
        actions: Vec<Action>,
    ) -> std::result::Result<Self, InvalidTransaction> {
        let tid = successor_tid(parent)?;
        Ok(Self::seal(tid, parent.map(|p| p.hash), actions))
    }

    /// Like [`Transaction::new`] with an explicit tid that must match the parent.
    pub fn with_tid(
        parent: Option<&Transaction>,
        tid: u64,
        actions: Vec<Action>,
    ) -> std::result::Result<Self, InvalidTransaction> {
        let expected = successor_tid(parent)?;
        if tid != expected {
            return Err(InvalidTransaction::new(
                tid,
                InvalidReason::TidMismatch {
                    expected,
                    actual: tid,
                },
            ));
        }
        Ok(Self::seal(tid, parent.map(|p| p.hash), actions))
    }

    /// Build from a bare parent hash. Only lineage can be checked here.
    pub fn from_parts(
        tid: u64,
        parent: Option<Hash>,
        actions: Vec<Action>,
    ) -> std::result::Result<Self, InvalidTransaction> {
        match (tid, parent) {
            (0, Some(_)) => Err(InvalidTransaction::new(tid, InvalidReason::GenesisWithParent)),
            (t, None) if t != 0 => Err(InvalidTransaction::new(
                tid,
                InvalidReason::RootWithoutZeroTid,
            )),
            _ => Ok(Self::seal(tid, parent, actions)),
        }
    }

    /// Reconstruct persisted or received data, verifying the recorded hash.
    pub fn from_stored(
        tid: u64,
        parent: Option<Hash>,
        actions: Vec<Action>,
        hash: Hash,
    ) -> std::result::Result<Self, InvalidTransaction> {
        let tx = Self::from_parts(tid, parent, actions)?;
        if tx.hash != hash {
            warn!(tid, recorded = %hash, computed = %tx.hash, "transaction hash mismatch");
            return Err(InvalidTransaction::new(
                tid,
                InvalidReason::HashMismatch {
                    expected: tx.hash,
                    actual: hash,
                },
            ));
        }
        Ok(tx)
    }

    fn seal(tid: u64, parent: Option<Hash>, actions: Vec<Action>) -> Self {
        let hash = codec::content_hash(&codec::transaction_body(tid, parent.as_ref(), &actions));
        Self {
            tid,
            parent,
            actions,
            hash,
        }
    }

    pub fn tid(&self) -> u64 {
        self.tid
    }

    pub fn parent(&self) -> Option<&Hash> {
        self.parent.as_ref()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    pub fn to_stored(&self) -> StoredTransaction {
        StoredTransaction::from(self.clone())
    }

    /// Canonical single-line JSON, as written to the log.
    pub fn to_json(&self) -> String {
        codec::to_canonical_string(&codec::transaction_record(
            self.tid,
            self.parent.as_ref(),
            &self.actions,
            &self.hash,
        ))
    }

    /// Parse and verify one log line.
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_json_with(s, ExtensionRegistry::builtin())
    }

    /// [`Transaction::from_json`] resolving extension tags through `registry`.
    pub fn from_json_with(s: &str, registry: &ExtensionRegistry) -> Result<Self> {
        Self::from_record(serde_json::from_str(s)?, registry)
    }

    pub(crate) fn from_record(
        record: serde_json::Value,
        registry: &ExtensionRegistry,
    ) -> Result<Self> {
        let stored = codec::decode_transaction_record(record, registry)?;
        Ok(Self::try_from(stored)?)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction {} ({})", self.tid, self.hash.short())
    }
}

impl From<Transaction> for StoredTransaction {
    fn from(tx: Transaction) -> Self {
        Self {
            actions: tx.actions,
            hash: tx.hash,
            parent: tx.parent,
            tid: tx.tid,
        }
    }
}

impl TryFrom<StoredTransaction> for Transaction {
    type Error = InvalidTransaction;

    fn try_from(stored: StoredTransaction) -> std::result::Result<Self, Self::Error> {
        Self::from_stored(stored.tid, stored.parent, stored.actions, stored.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, Error};
    use crate::value::{Path, Value};
    use serde_json::json;

    fn create_foo() -> Vec<Action> {
        vec![Action::create(
            Path::root().key("foo"),
            Value::from(json!({"bar": 1})),
        )]
    }

    #[test]
    fn test_genesis_has_tid_zero() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        assert_eq!(t0.tid(), 0);
        assert!(t0.parent().is_none());
        assert!(t0.is_genesis());
    }

    #[test]
    fn test_child_tid_and_parent() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let t1 = Transaction::new(Some(&t0), vec![]).unwrap();
        assert_eq!(t1.tid(), 1);
        assert_eq!(t1.parent(), Some(t0.hash()));
    }

    #[test]
    fn test_content_addressed() {
        let a = Transaction::new(None, create_foo()).unwrap();
        let b = Transaction::new(None, create_foo()).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);

        let c = Transaction::new(None, vec![]).unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_hash_covers_parent() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let other_root = Transaction::new(None, vec![]).unwrap();
        let t1 = Transaction::new(Some(&t0), vec![]).unwrap();
        let t1_other = Transaction::new(Some(&other_root), vec![]).unwrap();
        assert_ne!(t1.hash(), t1_other.hash());
    }

    #[test]
    fn test_with_tid_checks_parent() {
        let t0 = Transaction::new(None, vec![]).unwrap();
        assert!(Transaction::with_tid(Some(&t0), 1, vec![]).is_ok());
        let err = Transaction::with_tid(Some(&t0), 5, vec![]).unwrap_err();
        assert_eq!(
            err.reason,
            InvalidReason::TidMismatch {
                expected: 1,
                actual: 5
            }
        );
        assert!(Transaction::with_tid(None, 1, vec![]).is_err());
    }

    #[test]
    fn test_from_parts_lineage() {
        let h = *Transaction::new(None, vec![]).unwrap().hash();
        let err = Transaction::from_parts(3, None, vec![]).unwrap_err();
        assert_eq!(err.reason, InvalidReason::RootWithoutZeroTid);
        let err = Transaction::from_parts(0, Some(h), vec![]).unwrap_err();
        assert_eq!(err.reason, InvalidReason::GenesisWithParent);
        assert!(Transaction::from_parts(1, Some(h), vec![]).is_ok());
    }

    #[test]
    fn test_from_stored_roundtrip() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let t1 = Transaction::new(Some(&t0), vec![]).unwrap();
        let back = Transaction::from_stored(
            t1.tid(),
            t1.parent().copied(),
            t1.actions().to_vec(),
            *t1.hash(),
        )
        .unwrap();
        assert_eq!(back, t1);
    }

    #[test]
    fn test_from_stored_detects_tampering() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let t1 = Transaction::new(
            Some(&t0),
            vec![Action::update(
                Path::root().key("foo").key("bar"),
                Value::from(1i64),
                Value::from(2i64),
            )],
        )
        .unwrap();

        // altered actions
        let tampered = vec![Action::update(
            Path::root().key("foo").key("bar"),
            Value::from(1i64),
            Value::from(3i64),
        )];
        let err = Transaction::from_stored(1, t1.parent().copied(), tampered, *t1.hash())
            .unwrap_err();
        assert!(matches!(err.reason, InvalidReason::HashMismatch { .. }));

        // altered tid with a consistent parent
        let err = Transaction::from_stored(2, t1.parent().copied(), t1.actions().to_vec(), *t1.hash())
            .unwrap_err();
        assert!(matches!(err.reason, InvalidReason::HashMismatch { .. }));

        // altered parent
        let other = *Transaction::new(None, vec![]).unwrap().hash();
        let err = Transaction::from_stored(1, Some(other), t1.actions().to_vec(), *t1.hash())
            .unwrap_err();
        assert!(matches!(err.reason, InvalidReason::HashMismatch { .. }));

        // altered hash
        let err = Transaction::from_stored(1, t1.parent().copied(), t1.actions().to_vec(), other)
            .unwrap_err();
        assert_eq!(
            err.reason,
            InvalidReason::HashMismatch {
                expected: *t1.hash(),
                actual: other
            }
        );
    }

    #[test]
    fn test_json_line_roundtrip() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let line = t0.to_json();
        assert!(!line.contains('\n'));
        assert!(line.starts_with(r#"{"actions":[[["foo"],{"__ext__":"Absent"},{"bar":1}]],"hash":""#));
        assert!(line.ends_with(r#","parent":null,"tid":0}"#));
        assert_eq!(Transaction::from_json(&line).unwrap(), t0);
    }

    #[test]
    fn test_from_json_rejects_bad_hash() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let line = t0.to_json().replace(r#"{"bar":1}"#, r#"{"bar":2}"#);
        let err = Transaction::from_json(&line).unwrap_err();
        assert!(matches!(err, Error::InvalidTransaction(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            Transaction::from_json("{not json").unwrap_err(),
            Error::Codec(_)
        ));
    }

    #[test]
    fn test_serde_goes_through_verification() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let text = serde_json::to_string(&t0).unwrap();
        let back: Transaction = serde_json::from_str(&text).unwrap();
        assert_eq!(back, t0);

        let mut stored = t0.to_stored();
        stored.tid = 0;
        stored.hash = Hash::digest(b"forged");
        let text = serde_json::to_string(&stored).unwrap();
        assert!(serde_json::from_str::<Transaction>(&text).is_err());
    }

    #[test]
    fn test_from_json_rejects_injected_fields() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let line = t0.to_json();

        // extra top-level key next to a still-valid hash
        let padded = line.replacen('{', r#"{"note":"EVIL","#, 1);
        assert!(matches!(
            Transaction::from_json(&padded).unwrap_err(),
            Error::Codec(CodecError::Shape { .. })
        ));
        assert!(serde_json::from_str::<Transaction>(&padded).is_err());

        // payload smuggled into the absent marker
        let smuggled = line.replace(
            r#"{"__ext__":"Absent"}"#,
            r#"{"__ext__":"Absent","data":"EVIL"}"#,
        );
        assert_ne!(smuggled, line);
        assert!(matches!(
            Transaction::from_json(&smuggled).unwrap_err(),
            Error::Codec(CodecError::Shape { .. })
        ));
        assert!(serde_json::from_str::<Transaction>(&smuggled).is_err());

        // missing field
        let t1 = Transaction::new(Some(&t0), vec![]).unwrap();
        let line = t1.to_json();
        let trimmed = line.replace(r#","tid":1"#, "");
        assert!(Transaction::from_json(&trimmed).is_err());
    }

    #[test]
    fn test_serde_matches_canonical_line() {
        let t0 = Transaction::new(None, create_foo()).unwrap();
        let t1 = Transaction::new(Some(&t0), vec![]).unwrap();
        for tx in [&t0, &t1] {
            assert_eq!(serde_json::to_string(tx).unwrap(), tx.to_json());
        }
    }

    #[test]
    fn test_no_successor_after_last_tid() {
        let h = *Transaction::new(None, vec![]).unwrap().hash();
        let last = Transaction::from_parts(u64::MAX, Some(h), vec![]).unwrap();
        assert_eq!(
            Transaction::new(Some(&last), vec![]).unwrap_err().reason,
            InvalidReason::TidOverflow(u64::MAX)
        );
        assert_eq!(
            Transaction::with_tid(Some(&last), 0, vec![]).unwrap_err().reason,
            InvalidReason::TidOverflow(u64::MAX)
        );

        // the last tid itself still round-trips through the log form
        assert_eq!(Transaction::from_json(&last.to_json()).unwrap(), last);
    }

    #[test]
    fn test_from_json_with_registry() {
        let t0 = Transaction::new(
            None,
            vec![Action::create(
                Path::root().key("tags"),
                Value::set([Value::from("b"), Value::from("a")]),
            )],
        )
        .unwrap();
        let line = t0.to_json();
        assert!(line.contains(r#"{"__ext__":"set","data":["a","b"]}"#));
        assert_eq!(Transaction::from_json(&line).unwrap(), t0);

        let err = Transaction::from_json_with(&line, &ExtensionRegistry::empty()).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::UnknownExtension(ref tag)) if tag == "set"
        ));
    }

    #[test]
    fn test_display() {
        let t0 = Transaction::new(None, vec![]).unwrap();
        assert_eq!(t0.to_string(), format!("transaction 0 ({})", t0.hash().short()));
    }
}
