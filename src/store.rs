//! Content-addressed transaction store
//!
//! In-memory index of transactions keyed by their content hash. Parent
//! links form a tree rooted at genesis; diverging histories show up as
//! siblings, and every leaf is a head. Insertion requires the parent to be
//! present, so every stored transaction has a complete chain back to
//! genesis.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::hash::Hash;
use crate::snapshot::Snapshot;
use crate::transaction::Transaction;

/// Content-addressed transaction store (O(1) lookup via HashMap)
#[derive(Debug, Clone, Default)]
pub struct TransactionStore {
    transactions: HashMap<Hash, Transaction>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a transaction, returns its hash.
    ///
    /// Inserting a transaction that is already present is a no-op.
    pub fn insert(&mut self, tx: Transaction) -> std::result::Result<Hash, StoreError> {
        let hash = *tx.hash();
        if self.transactions.contains_key(&hash) {
            return Ok(hash);
        }
        if let Some(parent) = tx.parent() {
            if !self.transactions.contains_key(parent) {
                return Err(StoreError::MissingParent {
                    tid: tx.tid(),
                    parent: *parent,
                });
            }
        }
        debug!(tid = tx.tid(), hash = %hash, "stored transaction");
        self.transactions.insert(hash, tx);
        Ok(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.transactions.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Parent hash of a stored transaction; `None` for genesis or unknown.
    pub fn parent_of(&self, hash: &Hash) -> Option<&Hash> {
        self.transactions.get(hash).and_then(Transaction::parent)
    }

    /// Stored transactions whose parent is `hash`, sorted by hash.
    pub fn children_of(&self, hash: &Hash) -> Vec<Hash> {
        let mut children: Vec<Hash> = self
            .transactions
            .values()
            .filter(|tx| tx.parent() == Some(hash))
            .map(|tx| *tx.hash())
            .collect();
        children.sort();
        children
    }

    /// Transactions nobody builds on, sorted by hash.
    pub fn heads(&self) -> Vec<Hash> {
        let parents: std::collections::HashSet<&Hash> =
            self.transactions.values().filter_map(Transaction::parent).collect();
        let mut heads: Vec<Hash> = self
            .transactions
            .keys()
            .filter(|hash| !parents.contains(hash))
            .copied()
            .collect();
        heads.sort();
        heads
    }

    /// Total stored transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// List all stored transaction hashes.
    pub fn all_hashes(&self) -> Vec<Hash> {
        self.transactions.keys().copied().collect()
    }

    /// Remove a transaction by hash. Returns `true` if it existed.
    ///
    /// Children are not removed with it and stay orphaned until removed too.
    pub fn remove(&mut self, hash: &Hash) -> bool {
        self.transactions.remove(hash).is_some()
    }

    // ── Chain walks ────────────────────────────────────────────────────

    /// Chain from genesis up to and including `head`.
    pub fn chain_to(&self, head: &Hash) -> std::result::Result<Vec<&Transaction>, StoreError> {
        let mut chain: Vec<&Transaction> = Vec::new();
        let mut cursor = Some(*head);
        while let Some(hash) = cursor {
            let tx = self.lookup(&hash, chain.last().copied())?;
            cursor = tx.parent().copied();
            chain.push(tx);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Transactions after `base` up to and including `head`, oldest first.
    ///
    /// `base == None` means "from genesis". Fails with `NotAncestor` when
    /// `base` is not on `head`'s chain.
    pub fn chain_from(
        &self,
        base: Option<&Hash>,
        head: &Hash,
    ) -> std::result::Result<Vec<&Transaction>, StoreError> {
        let Some(base) = base else {
            return self.chain_to(head);
        };
        if !self.contains(base) {
            return Err(StoreError::UnknownTransaction(*base));
        }

        let mut chain: Vec<&Transaction> = Vec::new();
        let mut cursor = *head;
        while cursor != *base {
            let tx = self.lookup(&cursor, chain.last().copied())?;
            match tx.parent() {
                Some(parent) => cursor = *parent,
                None => {
                    return Err(StoreError::NotAncestor {
                        base: *base,
                        head: *head,
                    })
                }
            }
            chain.push(tx);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Replay the stored chain from `base`'s transaction up to `head`.
    pub fn replay(&self, base: &Snapshot, head: &Hash) -> Result<Snapshot> {
        let chain = self.chain_from(base.hash(), head)?;
        Ok(base.apply_all(chain)?)
    }

    fn lookup(
        &self,
        hash: &Hash,
        child: Option<&Transaction>,
    ) -> std::result::Result<&Transaction, StoreError> {
        self.transactions.get(hash).ok_or_else(|| match child {
            Some(child) => StoreError::MissingParent {
                tid: child.tid(),
                parent: *hash,
            },
            None => StoreError::UnknownTransaction(*hash),
        })
    }
}
