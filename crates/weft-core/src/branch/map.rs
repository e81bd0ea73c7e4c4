//! Shared map.

use crate::branch::{content_output, sealed, BranchCore, SharedRef};
use crate::error::BranchError;
use crate::txn::Transaction;
use crate::value::{Input, Output};

/// A shared key-value collection. Concurrent writes to the same key
/// converge to a single winner on every replica.
#[derive(Debug, Clone)]
pub struct Map {
    core: BranchCore,
}

impl sealed::Sealed for Map {
    fn core(&self) -> &BranchCore {
        &self.core
    }
}

impl SharedRef for Map {}

impl Map {
    pub(crate) fn from_core(core: BranchCore) -> Self {
        Self { core }
    }

    /// Sets `key`, replacing any visible value.
    pub fn insert(&self, txn: &Transaction, key: &str, value: Input) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store.borrow_mut().local_map_set(self.core.id, key, value);
        Ok(())
    }

    pub fn get(&self, txn: &Transaction, key: &str) -> Result<Option<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(store
            .branch(self.core.id)
            .visible_entry(key)
            .map(|entry| content_output(&self.core.doc, &store, &entry.content)))
    }

    /// Removes `key`; returns whether a visible value was removed.
    pub fn remove(&self, txn: &Transaction, key: &str) -> Result<bool, BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        let removed = doc.store.borrow_mut().local_map_remove(self.core.id, key);
        Ok(removed)
    }

    pub fn len(&self, txn: &Transaction) -> Result<u64, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let len = doc.store.borrow().branch(self.core.id).visible_keys().len() as u64;
        Ok(len)
    }

    pub fn is_empty(&self, txn: &Transaction) -> Result<bool, BranchError> {
        Ok(self.len(txn)? == 0)
    }

    pub fn keys(&self, txn: &Transaction) -> Result<Vec<String>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(store
            .branch(self.core.id)
            .visible_keys()
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    /// Snapshot of the visible entries, keys ascending.
    pub fn iter(&self, txn: &Transaction) -> Result<Vec<(String, Output)>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let branch = store.branch(self.core.id);
        Ok(branch
            .visible_keys()
            .into_iter()
            .map(|key| {
                let entry = branch.visible_entry(key).expect("key is visible");
                (
                    key.to_owned(),
                    content_output(&self.core.doc, &store, &entry.content),
                )
            })
            .collect())
    }

    /// Removes every key.
    pub fn clear(&self, txn: &Transaction) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        let keys: Vec<String> = {
            let store = doc.store.borrow();
            store
                .branch(self.core.id)
                .visible_keys()
                .into_iter()
                .map(str::to_owned)
                .collect()
        };
        let mut store = doc.store.borrow_mut();
        for key in keys {
            store.local_map_remove(self.core.id, &key);
        }
        Ok(())
    }
}
