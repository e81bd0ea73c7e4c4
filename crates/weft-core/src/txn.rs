//! Transactions: the atomic unit of mutation and observation.
//!
//! All branch reads and writes go through a transaction. At most one
//! read-write transaction is open per document; commit finalizes its
//! mutations, encodes the per-transaction update, and synchronously
//! drives every observer before returning.

use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::branch::branch_output;
use crate::doc::{AfterTransactionEvent, DocInner, UpdateEvent};
use crate::error::{StateError, UpdateError};
use crate::event::{commit_events, Event};
use crate::store::{Gate, StateVector, TxnChanges};
use crate::sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnMode {
    Read,
    Write,
}

/// Gate check and transaction construction shared by the document- and
/// branch-level entry points. `None` signals contention: retry later.
pub(crate) fn begin(doc: &Rc<DocInner>, read_write: bool) -> Option<Transaction> {
    let mut store = doc.store.borrow_mut();
    match (read_write, store.gate) {
        (true, Gate::Idle) => {
            store.gate = Gate::Write;
            let before_sv = store.sv.clone();
            store.txn = Some(TxnChanges {
                before_sv,
                ..TxnChanges::default()
            });
            drop(store);
            Some(Transaction::new(doc.clone(), TxnMode::Write))
        }
        (false, Gate::Idle) => {
            store.gate = Gate::Read(1);
            drop(store);
            Some(Transaction::new(doc.clone(), TxnMode::Read))
        }
        (false, Gate::Read(readers)) => {
            store.gate = Gate::Read(readers + 1);
            drop(store);
            Some(Transaction::new(doc.clone(), TxnMode::Read))
        }
        _ => None,
    }
}

/// A scoped view of one document, read-only or read-write.
///
/// Reads stay valid on a committed read-only transaction; a committed
/// read-write transaction rejects everything (`TransactionClosed`).
/// Dropping an uncommitted read-write transaction commits it.
pub struct Transaction {
    pub(crate) doc: Rc<DocInner>,
    mode: TxnMode,
    done: Cell<bool>,
}

impl Transaction {
    pub(crate) fn new(doc: Rc<DocInner>, mode: TxnMode) -> Self {
        Self {
            doc,
            mode,
            done: Cell::new(false),
        }
    }

    pub fn writeable(&self) -> bool {
        self.mode == TxnMode::Write
    }

    pub(crate) fn check_usable(&self, doc: &Rc<DocInner>, write: bool) -> Result<(), StateError> {
        if !Rc::ptr_eq(&self.doc, doc) {
            return Err(StateError::ForeignTransaction);
        }
        if write {
            if self.mode == TxnMode::Read {
                return Err(StateError::ReadOnlyTransaction);
            }
            if self.done.get() {
                return Err(StateError::TransactionClosed);
            }
        } else if self.done.get() && self.mode == TxnMode::Write {
            return Err(StateError::TransactionClosed);
        }
        Ok(())
    }

    /// Finalizes the transaction. For a read-write transaction this
    /// advances the local clock, fires update observers with this
    /// transaction's encoded update, fires after-transaction observers,
    /// delivers deep events bottom-up, and feeds attached undo managers,
    /// all synchronously, in that order. A second commit signals
    /// `CommitAfterCommit`.
    pub fn commit(&self) -> Result<(), StateError> {
        if self.done.get() {
            return Err(StateError::CommitAfterCommit);
        }
        self.done.set(true);
        match self.mode {
            TxnMode::Read => {
                let mut store = self.doc.store.borrow_mut();
                store.gate = match store.gate {
                    Gate::Read(1) => Gate::Idle,
                    Gate::Read(readers) => Gate::Read(readers - 1),
                    other => other,
                };
                Ok(())
            }
            TxnMode::Write => {
                self.commit_write();
                Ok(())
            }
        }
    }

    fn commit_write(&self) {
        struct DeepCall {
            id: u64,
            callback: crate::doc::DeepCallback,
            events: Vec<Event>,
        }

        // Phase 1: finalize under the store borrow and materialize
        // everything observers will see.
        let mut store = self.doc.store.borrow_mut();
        let changes = store.txn.take().unwrap_or_default();
        store.gate = Gate::Idle;
        let replay = store.undo_replay;
        store.undo_replay = false;

        let mut observers = self.doc.observers.borrow_mut();
        observers.undo.retain(|weak| weak.strong_count() > 0);

        let ops = sync::ops_since(&store, &changes.before_sv);
        let produced = !ops.is_empty() || !changes.delete_set.is_empty();

        let v1_subs: Vec<(u64, crate::doc::UpdateCallback)> = observers
            .update_v1
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();
        let v2_subs: Vec<(u64, crate::doc::UpdateCallback)> = observers
            .update_v2
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();
        let after_subs: Vec<(u64, crate::doc::AfterTxnCallback)> = observers
            .after_txn
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();

        let update_v1 = (produced && !v1_subs.is_empty())
            .then(|| sync::encode_update_v1(&ops, &changes.delete_set));
        let update_v2 = (produced && !v2_subs.is_empty())
            .then(|| sync::encode_update_v2(&ops, &changes.delete_set));

        let after_event = (!after_subs.is_empty()).then(|| AfterTransactionEvent {
            before_state: sync::encode_state_vector(&changes.before_sv),
            after_state: sync::encode_state_vector(&store.sv),
            delete_set: changes.delete_set.iter_spans().collect(),
        });

        let doc_weak = Rc::downgrade(&self.doc);
        let mut deep_calls: Vec<DeepCall> = Vec::new();
        if !observers.deep.is_empty() {
            let branch_events = commit_events(&store, &changes, &doc_weak);
            for (&observed, subs) in observers.deep.iter() {
                if subs.is_empty() {
                    continue;
                }
                let observed_depth = store.depth_of(observed);
                let mut scoped: Vec<(usize, Event)> = branch_events
                    .iter()
                    .filter(|event| store.ancestor_of(event.branch, observed))
                    .map(|event| {
                        (
                            event.depth,
                            Event {
                                path: event.abs_path[observed_depth..].to_vec(),
                                target: branch_output(
                                    &doc_weak,
                                    store.branch(event.branch).kind,
                                    event.branch,
                                ),
                                data: event.data.clone(),
                            },
                        )
                    })
                    .collect();
                if scoped.is_empty() {
                    continue;
                }
                scoped.sort_by(|a, b| b.0.cmp(&a.0));
                let events: Vec<Event> = scoped.into_iter().map(|(_, event)| event).collect();
                for (&id, callback) in subs {
                    deep_calls.push(DeepCall {
                        id,
                        callback: callback.clone(),
                        events: events.clone(),
                    });
                }
            }
        }

        let undo_hooks: Vec<_> = observers
            .undo
            .iter()
            .filter_map(std::rc::Weak::upgrade)
            .collect();

        debug!(
            produced,
            changed = changes.changed_branches().len(),
            deep_deliveries = deep_calls.len(),
            "commit"
        );

        drop(observers);
        drop(store);

        // Phase 2: dispatch with the store released. Each callback is
        // re-checked against the registry right before the call, so a
        // racing unobserve wins.
        if let Some(bytes) = update_v1 {
            let event = UpdateEvent { update: bytes };
            for (id, callback) in v1_subs {
                if self.doc.observers.borrow().update_v1.contains_key(&id) {
                    (&mut *callback.borrow_mut())(&event);
                }
            }
        }
        if let Some(bytes) = update_v2 {
            let event = UpdateEvent { update: bytes };
            for (id, callback) in v2_subs {
                if self.doc.observers.borrow().update_v2.contains_key(&id) {
                    (&mut *callback.borrow_mut())(&event);
                }
            }
        }
        if let Some(event) = after_event {
            for (id, callback) in after_subs {
                if self.doc.observers.borrow().after_txn.contains_key(&id) {
                    (&mut *callback.borrow_mut())(&event);
                }
            }
        }
        for call in deep_calls {
            let alive = self
                .doc
                .observers
                .borrow()
                .deep
                .values()
                .any(|subs| subs.contains_key(&call.id));
            if alive {
                (&mut *call.callback.borrow_mut())(&call.events);
            }
        }

        if !replay {
            for hook in &undo_hooks {
                crate::undo::capture_commit(&self.doc, hook, &changes);
            }
        }
    }

    /// Encodes this document's state vector.
    pub fn state_vector(&self) -> Result<Vec<u8>, StateError> {
        self.check_usable(&self.doc, false)?;
        Ok(sync::encode_state_vector(&self.doc.store.borrow().sv))
    }

    /// Encodes every operation missing from `state_vector` (all history
    /// when `None`) as a V1 update.
    pub fn state_diff_v1(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>, UpdateError> {
        self.state_diff(state_vector, sync::encode_update_v1)
    }

    /// V2-encoded counterpart of [`Transaction::state_diff_v1`].
    pub fn state_diff_v2(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>, UpdateError> {
        self.state_diff(state_vector, sync::encode_update_v2)
    }

    fn state_diff(
        &self,
        state_vector: Option<&[u8]>,
        encode: fn(&[(u64, Vec<crate::store::Op>)], &crate::store::DeleteSet) -> Vec<u8>,
    ) -> Result<Vec<u8>, UpdateError> {
        self.check_usable(&self.doc, false).map_err(UpdateError::State)?;
        let remote = match state_vector {
            Some(bytes) => sync::decode_state_vector(bytes)?,
            None => StateVector::default(),
        };
        let store = self.doc.store.borrow();
        let ops = sync::ops_since(&store, &remote);
        Ok(encode(&ops, &store.ds))
    }

    /// Decodes and merges a peer update. The whole payload is decoded and
    /// validated before anything is applied, so a malformed update leaves
    /// the document untouched. Duplicate operations are suppressed by
    /// clock position; operations missing causal context are parked and
    /// retried automatically.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<(), UpdateError> {
        self.check_usable(&self.doc, true).map_err(UpdateError::State)?;
        let update = sync::decode_update(bytes)?;
        let mut store = self.doc.store.borrow_mut();
        store.validate_update(&update)?;
        store.integrate_update(update);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.done.get() {
            let _ = self.commit();
        }
    }
}
