//! Sticky indices: position references that stay meaningful across
//! concurrent edits.
//!
//! A sticky index anchors to a concrete operation unit instead of a
//! numeric offset, so insertions and deletions elsewhere in the branch
//! shift it naturally. Resolution is recomputed on demand, never cached.

use weft_buffers::{Reader, Writer};

use crate::branch::{BranchCore, Sealed, SharedRef};
use crate::doc::Doc;
use crate::error::{BranchError, CodecError, StateError};
use crate::id::Id;
use crate::store::{BranchId, Store};
use crate::txn::Transaction;

/// Which side of the tracked position the index sticks to when an
/// insertion lands exactly there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    /// Stay before content inserted at the tracked offset.
    Before,
    /// Stay after content inserted at the tracked offset.
    After,
}

/// A stable position inside a sequence branch.
#[derive(Debug, Clone)]
pub struct StickyIndex {
    core: BranchCore,
    anchor: Option<Id>,
    assoc: Assoc,
}

impl StickyIndex {
    /// Captures the position currently at `index`. `None` if `index` is
    /// out of bounds.
    pub fn at(
        branch: &impl SharedRef,
        txn: &Transaction,
        index: u64,
        assoc: Assoc,
    ) -> Result<Option<StickyIndex>, BranchError> {
        let core = branch.core().clone();
        let doc = core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let len = store.branch(core.id).visible_len();
        if index > len {
            return Ok(None);
        }
        let anchor = match assoc {
            Assoc::After => {
                if index == len {
                    None
                } else {
                    unit_at_visible(&store, core.id, index)
                }
            }
            Assoc::Before => {
                if index == 0 {
                    None
                } else {
                    unit_at_visible(&store, core.id, index - 1)
                }
            }
        };
        Ok(Some(StickyIndex {
            core,
            anchor,
            assoc,
        }))
    }

    pub fn assoc(&self) -> Assoc {
        self.assoc
    }

    /// Resolves the current numeric offset. `None` when the anchored
    /// content was deleted and no neighbor survives on the association
    /// side.
    pub fn read(&self, txn: &Transaction) -> Result<Option<u64>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let branch = self.core.id;
        let Some(anchor) = self.anchor else {
            return Ok(Some(match self.assoc {
                Assoc::Before => 0,
                Assoc::After => store.branch(branch).visible_len(),
            }));
        };
        let Some((idx, offset)) = store.find_containing(branch, anchor) else {
            return Ok(None);
        };
        if !store.branch(branch).seq[idx].deleted {
            let base = visible_units_before(&store, branch, idx);
            return Ok(Some(match self.assoc {
                Assoc::Before => base + offset + 1,
                Assoc::After => base + offset,
            }));
        }
        // Anchor tombstoned: fall back to the nearest surviving neighbor
        // on the association side.
        match self.assoc {
            Assoc::Before => {
                let seq = &store.branch(branch).seq;
                for prev in (0..idx).rev() {
                    if !seq[prev].deleted {
                        let base = visible_units_before(&store, branch, prev);
                        return Ok(Some(base + seq[prev].len()));
                    }
                }
                Ok(None)
            }
            Assoc::After => {
                let seq = &store.branch(branch).seq;
                for next in idx + 1..seq.len() {
                    if !seq[next].deleted {
                        return Ok(Some(visible_units_before(&store, branch, next)));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Serializes the position so it can be shipped to a peer holding a
    /// replica of the same document.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        let doc = self.core.doc()?;
        let store = doc.store.borrow();
        let mut w = Writer::new();
        match store.branch(self.core.id).created_by {
            None => {
                w.u8(0);
                w.u8(crate::sync::kind_to_byte(self.core.kind));
                w.var_str(store.branch(self.core.id).name.as_deref().unwrap_or_default());
            }
            Some(id) => {
                w.u8(1);
                w.var_u64(id.client);
                w.var_u64(id.clock);
            }
        }
        match self.anchor {
            Some(id) => {
                w.u8(1);
                w.var_u64(id.client);
                w.var_u64(id.clock);
            }
            None => w.u8(0),
        }
        w.u8(match self.assoc {
            Assoc::Before => 0,
            Assoc::After => 1,
        });
        Ok(w.into_vec())
    }

    /// Restores a shipped position against `doc`.
    pub fn decode(doc: &Doc, bytes: &[u8]) -> Result<StickyIndex, CodecError> {
        let mut r = Reader::new(bytes);
        let branch: BranchId = match r.u8()? {
            0 => {
                let kind = crate::sync::kind_from_byte(r.u8()?)?;
                let name = r.var_str()?.to_owned();
                doc.inner
                    .store
                    .borrow_mut()
                    .root_branch(&name, kind)
                    .map_err(|_| CodecError::Payload)?
            }
            1 => {
                let client = r.var_u64()?;
                let clock = r.var_u64()?;
                doc.inner
                    .store
                    .borrow()
                    .branch_by_item
                    .get(&Id::new(client, clock))
                    .copied()
                    .ok_or(CodecError::Payload)?
            }
            other => {
                return Err(CodecError::InvalidTag {
                    tag: other,
                    context: "sticky branch ref",
                })
            }
        };
        let anchor = match r.u8()? {
            0 => None,
            1 => {
                let client = r.var_u64()?;
                let clock = r.var_u64()?;
                Some(Id::new(client, clock))
            }
            other => {
                return Err(CodecError::InvalidTag {
                    tag: other,
                    context: "sticky anchor flag",
                })
            }
        };
        let assoc = match r.u8()? {
            0 => Assoc::Before,
            1 => Assoc::After,
            other => {
                return Err(CodecError::InvalidTag {
                    tag: other,
                    context: "sticky assoc",
                })
            }
        };
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        let kind = doc.inner.store.borrow().branch(branch).kind;
        Ok(StickyIndex {
            core: BranchCore {
                doc: doc.downgrade(),
                id: branch,
                kind,
            },
            anchor,
            assoc,
        })
    }
}

/// Id of the unit at visible offset `index`.
fn unit_at_visible(store: &Store, branch: BranchId, index: u64) -> Option<Id> {
    let mut pos = 0;
    for item in &store.branch(branch).seq {
        if item.deleted {
            continue;
        }
        let len = item.len();
        if index < pos + len {
            return Some(Id::new(item.id.client, item.id.clock + (index - pos)));
        }
        pos += len;
    }
    None
}

/// Visible units strictly before the item at `idx`.
fn visible_units_before(store: &Store, branch: BranchId, idx: usize) -> u64 {
    store.branch(branch).seq[..idx]
        .iter()
        .filter(|item| !item.deleted)
        .map(|item| item.len())
        .sum()
}
