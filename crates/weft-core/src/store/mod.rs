//! Per-document storage: the branch table, replica clocks, delete set,
//! transaction gate, and the bookkeeping a commit needs to encode its own
//! update and materialize change events.

mod integrate;
mod item;
mod op;

pub(crate) use item::{merge_attr, visible_attrs, BranchId, Content, Item, ItemAttrs, MapEntry};
pub(crate) use op::{DecodedUpdate, Op, OpBody, OpContent, ParentRef};

use std::collections::{HashMap, HashSet};

use crate::branch::BranchKind;
use crate::error::ValidationError;
use crate::id::{ClientId, Id, IdSpan};
use crate::value::Attrs;

/// Per-replica logical clock summary: for each client, the next clock
/// value this document has not yet seen. Clocks advance contiguously; a
/// gap means the carrying update is parked as pending.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StateVector {
    entries: HashMap<ClientId, u64>,
}

impl StateVector {
    pub fn next_clock(&self, client: ClientId) -> u64 {
        self.entries.get(&client).copied().unwrap_or(0)
    }

    pub fn covers(&self, id: Id) -> bool {
        id.clock < self.next_clock(id.client)
    }

    pub fn bump(&mut self, client: ClientId, len: u64) {
        *self.entries.entry(client).or_insert(0) += len;
    }

    /// Deterministic iteration order for codecs and diffs.
    pub fn iter_sorted(&self) -> Vec<(ClientId, u64)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(client, clock)| (*client, *clock))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn insert(&mut self, client: ClientId, clock: u64) {
        if clock > 0 {
            self.entries.insert(client, clock);
        }
    }
}

/// All operation units that have ever been tombstoned, as per-client
/// sorted disjoint `(clock, len)` ranges. State diffs always carry the
/// whole set; re-deleting is a no-op, which keeps apply idempotent.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DeleteSet {
    ranges: HashMap<ClientId, Vec<(u64, u64)>>,
}

impl DeleteSet {
    pub fn add(&mut self, span: IdSpan) {
        let ranges = self.ranges.entry(span.client).or_default();
        let pos = ranges.partition_point(|(clock, _)| *clock < span.clock);
        ranges.insert(pos, (span.clock, span.len));
        // Re-merge around the insertion point.
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for &(clock, len) in ranges.iter() {
            match merged.last_mut() {
                Some((mclock, mlen)) if clock <= *mclock + *mlen => {
                    let end = (clock + len).max(*mclock + *mlen);
                    *mlen = end - *mclock;
                }
                _ => merged.push((clock, len)),
            }
        }
        *ranges = merged;
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(Vec::is_empty)
    }

    pub fn iter_sorted(&self) -> Vec<(ClientId, Vec<(u64, u64)>)> {
        let mut out: Vec<_> = self
            .ranges
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(client, r)| (*client, r.clone()))
            .collect();
        out.sort_unstable_by_key(|(client, _)| *client);
        out
    }

    pub fn iter_spans(&self) -> impl Iterator<Item = IdSpan> + '_ {
        self.ranges.iter().flat_map(|(client, ranges)| {
            ranges
                .iter()
                .map(move |&(clock, len)| IdSpan::new(*client, clock, len))
        })
    }
}

/// A formatting operation kept for state-diff re-encoding.
#[derive(Debug, Clone)]
pub(crate) struct FormatRecord {
    pub branch: BranchId,
    pub spans: Vec<IdSpan>,
    pub attrs: Attrs,
}

/// Where the units of one integrated operation live, for state-diff
/// re-encoding.
#[derive(Debug, Clone)]
pub(crate) enum OpTarget {
    Seq(BranchId),
    MapKey(BranchId, String),
    Format,
}

#[derive(Debug, Clone)]
pub(crate) struct OpEntry {
    pub clock: u64,
    pub len: u64,
    pub target: OpTarget,
}

/// The transaction gate: an explicit state field, checked and flipped at
/// transaction creation, never an ambient lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Gate {
    #[default]
    Idle,
    Read(usize),
    Write,
}

/// Which cell of its parent a nested branch occupies.
#[derive(Debug, Clone)]
pub(crate) struct ParentSlot {
    pub branch: BranchId,
    /// Map key or XML attribute name; `None` for sequence slots.
    pub key: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BranchData {
    pub kind: BranchKind,
    /// Root name, or element tag for nested XML elements.
    pub name: Option<String>,
    pub parent: Option<ParentSlot>,
    pub created_by: Option<Id>,
    pub seq: Vec<Item>,
    pub map: HashMap<String, Vec<MapEntry>>,
}

impl BranchData {
    pub fn visible_len(&self) -> u64 {
        self.seq
            .iter()
            .filter(|item| !item.deleted)
            .map(Item::len)
            .sum()
    }

    /// The winning live entry for a map key.
    pub fn visible_entry(&self, key: &str) -> Option<&MapEntry> {
        self.map
            .get(key)?
            .iter()
            .filter(|entry| !entry.deleted)
            .max_by_key(|entry| (entry.id.clock, entry.id.client))
    }

    pub fn visible_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .map
            .iter()
            .filter(|(key, _)| self.visible_entry(key).is_some())
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Change bookkeeping for the currently open write transaction.
#[derive(Debug, Default)]
pub(crate) struct TxnChanges {
    pub before_sv: StateVector,
    /// Spans integrated this transaction, per branch.
    pub added: HashMap<BranchId, Vec<IdSpan>>,
    /// Spans tombstoned this transaction, per branch.
    pub deleted: HashMap<BranchId, Vec<IdSpan>>,
    /// Formatting applied this transaction, per branch.
    pub formats: HashMap<BranchId, Vec<(IdSpan, Attrs)>>,
    /// Map cells: value visible when the transaction first touched the
    /// key, for old/new event diffs.
    pub map_old: HashMap<(BranchId, String), Option<Content>>,
    /// This transaction's deletions as a delete set (update encoding and
    /// after-transaction events).
    pub delete_set: DeleteSet,
}

impl TxnChanges {
    pub fn changed_branches(&self) -> HashSet<BranchId> {
        let mut out: HashSet<BranchId> = HashSet::new();
        out.extend(self.added.keys().copied());
        out.extend(self.deleted.keys().copied());
        out.extend(self.formats.keys().copied());
        out.extend(self.map_old.keys().map(|(branch, _)| *branch));
        out
    }

    pub fn added_covers(&self, branch: BranchId, id: Id) -> bool {
        self.added
            .get(&branch)
            .is_some_and(|spans| spans.iter().any(|span| span.contains(id)))
    }

    pub fn deleted_covers(&self, branch: BranchId, id: Id) -> bool {
        self.deleted
            .get(&branch)
            .is_some_and(|spans| spans.iter().any(|span| span.contains(id)))
    }

    pub fn format_attrs_for(&self, branch: BranchId, id: Id) -> Option<&Attrs> {
        self.formats.get(&branch)?.iter().find_map(|(span, attrs)| {
            if span.contains(id) {
                Some(attrs)
            } else {
                None
            }
        })
    }

}

#[derive(Debug)]
pub(crate) struct Store {
    pub client_id: ClientId,
    pub guid: String,
    pub collection_id: Option<String>,
    pub should_load: bool,
    pub auto_load: bool,
    pub branches: Vec<BranchData>,
    pub roots: HashMap<String, BranchId>,
    pub branch_by_item: HashMap<Id, BranchId>,
    pub sv: StateVector,
    pub ds: DeleteSet,
    pub formats: HashMap<Id, FormatRecord>,
    pub op_index: HashMap<ClientId, Vec<OpEntry>>,
    pub pending_ops: Vec<Op>,
    pub pending_ds: Vec<IdSpan>,
    pub gate: Gate,
    pub txn: Option<TxnChanges>,
    /// Set while an undo/redo replay transaction is open so capture hooks
    /// know not to treat it as a fresh edit.
    pub undo_replay: bool,
}

impl Store {
    pub fn new(
        client_id: ClientId,
        guid: String,
        collection_id: Option<String>,
        should_load: bool,
        auto_load: bool,
    ) -> Self {
        Self {
            client_id,
            guid,
            collection_id,
            should_load,
            auto_load,
            branches: Vec::new(),
            roots: HashMap::new(),
            branch_by_item: HashMap::new(),
            sv: StateVector::default(),
            ds: DeleteSet::default(),
            formats: HashMap::new(),
            op_index: HashMap::new(),
            pending_ops: Vec::new(),
            pending_ds: Vec::new(),
            gate: Gate::default(),
            txn: None,
            undo_replay: false,
        }
    }

    pub fn branch(&self, id: BranchId) -> &BranchData {
        &self.branches[id]
    }

    /// Resolves or creates a root branch. A name, once bound to a kind,
    /// stays bound for the document's lifetime.
    pub fn root_branch(&mut self, name: &str, kind: BranchKind) -> Result<BranchId, ValidationError> {
        if let Some(&id) = self.roots.get(name) {
            let bound = self.branches[id].kind;
            if bound != kind {
                return Err(ValidationError::KindMismatch {
                    name: name.to_owned(),
                    bound,
                    requested: kind,
                });
            }
            return Ok(id);
        }
        let id = self.create_branch(kind, Some(name.to_owned()), None, None);
        self.roots.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn create_branch(
        &mut self,
        kind: BranchKind,
        name: Option<String>,
        parent: Option<ParentSlot>,
        created_by: Option<Id>,
    ) -> BranchId {
        let id = self.branches.len();
        self.branches.push(BranchData {
            kind,
            name,
            parent,
            created_by,
            seq: Vec::new(),
            map: HashMap::new(),
        });
        if let Some(item_id) = created_by {
            self.branch_by_item.insert(item_id, id);
        }
        id
    }

    /// Item index and in-item offset of the item containing `unit`.
    pub fn find_containing(&self, branch: BranchId, unit: Id) -> Option<(usize, u64)> {
        self.branches[branch]
            .seq
            .iter()
            .position(|item| item.contains_unit(unit))
            .map(|idx| (idx, unit.clock - self.branches[branch].seq[idx].id.clock))
    }

    /// Ensures an item *starts* exactly at `unit`; returns its index.
    pub fn split_before_unit(&mut self, branch: BranchId, unit: Id) -> Option<usize> {
        let (idx, offset) = self.find_containing(branch, unit)?;
        if offset == 0 {
            return Some(idx);
        }
        let right = self.branches[branch].seq[idx].split_off(offset);
        self.branches[branch].seq.insert(idx + 1, right);
        Some(idx + 1)
    }

    /// Ensures an item *ends* exactly at `unit`; returns its index.
    pub fn split_after_unit(&mut self, branch: BranchId, unit: Id) -> Option<usize> {
        let (idx, offset) = self.find_containing(branch, unit)?;
        let len = self.branches[branch].seq[idx].len();
        if offset + 1 == len {
            return Some(idx);
        }
        let right = self.branches[branch].seq[idx].split_off(offset + 1);
        self.branches[branch].seq.insert(idx + 1, right);
        Some(idx)
    }

    /// Resolves a visible insertion index to a concrete position:
    /// `(vec position for the new item, origin_left, origin_right)`.
    /// Callers validate `index <= visible_len` first.
    pub fn resolve_insert_pos(
        &mut self,
        branch: BranchId,
        index: u64,
    ) -> (usize, Option<Id>, Option<Id>) {
        if index == 0 {
            let right = self.branches[branch].seq.first().map(|item| item.id);
            return (0, None, right);
        }
        // Find the item holding visible unit `index - 1` and split so the
        // new item can sit directly after that unit.
        let mut remaining = index;
        let mut idx = 0;
        loop {
            let (deleted, len) = {
                let item = &self.branches[branch].seq[idx];
                (item.deleted, item.len())
            };
            if !deleted {
                if remaining <= len {
                    break;
                }
                remaining -= len;
            }
            idx += 1;
        }
        if remaining < self.branches[branch].seq[idx].len() {
            let right = self.branches[branch].seq[idx].split_off(remaining);
            self.branches[branch].seq.insert(idx + 1, right);
        }
        let origin_left = Some(self.branches[branch].seq[idx].last_id());
        let origin_right = self.branches[branch].seq.get(idx + 1).map(|item| item.id);
        (idx + 1, origin_left, origin_right)
    }

    /// Splits so the visible range `[index, index + len)` is covered by
    /// whole items; returns their indices in order. Callers validate the
    /// range first.
    pub fn isolate_visible_range(&mut self, branch: BranchId, index: u64, len: u64) -> Vec<usize> {
        let mut out = Vec::new();
        let mut skip = index;
        let mut remaining = len;
        let mut idx = 0;
        while remaining > 0 && idx < self.branches[branch].seq.len() {
            let (deleted, item_len) = {
                let item = &self.branches[branch].seq[idx];
                (item.deleted, item.len())
            };
            if deleted {
                idx += 1;
                continue;
            }
            if skip >= item_len {
                skip -= item_len;
                idx += 1;
                continue;
            }
            if skip > 0 {
                let right = self.branches[branch].seq[idx].split_off(skip);
                self.branches[branch].seq.insert(idx + 1, right);
                skip = 0;
                idx += 1;
                continue;
            }
            if item_len > remaining {
                let right = self.branches[branch].seq[idx].split_off(remaining);
                self.branches[branch].seq.insert(idx + 1, right);
            }
            out.push(idx);
            remaining = remaining.saturating_sub(item_len);
            idx += 1;
        }
        out
    }

    /// Visible position of a nested branch inside its parent's sequence.
    pub fn position_of_child(&self, parent: BranchId, child: BranchId) -> Option<u64> {
        let mut pos = 0;
        for item in &self.branches[parent].seq {
            if let Content::Branch(b) = item.content {
                if b == child {
                    return Some(pos);
                }
            }
            if !item.deleted {
                pos += item.len();
            }
        }
        None
    }

    /// Nesting depth: roots are 0.
    pub fn depth_of(&self, branch: BranchId) -> usize {
        let mut depth = 0;
        let mut current = branch;
        while let Some(slot) = &self.branches[current].parent {
            depth += 1;
            current = slot.branch;
        }
        depth
    }

    /// Walks ancestors from `branch` up to the document roots, innermost
    /// first: `(ancestor, slot leading to the previous hop)`.
    pub fn ancestor_of(&self, branch: BranchId, ancestor: BranchId) -> bool {
        let mut current = branch;
        loop {
            if current == ancestor {
                return true;
            }
            match &self.branches[current].parent {
                Some(slot) => current = slot.branch,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_set_merges_overlaps() {
        let mut ds = DeleteSet::default();
        ds.add(IdSpan::new(1, 0, 3));
        ds.add(IdSpan::new(1, 5, 2));
        ds.add(IdSpan::new(1, 3, 2));
        assert_eq!(ds.iter_sorted(), vec![(1, vec![(0, 7)])]);
        let spans: Vec<IdSpan> = ds.iter_spans().collect();
        assert_eq!(spans, vec![IdSpan::new(1, 0, 7)]);
    }

    #[test]
    fn state_vector_coverage() {
        let mut sv = StateVector::default();
        sv.bump(4, 3);
        assert!(sv.covers(Id::new(4, 2)));
        assert!(!sv.covers(Id::new(4, 3)));
        assert!(!sv.covers(Id::new(5, 0)));
        assert_eq!(sv.iter_sorted(), vec![(4, 3)]);
    }
}
