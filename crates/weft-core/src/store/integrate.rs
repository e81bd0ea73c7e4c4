//! Mutation paths: local edits appending fresh operations, and remote
//! integration placing decoded operations by their origin references.
//!
//! Both paths funnel into the same bookkeeping (state vector, op index,
//! transaction change sets), so commits encode updates and materialize
//! events the same way regardless of where an operation came from.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::branch::BranchKind;
use crate::error::{UpdateError, ValidationError};
use crate::id::{Id, IdSpan};
use crate::store::{
    merge_attr, BranchId, Content, DecodedUpdate, FormatRecord, Item, ItemAttrs, MapEntry, Op,
    OpBody, OpContent, OpEntry, OpTarget, ParentRef, ParentSlot, Store,
};
use crate::value::{Any, Attrs, Input};

enum Outcome {
    Applied,
    Pending(Op),
    Dropped,
}

impl Store {
    fn next_local_clock(&self) -> u64 {
        self.sv.next_clock(self.client_id)
    }

    fn record_op(&mut self, id: Id, len: u64, target: OpTarget) {
        self.op_index
            .entry(id.client)
            .or_default()
            .push(OpEntry {
                clock: id.clock,
                len,
                target,
            });
        self.sv.bump(id.client, len);
    }

    fn record_added(&mut self, branch: BranchId, span: IdSpan) {
        if let Some(txn) = self.txn.as_mut() {
            txn.added.entry(branch).or_default().push(span);
        }
    }

    fn capture_map_old(&mut self, branch: BranchId, key: &str) {
        let old = self
            .branches[branch]
            .visible_entry(key)
            .map(|entry| entry.content.clone());
        if let Some(txn) = self.txn.as_mut() {
            txn.map_old.entry((branch, key.to_owned())).or_insert(old);
        }
    }

    fn validate_index(&self, branch: BranchId, index: u64, len: u64) -> Result<(), ValidationError> {
        let visible = self.branches[branch].visible_len();
        if index + len > visible {
            return Err(ValidationError::IndexOutOfRange {
                index: index + len,
                len: visible,
            });
        }
        Ok(())
    }

    // ---- local edits ----------------------------------------------------

    pub fn local_insert_text(
        &mut self,
        branch: BranchId,
        index: u64,
        chunk: &str,
        attrs: Option<Attrs>,
    ) -> Result<(), ValidationError> {
        self.validate_index(branch, index, 0)?;
        if chunk.is_empty() {
            return Ok(());
        }
        let id = Id::new(self.client_id, self.next_local_clock());
        let (pos, origin_left, origin_right) = self.resolve_insert_pos(branch, index);
        let item = Item {
            id,
            origin_left,
            origin_right,
            content: Content::Text(chunk.to_owned()),
            attrs: seed_attrs(id, attrs),
            deleted: false,
        };
        let len = item.len();
        self.branches[branch].seq.insert(pos, item);
        self.record_op(id, len, OpTarget::Seq(branch));
        self.record_added(branch, IdSpan::new(id.client, id.clock, len));
        Ok(())
    }

    pub fn local_insert_embed(
        &mut self,
        branch: BranchId,
        index: u64,
        content: Any,
        attrs: Option<Attrs>,
    ) -> Result<(), ValidationError> {
        self.validate_index(branch, index, 0)?;
        let id = Id::new(self.client_id, self.next_local_clock());
        let (pos, origin_left, origin_right) = self.resolve_insert_pos(branch, index);
        let item = Item {
            id,
            origin_left,
            origin_right,
            content: Content::Embed(content),
            attrs: seed_attrs(id, attrs),
            deleted: false,
        };
        self.branches[branch].seq.insert(pos, item);
        self.record_op(id, 1, OpTarget::Seq(branch));
        self.record_added(branch, IdSpan::new(id.client, id.clock, 1));
        Ok(())
    }

    /// Inserts a run of cells into a sequence branch. Plain values are
    /// grouped into value-run items; each nested-branch seed becomes its
    /// own item plus the recursive edits that fill the new branch.
    pub fn local_insert_cells(
        &mut self,
        branch: BranchId,
        index: u64,
        cells: Vec<Input>,
    ) -> Result<(), ValidationError> {
        self.validate_index(branch, index, 0)?;
        let mut at = index;
        let mut run: Vec<Any> = Vec::new();
        for cell in cells {
            match cell {
                Input::Any(value) => run.push(value),
                seed => {
                    at += self.flush_value_run(branch, at, &mut run);
                    self.insert_branch_cell(branch, at, seed);
                    at += 1;
                }
            }
        }
        self.flush_value_run(branch, at, &mut run);
        Ok(())
    }

    fn flush_value_run(&mut self, branch: BranchId, index: u64, run: &mut Vec<Any>) -> u64 {
        if run.is_empty() {
            return 0;
        }
        let values = std::mem::take(run);
        let len = values.len() as u64;
        let id = Id::new(self.client_id, self.next_local_clock());
        let (pos, origin_left, origin_right) = self.resolve_insert_pos(branch, index);
        let item = Item {
            id,
            origin_left,
            origin_right,
            content: Content::Values(values),
            attrs: ItemAttrs::new(),
            deleted: false,
        };
        self.branches[branch].seq.insert(pos, item);
        self.record_op(id, len, OpTarget::Seq(branch));
        self.record_added(branch, IdSpan::new(id.client, id.clock, len));
        len
    }

    /// Inserts a nested-branch cell and returns the new branch.
    pub fn local_insert_branch(
        &mut self,
        branch: BranchId,
        index: u64,
        seed: Input,
    ) -> Result<BranchId, ValidationError> {
        self.validate_index(branch, index, 0)?;
        Ok(self.insert_branch_cell(branch, index, seed))
    }

    fn insert_branch_cell(&mut self, branch: BranchId, index: u64, seed: Input) -> BranchId {
        let id = Id::new(self.client_id, self.next_local_clock());
        let (kind, tag) = seed_kind(&seed);
        let child = self.create_branch(
            kind,
            tag,
            Some(ParentSlot {
                branch,
                key: None,
            }),
            Some(id),
        );
        let (pos, origin_left, origin_right) = self.resolve_insert_pos(branch, index);
        let item = Item {
            id,
            origin_left,
            origin_right,
            content: Content::Branch(child),
            attrs: ItemAttrs::new(),
            deleted: false,
        };
        self.branches[branch].seq.insert(pos, item);
        self.record_op(id, 1, OpTarget::Seq(branch));
        self.record_added(branch, IdSpan::new(id.client, id.clock, 1));
        self.fill_branch_seed(child, seed);
        child
    }

    fn fill_branch_seed(&mut self, child: BranchId, seed: Input) {
        match seed {
            Input::Text(text) | Input::XmlText(text) => {
                if !text.is_empty() {
                    let _ = self.local_insert_text(child, 0, &text, None);
                }
            }
            Input::Array(cells) => {
                let _ = self.local_insert_cells(child, 0, cells);
            }
            Input::Map(entries) => {
                for (key, value) in entries {
                    self.local_map_set(child, &key, value);
                }
            }
            Input::XmlElement(_) | Input::XmlFragment | Input::Any(_) => {}
        }
    }

    pub fn local_remove_range(
        &mut self,
        branch: BranchId,
        index: u64,
        len: u64,
    ) -> Result<(), ValidationError> {
        self.validate_index(branch, index, len)?;
        if len == 0 {
            return Ok(());
        }
        let covered = self.isolate_visible_range(branch, index, len);
        for idx in covered {
            let span = {
                let item = &mut self.branches[branch].seq[idx];
                item.deleted = true;
                IdSpan::new(item.id.client, item.id.clock, item.len())
            };
            self.tombstone_recorded(branch, span);
        }
        Ok(())
    }

    fn tombstone_recorded(&mut self, branch: BranchId, span: IdSpan) {
        self.ds.add(span);
        if let Some(txn) = self.txn.as_mut() {
            txn.deleted.entry(branch).or_default().push(span);
            txn.delete_set.add(span);
        }
    }

    pub fn local_format(
        &mut self,
        branch: BranchId,
        index: u64,
        len: u64,
        attrs: Attrs,
    ) -> Result<(), ValidationError> {
        self.validate_index(branch, index, len)?;
        if len == 0 || attrs.is_empty() {
            return Ok(());
        }
        let id = Id::new(self.client_id, self.next_local_clock());
        let covered = self.isolate_visible_range(branch, index, len);
        let mut spans = Vec::with_capacity(covered.len());
        for idx in covered {
            let item = &mut self.branches[branch].seq[idx];
            for (key, value) in &attrs {
                merge_attr(&mut item.attrs, key, id, value);
            }
            spans.push(IdSpan::new(item.id.client, item.id.clock, item.len()));
        }
        self.formats.insert(
            id,
            FormatRecord {
                branch,
                spans: spans.clone(),
                attrs: attrs.clone(),
            },
        );
        self.record_op(id, 1, OpTarget::Format);
        if let Some(txn) = self.txn.as_mut() {
            let entry = txn.formats.entry(branch).or_default();
            for span in spans {
                entry.push((span, attrs.clone()));
            }
        }
        Ok(())
    }

    pub fn local_map_set(&mut self, branch: BranchId, key: &str, value: Input) {
        self.capture_map_old(branch, key);
        // Local set supersedes the currently visible entry, so tombstone it
        // the way a remote delete would.
        let superseded: Vec<IdSpan> = self.branches[branch]
            .map
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| !entry.deleted)
                    .map(|entry| IdSpan::new(entry.id.client, entry.id.clock, 1))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(entries) = self.branches[branch].map.get_mut(key) {
            for entry in entries.iter_mut() {
                entry.deleted = true;
            }
        }
        for span in superseded {
            self.tombstone_recorded(branch, span);
        }

        let id = Id::new(self.client_id, self.next_local_clock());
        let content = match value {
            Input::Any(any) => Content::Value(any),
            seed => {
                let (kind, tag) = seed_kind(&seed);
                let child = self.create_branch(
                    kind,
                    tag,
                    Some(ParentSlot {
                        branch,
                        key: Some(key.to_owned()),
                    }),
                    Some(id),
                );
                self.branches[branch]
                    .map
                    .entry(key.to_owned())
                    .or_default()
                    .push(MapEntry {
                        id,
                        content: Content::Branch(child),
                        deleted: false,
                    });
                self.record_op(id, 1, OpTarget::MapKey(branch, key.to_owned()));
                self.record_added(branch, IdSpan::new(id.client, id.clock, 1));
                self.fill_branch_seed(child, seed);
                return;
            }
        };
        self.branches[branch]
            .map
            .entry(key.to_owned())
            .or_default()
            .push(MapEntry {
                id,
                content,
                deleted: false,
            });
        self.record_op(id, 1, OpTarget::MapKey(branch, key.to_owned()));
        self.record_added(branch, IdSpan::new(id.client, id.clock, 1));
    }

    pub fn local_map_remove(&mut self, branch: BranchId, key: &str) -> bool {
        if self.branches[branch].visible_entry(key).is_none() {
            return false;
        }
        self.capture_map_old(branch, key);
        let spans: Vec<IdSpan> = self.branches[branch]
            .map
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| !entry.deleted)
                    .map(|entry| IdSpan::new(entry.id.client, entry.id.clock, 1))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(entries) = self.branches[branch].map.get_mut(key) {
            for entry in entries.iter_mut() {
                entry.deleted = true;
            }
        }
        for span in spans {
            self.tombstone_recorded(branch, span);
        }
        true
    }

    // ---- remote integration ---------------------------------------------

    /// Root-kind validation, run over a fully decoded update before any
    /// state is touched.
    pub fn validate_update(&self, update: &DecodedUpdate) -> Result<(), UpdateError> {
        for (_, ops) in &update.ops {
            for op in ops {
                if let ParentRef::Root(name, kind) = op.parent() {
                    if let Some(&branch) = self.roots.get(name) {
                        let local = self.branches[branch].kind;
                        if local != *kind {
                            return Err(UpdateError::TypeMismatch {
                                name: name.clone(),
                                local,
                                remote: *kind,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Merges a decoded, validated update. Ops already covered by the
    /// state vector are dropped; ops with missing causal context are
    /// parked and retried.
    pub fn integrate_update(&mut self, update: DecodedUpdate) {
        let op_count: usize = update.ops.iter().map(|(_, ops)| ops.len()).sum();
        debug!(
            clients = update.ops.len(),
            ops = op_count,
            "integrating update"
        );
        for (_, ops) in update.ops {
            for op in ops {
                match self.try_integrate_op(op) {
                    Outcome::Pending(op) => self.pending_ops.push(op),
                    Outcome::Applied | Outcome::Dropped => {}
                }
            }
        }
        for (client, ranges) in update.delete_set {
            for (clock, len) in ranges {
                self.apply_delete_span(IdSpan::new(client, clock, len));
            }
        }
        self.retry_pending();
    }

    fn try_integrate_op(&mut self, mut op: Op) -> Outcome {
        let next = self.sv.next_clock(op.id.client);
        let span = op.span();
        if span.end() <= next {
            return Outcome::Dropped;
        }
        if op.id.clock > next {
            return Outcome::Pending(op);
        }
        if op.id.clock < next {
            let covered = next - op.id.clock;
            op = trim_op(op, covered);
        }
        if !self.op_ready(&op) {
            return Outcome::Pending(op);
        }
        self.integrate_ready_op(op);
        Outcome::Applied
    }

    fn op_ready(&self, op: &Op) -> bool {
        let parent_ready = match op.parent() {
            ParentRef::Root(_, _) => true,
            ParentRef::Item(id) => self.branch_by_item.contains_key(id),
        };
        if !parent_ready {
            return false;
        }
        match &op.body {
            OpBody::Item {
                origin_left,
                origin_right,
                ..
            } => {
                origin_left.map_or(true, |id| self.sv.covers(id))
                    && origin_right.map_or(true, |id| self.sv.covers(id))
            }
            OpBody::MapSet { .. } => true,
            OpBody::Format { spans, .. } => spans.iter().all(|span| self.sv.covers(span.last())),
        }
    }

    fn resolve_parent(&mut self, parent: &ParentRef) -> Option<BranchId> {
        match parent {
            ParentRef::Root(name, kind) => match self.root_branch(name, *kind) {
                Ok(branch) => Some(branch),
                Err(_) => None,
            },
            ParentRef::Item(id) => self.branch_by_item.get(id).copied(),
        }
    }

    fn integrate_ready_op(&mut self, op: Op) {
        let Some(branch) = self.resolve_parent(op.parent()) else {
            warn!(client = op.id.client, clock = op.id.clock, "op targets unknown parent; dropped");
            return;
        };
        let id = op.id;
        match op.body {
            OpBody::Item {
                origin_left,
                origin_right,
                content,
                attrs,
                ..
            } => {
                let len = content.unit_len();
                let content = self.materialize_content(id, branch, None, content);
                self.integrate_seq_item(branch, id, origin_left, origin_right, content, attrs);
                self.record_op(id, len, OpTarget::Seq(branch));
                self.record_added(branch, IdSpan::new(id.client, id.clock, len));
            }
            OpBody::MapSet { key, content, .. } => {
                self.capture_map_old(branch, &key);
                let content = self.materialize_content(id, branch, Some(&key), content);
                self.branches[branch]
                    .map
                    .entry(key.clone())
                    .or_default()
                    .push(MapEntry {
                        id,
                        content,
                        deleted: false,
                    });
                self.record_op(id, 1, OpTarget::MapKey(branch, key));
                self.record_added(branch, IdSpan::new(id.client, id.clock, 1));
            }
            OpBody::Format { spans, attrs, .. } => {
                for span in &spans {
                    self.format_span(branch, id, *span, &attrs);
                }
                self.formats.insert(
                    id,
                    FormatRecord {
                        branch,
                        spans: spans.clone(),
                        attrs: attrs.clone(),
                    },
                );
                self.record_op(id, 1, OpTarget::Format);
                if let Some(txn) = self.txn.as_mut() {
                    let entry = txn.formats.entry(branch).or_default();
                    for span in spans {
                        entry.push((span, attrs.clone()));
                    }
                }
            }
        }
    }

    fn materialize_content(
        &mut self,
        id: Id,
        parent: BranchId,
        key: Option<&str>,
        content: OpContent,
    ) -> Content {
        match content {
            OpContent::Text(s) => Content::Text(s),
            OpContent::Values(v) => Content::Values(v),
            OpContent::Embed(v) => Content::Embed(v),
            OpContent::Value(v) => Content::Value(v),
            OpContent::Branch { kind, tag } => {
                let child = self.create_branch(
                    kind,
                    tag,
                    Some(ParentSlot {
                        branch: parent,
                        key: key.map(str::to_owned),
                    }),
                    Some(id),
                );
                Content::Branch(child)
            }
        }
    }

    /// Origin-based placement with `(client, clock)` tie-break for
    /// concurrent siblings, so every replica converges to one order.
    fn integrate_seq_item(
        &mut self,
        branch: BranchId,
        id: Id,
        origin_left: Option<Id>,
        origin_right: Option<Id>,
        content: Content,
        attrs: Option<Attrs>,
    ) {
        let left_idx = origin_left.and_then(|unit| self.split_after_unit(branch, unit));
        let right_idx = origin_right
            .and_then(|unit| self.split_before_unit(branch, unit))
            .unwrap_or(self.branches[branch].seq.len());

        let scan_base = left_idx.map(|i| i + 1).unwrap_or(0);
        let mut left = left_idx;
        let mut conflicting: HashSet<usize> = HashSet::new();
        let mut before_origin: HashSet<usize> = HashSet::new();
        let mut o = scan_base;
        while o < right_idx {
            before_origin.insert(o);
            conflicting.insert(o);
            let (o_id, o_origin_left, o_origin_right) = {
                let item = &self.branches[branch].seq[o];
                (item.id, item.origin_left, item.origin_right)
            };
            if o_origin_left == origin_left {
                if o_id.client < id.client {
                    left = Some(o);
                    conflicting.clear();
                } else if o_origin_right == origin_right {
                    break;
                }
            } else if let Some(other_origin) = o_origin_left {
                let holder = self.branches[branch]
                    .seq
                    .iter()
                    .position(|item| item.contains_unit(other_origin));
                match holder {
                    Some(h) if before_origin.contains(&h) => {
                        if !conflicting.contains(&h) {
                            left = Some(o);
                            conflicting.clear();
                        }
                    }
                    _ => break,
                }
            } else {
                break;
            }
            o += 1;
        }

        let insert_at = left.map(|i| i + 1).unwrap_or(0);
        trace!(
            client = id.client,
            clock = id.clock,
            at = insert_at,
            "placed sequence item"
        );
        self.branches[branch].seq.insert(
            insert_at,
            Item {
                id,
                origin_left,
                origin_right,
                content,
                attrs: seed_attrs(id, attrs),
                deleted: false,
            },
        );
    }

    fn format_span(&mut self, branch: BranchId, writer: Id, span: IdSpan, attrs: &Attrs) {
        let Some(start) = self.split_before_unit(branch, span.first()) else {
            return;
        };
        let Some(end) = self.split_after_unit(branch, span.last()) else {
            return;
        };
        for idx in start..=end {
            let item = &mut self.branches[branch].seq[idx];
            if !span.contains(item.id) {
                continue;
            }
            for (key, value) in attrs {
                merge_attr(&mut item.attrs, key, writer, value);
            }
        }
    }

    fn apply_delete_span(&mut self, span: IdSpan) {
        let next = self.sv.next_clock(span.client);
        if span.clock >= next {
            self.pending_ds.push(span);
            return;
        }
        let applicable_end = span.end().min(next);
        if applicable_end < span.end() {
            self.pending_ds
                .push(IdSpan::new(span.client, applicable_end, span.end() - applicable_end));
        }
        self.delete_units(IdSpan::new(
            span.client,
            span.clock,
            applicable_end - span.clock,
        ));
    }

    /// Tombstones every live unit covered by `span`. Returns whether any
    /// unit was newly tombstoned.
    pub fn delete_units(&mut self, span: IdSpan) -> bool {
        let mut changed = false;
        self.ds.add(span);
        for branch in 0..self.branches.len() {
            // Sequence items: split at the span edges, then tombstone.
            let mut idx = 0;
            while idx < self.branches[branch].seq.len() {
                let (item_span, deleted) = {
                    let item = &self.branches[branch].seq[idx];
                    (
                        IdSpan::new(item.id.client, item.id.clock, item.len()),
                        item.deleted,
                    )
                };
                idx += 1;
                if item_span.client != span.client
                    || item_span.end() <= span.clock
                    || item_span.clock >= span.end()
                {
                    continue;
                }
                let idx0 = idx - 1;
                if item_span.clock < span.clock {
                    let right = self.branches[branch].seq[idx0].split_off(span.clock - item_span.clock);
                    self.branches[branch].seq.insert(idx0 + 1, right);
                    continue; // revisit the right half next iteration
                }
                if item_span.end() > span.end() {
                    let right = self.branches[branch].seq[idx0].split_off(span.end() - item_span.clock);
                    self.branches[branch].seq.insert(idx0 + 1, right);
                }
                if !deleted {
                    changed = true;
                    let covered = {
                        let item = &mut self.branches[branch].seq[idx0];
                        item.deleted = true;
                        IdSpan::new(item.id.client, item.id.clock, item.len())
                    };
                    if let Some(txn) = self.txn.as_mut() {
                        txn.deleted.entry(branch).or_default().push(covered);
                        txn.delete_set.add(covered);
                    }
                }
            }

            // Map entries are single units.
            let keys: Vec<String> = self.branches[branch].map.keys().cloned().collect();
            for key in keys {
                let hit = self.branches[branch]
                    .map
                    .get(&key)
                    .is_some_and(|entries| {
                        entries
                            .iter()
                            .any(|entry| !entry.deleted && span.contains(entry.id))
                    });
                if !hit {
                    continue;
                }
                self.capture_map_old(branch, &key);
                let mut tombstoned = Vec::new();
                if let Some(entries) = self.branches[branch].map.get_mut(&key) {
                    for entry in entries.iter_mut() {
                        if !entry.deleted && span.contains(entry.id) {
                            entry.deleted = true;
                            tombstoned.push(IdSpan::new(entry.id.client, entry.id.clock, 1));
                        }
                    }
                }
                changed |= !tombstoned.is_empty();
                if let Some(txn) = self.txn.as_mut() {
                    for covered in tombstoned {
                        txn.deleted.entry(branch).or_default().push(covered);
                        txn.delete_set.add(covered);
                    }
                }
            }
        }
        changed
    }

    // ---- undo support ---------------------------------------------------

    /// Re-inserts content tombstoned under `span` at its original
    /// positions, under fresh local ids. Returns the spans of the
    /// re-inserted operations.
    pub fn resurrect_span(&mut self, span: IdSpan) -> Vec<IdSpan> {
        let start_clock = self.next_local_clock();

        // Sequence items: find each tombstoned item covered by the span
        // and insert a copy of its content at the same visible position.
        let mut candidates: Vec<(BranchId, Id)> = Vec::new();
        for (branch, data) in self.branches.iter().enumerate() {
            for item in &data.seq {
                if item.deleted && span.contains(item.id) {
                    candidates.push((branch, item.id));
                }
            }
        }
        for (branch, unit) in candidates {
            let Some((idx, _)) = self.find_containing(branch, unit) else {
                continue;
            };
            let visible_before: u64 = self.branches[branch].seq[..idx]
                .iter()
                .filter(|item| !item.deleted)
                .map(Item::len)
                .sum();
            let (content, attrs) = {
                let item = &self.branches[branch].seq[idx];
                (item.content.clone(), crate::store::visible_attrs(&item.attrs))
            };
            match content {
                Content::Text(text) => {
                    let _ = self.local_insert_text(branch, visible_before, &text, attrs);
                }
                Content::Embed(value) => {
                    let _ = self.local_insert_embed(branch, visible_before, value, attrs);
                }
                Content::Values(values) => {
                    let cells = values.into_iter().map(Input::Any).collect();
                    let _ = self.local_insert_cells(branch, visible_before, cells);
                }
                Content::Branch(child) => {
                    let seed = self.snapshot_input(child);
                    let _ = self.local_insert_cells(branch, visible_before, vec![seed]);
                }
                Content::Value(_) => {}
            }
        }

        // Map entries: restore the deleted value unless a newer one is
        // already visible.
        let mut map_candidates: Vec<(BranchId, String)> = Vec::new();
        for (branch, data) in self.branches.iter().enumerate() {
            for (key, entries) in &data.map {
                if data.visible_entry(key).is_none()
                    && entries
                        .iter()
                        .any(|entry| entry.deleted && span.contains(entry.id))
                {
                    map_candidates.push((branch, key.clone()));
                }
            }
        }
        for (branch, key) in map_candidates {
            let restored = self.branches[branch]
                .map
                .get(&key)
                .and_then(|entries| {
                    entries
                        .iter()
                        .filter(|entry| entry.deleted && span.contains(entry.id))
                        .max_by_key(|entry| (entry.id.clock, entry.id.client))
                        .map(|entry| entry.content.clone())
                });
            if let Some(content) = restored {
                let seed = match content {
                    Content::Value(value) => Input::Any(value),
                    Content::Branch(child) => self.snapshot_input(child),
                    Content::Text(text) => Input::Any(Any::String(text)),
                    Content::Values(values) => Input::Any(Any::List(values)),
                    Content::Embed(value) => Input::Any(value),
                };
                self.local_map_set(branch, &key, seed);
            }
        }

        let end_clock = self.next_local_clock();
        if end_clock > start_clock {
            vec![IdSpan::new(
                self.client_id,
                start_clock,
                end_clock - start_clock,
            )]
        } else {
            Vec::new()
        }
    }

    /// Deep snapshot of a branch's visible content as an input seed.
    /// Formatting runs and XML subtrees flatten to their plain content.
    fn snapshot_input(&self, branch: BranchId) -> Input {
        let data = self.branch(branch);
        match data.kind {
            BranchKind::Text => Input::Text(crate::branch::string_of(self, branch)),
            BranchKind::XmlText => Input::XmlText(crate::branch::string_of(self, branch)),
            BranchKind::XmlElement => Input::XmlElement(data.name.clone().unwrap_or_default()),
            BranchKind::XmlFragment => Input::XmlFragment,
            BranchKind::Array => {
                let mut cells = Vec::new();
                for item in &data.seq {
                    if item.deleted {
                        continue;
                    }
                    match &item.content {
                        Content::Values(values) => {
                            cells.extend(values.iter().cloned().map(Input::Any))
                        }
                        Content::Branch(child) => cells.push(self.snapshot_input(*child)),
                        Content::Embed(value) | Content::Value(value) => {
                            cells.push(Input::Any(value.clone()))
                        }
                        Content::Text(text) => {
                            cells.push(Input::Any(Any::String(text.clone())))
                        }
                    }
                }
                Input::Array(cells)
            }
            BranchKind::Map => {
                let mut entries = std::collections::BTreeMap::new();
                for key in data.visible_keys() {
                    let Some(entry) = data.visible_entry(key) else {
                        continue;
                    };
                    let seed = match &entry.content {
                        Content::Value(value) => Input::Any(value.clone()),
                        Content::Branch(child) => self.snapshot_input(*child),
                        Content::Text(text) => Input::Any(Any::String(text.clone())),
                        Content::Values(values) => Input::Any(Any::List(values.clone())),
                        Content::Embed(value) => Input::Any(value.clone()),
                    };
                    entries.insert(key.to_owned(), seed);
                }
                Input::Map(entries)
            }
        }
    }

    fn retry_pending(&mut self) {
        loop {
            let mut progressed = false;

            let ops = std::mem::take(&mut self.pending_ops);
            for op in ops {
                match self.try_integrate_op(op) {
                    Outcome::Applied | Outcome::Dropped => progressed = true,
                    Outcome::Pending(op) => self.pending_ops.push(op),
                }
            }

            let spans = std::mem::take(&mut self.pending_ds);
            let before = spans.len();
            for span in spans {
                self.apply_delete_span(span);
            }
            if self.pending_ds.len() < before {
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
        if !self.pending_ops.is_empty() || !self.pending_ds.is_empty() {
            debug!(
                ops = self.pending_ops.len(),
                deletes = self.pending_ds.len(),
                "update left pending operations awaiting causal context"
            );
        }
    }
}

fn seed_attrs(id: Id, attrs: Option<Attrs>) -> ItemAttrs {
    let mut out = ItemAttrs::new();
    if let Some(attrs) = attrs {
        for (key, value) in attrs {
            out.insert(key, (id, value));
        }
    }
    out
}

fn seed_kind(seed: &Input) -> (BranchKind, Option<String>) {
    match seed {
        Input::Text(_) => (BranchKind::Text, None),
        Input::Array(_) => (BranchKind::Array, None),
        Input::Map(_) => (BranchKind::Map, None),
        Input::XmlText(_) => (BranchKind::XmlText, None),
        Input::XmlElement(tag) => (BranchKind::XmlElement, Some(tag.clone())),
        Input::XmlFragment => (BranchKind::XmlFragment, None),
        Input::Any(_) => unreachable!("plain values are not branch seeds"),
    }
}

fn trim_op(op: Op, covered: u64) -> Op {
    match op.body {
        OpBody::Item {
            parent,
            origin_right,
            content,
            attrs,
            ..
        } => Op {
            id: op.id.advance(covered),
            body: OpBody::Item {
                parent,
                origin_left: Some(Id::new(op.id.client, op.id.clock + covered - 1)),
                origin_right,
                content: content.drop_prefix(covered),
                attrs,
            },
        },
        // Single-unit ops are either fully covered or fully fresh.
        body => Op { id: op.id, body },
    }
}
