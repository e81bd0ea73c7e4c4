//! Deep-change events: immutable, fully materialized descriptions of what
//! one commit changed in one branch.
//!
//! Events are computed at commit time from the transaction's change sets
//! and the post-commit item state, then handed to observers as a slice.
//! Nothing in an event reaches back into mutable document state, so
//! inspecting it inside the callback is always safe; retaining it past the
//! callback is not supported.

use std::collections::BTreeMap;
use std::rc::Weak;

use crate::branch::{branch_output, content_output};
use crate::doc::DocInner;
use crate::store::{visible_attrs, BranchId, Content, Store, TxnChanges};
use crate::value::{Any, Attrs, Output};

/// One step from an observed root down to a changed branch: a map key or
/// a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTag {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone)]
pub struct EntryChange {
    pub tag: ChangeTag,
    pub old: Option<Output>,
    pub new: Option<Output>,
}

/// Changed keys of a map branch (or the attribute side of an XML branch).
#[derive(Debug, Clone, Default)]
pub struct MapDelta {
    pub entries: BTreeMap<String, EntryChange>,
}

impl MapDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Text changes as retain/insert/delete runs. A retain carrying
/// attributes reports formatting applied to an unchanged range.
#[derive(Debug, Clone)]
pub enum TextDelta {
    Retain {
        len: u64,
        attributes: Option<Attrs>,
    },
    Insert {
        chunk: String,
        attributes: Option<Attrs>,
    },
    InsertEmbed {
        content: Any,
        attributes: Option<Attrs>,
    },
    Delete {
        len: u64,
    },
}

/// Sequence changes as retain/insert/delete runs of cells.
#[derive(Debug, Clone)]
pub enum ArrayDelta {
    Retain { len: u64 },
    Insert { values: Vec<Output> },
    Delete { len: u64 },
}

#[derive(Debug, Clone)]
pub enum EventData {
    Text {
        delta: Vec<TextDelta>,
    },
    Array {
        delta: Vec<ArrayDelta>,
    },
    Map {
        keys: MapDelta,
    },
    XmlText {
        delta: Vec<TextDelta>,
        attributes: MapDelta,
    },
    XmlElement {
        children: Vec<ArrayDelta>,
        attributes: MapDelta,
    },
    XmlFragment {
        children: Vec<ArrayDelta>,
    },
}

/// What changed in one branch during one commit. `path` leads from the
/// observed root down to `target`; it is empty when the observed branch
/// itself changed.
#[derive(Debug, Clone)]
pub struct Event {
    pub path: Vec<PathSegment>,
    pub target: Output,
    pub data: EventData,
}

/// Per-branch event with the context dispatch needs: nesting depth for
/// bottom-up ordering and the absolute path for re-rooting under each
/// subscriber.
pub(crate) struct BranchEvent {
    pub branch: BranchId,
    pub depth: usize,
    pub abs_path: Vec<PathSegment>,
    pub data: EventData,
}

/// Path from the document roots down to `branch`.
pub(crate) fn absolute_path(store: &Store, branch: BranchId) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = branch;
    while let Some(slot) = store.branch(current).parent.clone() {
        match slot.key {
            Some(key) => segments.push(PathSegment::Key(key)),
            None => segments.push(PathSegment::Index(
                store.position_of_child(slot.branch, current).unwrap_or(0),
            )),
        }
        current = slot.branch;
    }
    segments.reverse();
    segments
}

/// Materializes one event per branch the transaction touched, skipping
/// branches whose visible state did not actually change.
pub(crate) fn commit_events(
    store: &Store,
    txn: &TxnChanges,
    doc: &Weak<DocInner>,
) -> Vec<BranchEvent> {
    use crate::branch::BranchKind;

    let mut changed: Vec<BranchId> = txn.changed_branches().into_iter().collect();
    changed.sort_unstable();

    let mut out = Vec::new();
    for branch in changed {
        let kind = store.branch(branch).kind;
        let data = match kind {
            BranchKind::Text => {
                let delta = text_delta(store, txn, branch);
                if delta.is_empty() {
                    continue;
                }
                EventData::Text { delta }
            }
            BranchKind::XmlText => {
                let delta = text_delta(store, txn, branch);
                let attributes = map_delta(store, txn, branch, doc);
                if delta.is_empty() && attributes.is_empty() {
                    continue;
                }
                EventData::XmlText { delta, attributes }
            }
            BranchKind::Array => {
                let delta = array_delta(store, txn, branch, doc);
                if delta.is_empty() {
                    continue;
                }
                EventData::Array { delta }
            }
            BranchKind::XmlFragment => {
                let children = array_delta(store, txn, branch, doc);
                if children.is_empty() {
                    continue;
                }
                EventData::XmlFragment { children }
            }
            BranchKind::XmlElement => {
                let children = array_delta(store, txn, branch, doc);
                let attributes = map_delta(store, txn, branch, doc);
                if children.is_empty() && attributes.is_empty() {
                    continue;
                }
                EventData::XmlElement {
                    children,
                    attributes,
                }
            }
            BranchKind::Map => {
                let keys = map_delta(store, txn, branch, doc);
                if keys.is_empty() {
                    continue;
                }
                EventData::Map { keys }
            }
        };
        out.push(BranchEvent {
            branch,
            depth: store.depth_of(branch),
            abs_path: absolute_path(store, branch),
            data,
        });
    }
    out
}

fn text_delta(store: &Store, txn: &TxnChanges, branch: BranchId) -> Vec<TextDelta> {
    let mut raw = Vec::new();
    for item in &store.branch(branch).seq {
        let added = txn.added_covers(branch, item.id);
        let deleted_now = txn.deleted_covers(branch, item.id);
        if added && deleted_now {
            continue;
        }
        if added {
            let attributes = visible_attrs(&item.attrs);
            match &item.content {
                Content::Text(chunk) => raw.push(TextDelta::Insert {
                    chunk: chunk.clone(),
                    attributes,
                }),
                Content::Embed(content) => raw.push(TextDelta::InsertEmbed {
                    content: content.clone(),
                    attributes,
                }),
                _ => {}
            }
        } else if deleted_now {
            raw.push(TextDelta::Delete { len: item.len() });
        } else if item.deleted {
            continue;
        } else {
            let attributes = txn.format_attrs_for(branch, item.id).cloned();
            raw.push(TextDelta::Retain {
                len: item.len(),
                attributes,
            });
        }
    }
    coalesce_text(raw)
}

fn coalesce_text(raw: Vec<TextDelta>) -> Vec<TextDelta> {
    let mut out: Vec<TextDelta> = Vec::new();
    for op in raw {
        match (out.last_mut(), op) {
            (
                Some(TextDelta::Retain { len, attributes }),
                TextDelta::Retain {
                    len: more,
                    attributes: next,
                },
            ) if *attributes == next => *len += more,
            (
                Some(TextDelta::Insert { chunk, attributes }),
                TextDelta::Insert {
                    chunk: more,
                    attributes: next,
                },
            ) if *attributes == next => chunk.push_str(&more),
            (Some(TextDelta::Delete { len }), TextDelta::Delete { len: more }) => *len += more,
            (_, op) => out.push(op),
        }
    }
    while matches!(
        out.last(),
        Some(TextDelta::Retain {
            attributes: None,
            ..
        })
    ) {
        out.pop();
    }
    out
}

fn array_delta(
    store: &Store,
    txn: &TxnChanges,
    branch: BranchId,
    doc: &Weak<DocInner>,
) -> Vec<ArrayDelta> {
    let mut raw = Vec::new();
    for item in &store.branch(branch).seq {
        let added = txn.added_covers(branch, item.id);
        let deleted_now = txn.deleted_covers(branch, item.id);
        if added && deleted_now {
            continue;
        }
        if added {
            let values = match &item.content {
                Content::Values(values) => {
                    values.iter().map(|v| Output::Any(v.clone())).collect()
                }
                Content::Branch(id) => {
                    vec![branch_output(doc, store.branch(*id).kind, *id)]
                }
                other => vec![content_output(doc, store, other)],
            };
            raw.push(ArrayDelta::Insert { values });
        } else if deleted_now {
            raw.push(ArrayDelta::Delete { len: item.len() });
        } else if item.deleted {
            continue;
        } else {
            raw.push(ArrayDelta::Retain { len: item.len() });
        }
    }
    coalesce_array(raw)
}

fn coalesce_array(raw: Vec<ArrayDelta>) -> Vec<ArrayDelta> {
    let mut out: Vec<ArrayDelta> = Vec::new();
    for op in raw {
        match (out.last_mut(), op) {
            (Some(ArrayDelta::Retain { len }), ArrayDelta::Retain { len: more }) => *len += more,
            (Some(ArrayDelta::Insert { values }), ArrayDelta::Insert { values: more }) => {
                values.extend(more)
            }
            (Some(ArrayDelta::Delete { len }), ArrayDelta::Delete { len: more }) => *len += more,
            (_, op) => out.push(op),
        }
    }
    while matches!(out.last(), Some(ArrayDelta::Retain { .. })) {
        out.pop();
    }
    out
}

fn map_delta(
    store: &Store,
    txn: &TxnChanges,
    branch: BranchId,
    doc: &Weak<DocInner>,
) -> MapDelta {
    let mut delta = MapDelta::default();
    for ((changed_branch, key), old) in &txn.map_old {
        if *changed_branch != branch {
            continue;
        }
        let new = store
            .branch(branch)
            .visible_entry(key)
            .map(|entry| entry.content.clone());
        if *old == new {
            continue;
        }
        let tag = match (old, &new) {
            (None, Some(_)) => ChangeTag::Add,
            (Some(_), None) => ChangeTag::Remove,
            _ => ChangeTag::Update,
        };
        delta.entries.insert(
            key.clone(),
            EntryChange {
                tag,
                old: old.as_ref().map(|content| content_output(doc, store, content)),
                new: new.as_ref().map(|content| content_output(doc, store, content)),
            },
        );
    }
    delta
}
