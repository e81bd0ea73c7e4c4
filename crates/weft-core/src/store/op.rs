//! Wire-level operations.
//!
//! An update is a set of [`Op`]s plus a delete set. The same types are
//! produced by the decoders, consumed by integration, and rebuilt from the
//! store when a state diff is encoded, so the apply path is strictly
//! decode-then-apply.

use crate::branch::BranchKind;
use crate::id::{Id, IdSpan};
use crate::value::{Any, Attrs};

/// Addresses the branch an operation targets. Root branches are addressed
/// by name and kind; nested branches by the id of the item that created
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParentRef {
    Root(String, BranchKind),
    Item(Id),
}

/// Operation payload as it travels between replicas.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpContent {
    Text(String),
    Values(Vec<Any>),
    Embed(Any),
    /// Creates a nested branch; `tag` is present for XML elements.
    Branch { kind: BranchKind, tag: Option<String> },
    Value(Any),
}

impl OpContent {
    pub fn unit_len(&self) -> u64 {
        match self {
            OpContent::Text(s) => s.chars().count() as u64,
            OpContent::Values(v) => v.len() as u64,
            OpContent::Embed(_) | OpContent::Branch { .. } | OpContent::Value(_) => 1,
        }
    }

    /// Splits off the first `units` units, keeping the remainder.
    pub fn drop_prefix(self, units: u64) -> OpContent {
        match self {
            OpContent::Text(s) => {
                let at = s
                    .char_indices()
                    .nth(units as usize)
                    .map(|(i, _)| i)
                    .unwrap_or(s.len());
                OpContent::Text(s[at..].to_owned())
            }
            OpContent::Values(v) => OpContent::Values(v[units as usize..].to_vec()),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpBody {
    /// Sequence insertion (text run, array values, embed, nested branch).
    Item {
        parent: ParentRef,
        origin_left: Option<Id>,
        origin_right: Option<Id>,
        content: OpContent,
        attrs: Option<Attrs>,
    },
    /// Map-entry write (map key or XML attribute).
    MapSet {
        parent: ParentRef,
        key: String,
        content: OpContent,
    },
    /// Formatting applied to existing sequence spans.
    Format {
        parent: ParentRef,
        spans: Vec<IdSpan>,
        attrs: Attrs,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Op {
    pub id: Id,
    pub body: OpBody,
}

impl Op {
    pub fn unit_len(&self) -> u64 {
        match &self.body {
            OpBody::Item { content, .. } => content.unit_len(),
            OpBody::MapSet { .. } | OpBody::Format { .. } => 1,
        }
    }

    pub fn span(&self) -> IdSpan {
        IdSpan::new(self.id.client, self.id.clock, self.unit_len())
    }

    pub fn parent(&self) -> &ParentRef {
        match &self.body {
            OpBody::Item { parent, .. }
            | OpBody::MapSet { parent, .. }
            | OpBody::Format { parent, .. } => parent,
        }
    }
}

/// A decoded update: per-client op runs (ascending clock) plus the delete
/// set, both fully materialized before anything is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DecodedUpdate {
    /// Sorted by client; each run sorted by clock.
    pub ops: Vec<(u64, Vec<Op>)>,
    /// Sorted by client; ranges sorted and disjoint.
    pub delete_set: Vec<(u64, Vec<(u64, u64)>)>,
}
