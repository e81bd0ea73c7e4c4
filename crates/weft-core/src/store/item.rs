//! Items: the causally-stamped fragments a branch is made of.
//!
//! A sequence branch (text, array, XML children) is a vector of [`Item`]s
//! in document order. Items carry origin references by id, split on demand
//! at insertion/deletion/format boundaries, and are never physically
//! removed; deletion tombstones them so concurrent operations can still
//! anchor against their units.

use std::collections::BTreeMap;

use crate::id::Id;
use crate::value::{Any, Attrs};

/// Index into the document's branch table.
pub(crate) type BranchId = usize;

/// Payload of one item or map entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Content {
    /// A run of text; one unit per Unicode scalar value.
    Text(String),
    /// A run of plain array values; one unit per value.
    Values(Vec<Any>),
    /// An embedded object inside text; one unit.
    Embed(Any),
    /// A nested shared structure; one unit.
    Branch(BranchId),
    /// A plain map-entry value; one unit.
    Value(Any),
}

impl Content {
    pub fn unit_len(&self) -> u64 {
        match self {
            Content::Text(s) => s.chars().count() as u64,
            Content::Values(v) => v.len() as u64,
            Content::Embed(_) | Content::Branch(_) | Content::Value(_) => 1,
        }
    }

    /// Splits into `[0, units)` and `[units, len)`. Only multi-unit
    /// content (text, value runs) is splittable; callers never split at 0
    /// or at the full length.
    pub fn split(self, units: u64) -> (Content, Content) {
        match self {
            Content::Text(s) => {
                let at = s
                    .char_indices()
                    .nth(units as usize)
                    .map(|(i, _)| i)
                    .unwrap_or(s.len());
                let right = s[at..].to_owned();
                let mut left = s;
                left.truncate(at);
                (Content::Text(left), Content::Text(right))
            }
            Content::Values(mut v) => {
                let right = v.split_off(units as usize);
                (Content::Values(v), Content::Values(right))
            }
            other => panic!("split of single-unit content: {other:?}"),
        }
    }
}

/// Formatting attributes on a run, with the writing operation's id kept
/// per key so concurrent formats merge last-writer-wins.
pub(crate) type ItemAttrs = BTreeMap<String, (Id, Any)>;

/// Projects the user-visible attribute map; `Null` marks a cleared key.
pub(crate) fn visible_attrs(attrs: &ItemAttrs) -> Option<Attrs> {
    let out: Attrs = attrs
        .iter()
        .filter(|(_, (_, v))| *v != Any::Null)
        .map(|(k, (_, v))| (k.clone(), v.clone()))
        .collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Merges one formatting key into `attrs`, keeping the write with the
/// greater `(clock, client)` id, the same winner rule map entries use.
pub(crate) fn merge_attr(attrs: &mut ItemAttrs, key: &str, writer: Id, value: &Any) {
    match attrs.get(key) {
        Some((current, _)) if (writer.clock, writer.client) < (current.clock, current.client) => {}
        _ => {
            attrs.insert(key.to_owned(), (writer, value.clone()));
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub id: Id,
    pub origin_left: Option<Id>,
    pub origin_right: Option<Id>,
    pub content: Content,
    pub attrs: ItemAttrs,
    pub deleted: bool,
}

impl Item {
    pub fn len(&self) -> u64 {
        self.content.unit_len()
    }

    pub fn last_id(&self) -> Id {
        Id::new(self.id.client, self.id.clock + self.len() - 1)
    }

    pub fn contains_unit(&self, id: Id) -> bool {
        id.client == self.id.client
            && id.clock >= self.id.clock
            && id.clock < self.id.clock + self.len()
    }

    /// Splits this item in place; `self` keeps `[0, units)`, the returned
    /// item holds `[units, len)` with origins rewritten so both pieces
    /// stay valid anchors.
    pub fn split_off(&mut self, units: u64) -> Item {
        debug_assert!(units > 0 && units < self.len());
        let content = std::mem::replace(&mut self.content, Content::Text(String::new()));
        let (left, right) = content.split(units);
        self.content = left;
        Item {
            id: self.id.advance(units),
            origin_left: Some(Id::new(self.id.client, self.id.clock + units - 1)),
            origin_right: self.origin_right,
            content: right,
            attrs: self.attrs.clone(),
            deleted: self.deleted,
        }
    }
}

/// One write to a map key. Entries accumulate per key; the visible value
/// is the non-deleted entry with the greatest `(clock, client)`.
#[derive(Debug, Clone)]
pub(crate) struct MapEntry {
    pub id: Id,
    pub content: Content,
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_item(client: u64, clock: u64, s: &str) -> Item {
        Item {
            id: Id::new(client, clock),
            origin_left: None,
            origin_right: None,
            content: Content::Text(s.to_owned()),
            attrs: ItemAttrs::new(),
            deleted: false,
        }
    }

    #[test]
    fn split_rewrites_origins_and_ids() {
        let mut item = text_item(5, 10, "hello");
        item.origin_right = Some(Id::new(9, 1));
        let right = item.split_off(2);
        assert_eq!(item.content, Content::Text("he".into()));
        assert_eq!(right.content, Content::Text("llo".into()));
        assert_eq!(right.id, Id::new(5, 12));
        assert_eq!(right.origin_left, Some(Id::new(5, 11)));
        assert_eq!(right.origin_right, Some(Id::new(9, 1)));
        assert_eq!(item.last_id(), Id::new(5, 11));
    }

    #[test]
    fn split_respects_char_boundaries() {
        let mut item = text_item(1, 0, "añb");
        let right = item.split_off(2);
        assert_eq!(item.content, Content::Text("añ".into()));
        assert_eq!(right.content, Content::Text("b".into()));
    }

    #[test]
    fn attr_merge_is_last_writer_wins() {
        let mut attrs = ItemAttrs::new();
        merge_attr(&mut attrs, "bold", Id::new(2, 9), &Any::Bool(true));
        merge_attr(&mut attrs, "bold", Id::new(1, 5), &Any::Bool(false));
        assert_eq!(attrs["bold"], (Id::new(2, 9), Any::Bool(true)));
        merge_attr(&mut attrs, "bold", Id::new(1, 10), &Any::Null);
        assert_eq!(visible_attrs(&attrs), None);
    }
}
