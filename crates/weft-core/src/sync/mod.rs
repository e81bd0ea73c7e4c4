//! Synchronization codec: state vectors, state diffs, and the two update
//! encodings.
//!
//! A replica advertises what it has seen as a state vector; a peer answers
//! with a state diff: every operation at or after that vector plus the
//! full delete set. Updates come in two wire versions that differ only in
//! compactness: V1 interleaves each operation's fields, V2 deduplicates
//! clients and parents into tables and delta-encodes clocks. A leading
//! version byte makes every update self-describing.

mod state_vector;
mod v1;
mod v2;

pub(crate) use state_vector::{decode_state_vector, encode_state_vector};
pub(crate) use v1::{decode_update_v1, encode_update_v1};
pub(crate) use v2::{decode_update_v2, encode_update_v2};

use weft_buffers::{Reader, Writer};

use crate::branch::BranchKind;
use crate::error::CodecError;
use crate::id::{ClientId, Id};
use crate::store::{
    Content, DecodedUpdate, DeleteSet, Op, OpBody, OpContent, OpTarget, ParentRef, StateVector,
    Store,
};
use crate::value::Any;

pub(crate) const UPDATE_V1: u8 = 1;
pub(crate) const UPDATE_V2: u8 = 2;

/// Decodes an update of either version. Decoding is completed before
/// anything is applied, so a failure here leaves the document untouched.
pub(crate) fn decode_update(bytes: &[u8]) -> Result<DecodedUpdate, CodecError> {
    let mut reader = Reader::new(bytes);
    let version = reader.u8().map_err(|_| CodecError::UnexpectedEof)?;
    let update = match version {
        UPDATE_V1 => decode_update_v1(&mut reader)?,
        UPDATE_V2 => decode_update_v2(&mut reader)?,
        other => return Err(CodecError::InvalidVersion(other)),
    };
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(update)
}

/// Rebuilds the wire operations a peer with knowledge `from` is missing.
/// Ops are emitted per client in ascending clock order; a piece that
/// straddles the requested clock is emitted whole and trimmed by the
/// receiver's duplicate suppression.
pub(crate) fn ops_since(store: &Store, from: &StateVector) -> Vec<(ClientId, Vec<Op>)> {
    let mut clients: Vec<ClientId> = store.op_index.keys().copied().collect();
    clients.sort_unstable();

    let mut out = Vec::new();
    for client in clients {
        let from_clock = from.next_clock(client);
        if from_clock >= store.sv.next_clock(client) {
            continue;
        }
        let mut ops: Vec<Op> = Vec::new();
        for entry in &store.op_index[&client] {
            if entry.clock + entry.len <= from_clock {
                continue;
            }
            match &entry.target {
                OpTarget::Seq(branch) => {
                    let parent = parent_ref_of(store, *branch);
                    let mut pieces: Vec<Op> = store.branch(*branch)
                        .seq
                        .iter()
                        .filter(|item| {
                            item.id.client == client
                                && item.id.clock >= entry.clock
                                && item.id.clock < entry.clock + entry.len
                        })
                        .map(|item| Op {
                            id: item.id,
                            body: OpBody::Item {
                                parent: parent.clone(),
                                origin_left: item.origin_left,
                                origin_right: item.origin_right,
                                content: op_content_of(store, &item.content),
                                attrs: insert_attrs_of(item, entry.clock, entry.len),
                            },
                        })
                        .collect();
                    pieces.sort_by_key(|op| op.id.clock);
                    ops.extend(pieces);
                }
                OpTarget::MapKey(branch, key) => {
                    let id = Id::new(client, entry.clock);
                    if let Some(entry) = store
                        .branch(*branch)
                        .map
                        .get(key)
                        .and_then(|entries| entries.iter().find(|e| e.id == id))
                    {
                        ops.push(Op {
                            id,
                            body: OpBody::MapSet {
                                parent: parent_ref_of(store, *branch),
                                key: key.clone(),
                                content: op_content_of(store, &entry.content),
                            },
                        });
                    }
                }
                OpTarget::Format => {
                    let id = Id::new(client, entry.clock);
                    if let Some(record) = store.formats.get(&id) {
                        ops.push(Op {
                            id,
                            body: OpBody::Format {
                                parent: parent_ref_of(store, record.branch),
                                spans: record.spans.clone(),
                                attrs: record.attrs.clone(),
                            },
                        });
                    }
                }
            }
        }
        if !ops.is_empty() {
            out.push((client, ops));
        }
    }
    out
}

fn parent_ref_of(store: &Store, branch: crate::store::BranchId) -> ParentRef {
    let data = store.branch(branch);
    match data.created_by {
        Some(id) => ParentRef::Item(id),
        None => ParentRef::Root(
            data.name.clone().unwrap_or_default(),
            data.kind,
        ),
    }
}

fn op_content_of(store: &Store, content: &Content) -> OpContent {
    match content {
        Content::Text(s) => OpContent::Text(s.clone()),
        Content::Values(v) => OpContent::Values(v.clone()),
        Content::Embed(v) => OpContent::Embed(v.clone()),
        Content::Value(v) => OpContent::Value(v.clone()),
        Content::Branch(child) => {
            let data = store.branch(*child);
            OpContent::Branch {
                kind: data.kind,
                tag: if data.kind == BranchKind::XmlElement {
                    data.name.clone()
                } else {
                    None
                },
            }
        }
    }
}

/// Reconstructs the attributes the original insert op carried: the entries
/// written by the op's own id span. Later formats ship as their own ops.
fn insert_attrs_of(
    item: &crate::store::Item,
    op_clock: u64,
    op_len: u64,
) -> Option<crate::value::Attrs> {
    let attrs: crate::value::Attrs = item
        .attrs
        .iter()
        .filter(|(_, (writer, _))| {
            writer.client == item.id.client
                && writer.clock >= op_clock
                && writer.clock < op_clock + op_len
        })
        .map(|(key, (_, value))| (key.clone(), value.clone()))
        .collect();
    if attrs.is_empty() {
        None
    } else {
        Some(attrs)
    }
}

// ---- shared wire fragments ----------------------------------------------

pub(crate) fn write_any(w: &mut Writer, value: &Any) {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload).expect("CBOR encoding of Any cannot fail");
    w.var_bytes(&payload);
}

pub(crate) fn read_any(r: &mut Reader<'_>) -> Result<Any, CodecError> {
    let payload = r.var_bytes()?;
    ciborium::from_reader(payload).map_err(|_| CodecError::Payload)
}

pub(crate) fn kind_to_byte(kind: BranchKind) -> u8 {
    match kind {
        BranchKind::Text => 0,
        BranchKind::Array => 1,
        BranchKind::Map => 2,
        BranchKind::XmlElement => 3,
        BranchKind::XmlText => 4,
        BranchKind::XmlFragment => 5,
    }
}

pub(crate) fn kind_from_byte(byte: u8) -> Result<BranchKind, CodecError> {
    Ok(match byte {
        0 => BranchKind::Text,
        1 => BranchKind::Array,
        2 => BranchKind::Map,
        3 => BranchKind::XmlElement,
        4 => BranchKind::XmlText,
        5 => BranchKind::XmlFragment,
        other => {
            return Err(CodecError::InvalidTag {
                tag: other,
                context: "branch kind",
            })
        }
    })
}

pub(crate) const CONTENT_TEXT: u8 = 0;
pub(crate) const CONTENT_VALUES: u8 = 1;
pub(crate) const CONTENT_EMBED: u8 = 2;
pub(crate) const CONTENT_BRANCH: u8 = 3;
pub(crate) const CONTENT_VALUE: u8 = 4;

/// Operation payload encoding shared by both versions.
pub(crate) fn encode_content(w: &mut Writer, content: &OpContent) {
    match content {
        OpContent::Text(s) => {
            w.u8(CONTENT_TEXT);
            w.var_str(s);
        }
        OpContent::Values(values) => {
            w.u8(CONTENT_VALUES);
            write_any(w, &Any::List(values.clone()));
        }
        OpContent::Embed(value) => {
            w.u8(CONTENT_EMBED);
            write_any(w, value);
        }
        OpContent::Branch { kind, tag } => {
            w.u8(CONTENT_BRANCH);
            w.u8(kind_to_byte(*kind));
            match tag {
                Some(tag) => {
                    w.u8(1);
                    w.var_str(tag);
                }
                None => w.u8(0),
            }
        }
        OpContent::Value(value) => {
            w.u8(CONTENT_VALUE);
            write_any(w, value);
        }
    }
}

pub(crate) fn decode_content(r: &mut Reader<'_>) -> Result<OpContent, CodecError> {
    match r.u8()? {
        CONTENT_TEXT => {
            let text = r.var_str()?;
            if text.is_empty() {
                return Err(CodecError::Payload);
            }
            Ok(OpContent::Text(text.to_owned()))
        }
        CONTENT_VALUES => match read_any(r)? {
            Any::List(values) if !values.is_empty() => Ok(OpContent::Values(values)),
            _ => Err(CodecError::Payload),
        },
        CONTENT_EMBED => Ok(OpContent::Embed(read_any(r)?)),
        CONTENT_BRANCH => {
            let kind = kind_from_byte(r.u8()?)?;
            let tag = match r.u8()? {
                0 => None,
                1 => Some(r.var_str()?.to_owned()),
                other => {
                    return Err(CodecError::InvalidTag {
                        tag: other,
                        context: "branch tag flag",
                    })
                }
            };
            Ok(OpContent::Branch { kind, tag })
        }
        CONTENT_VALUE => Ok(OpContent::Value(read_any(r)?)),
        other => Err(CodecError::InvalidTag {
            tag: other,
            context: "content",
        }),
    }
}

pub(crate) fn decode_attrs(r: &mut Reader<'_>) -> Result<crate::value::Attrs, CodecError> {
    match read_any(r)? {
        Any::Map(map) => Ok(map),
        _ => Err(CodecError::Payload),
    }
}

pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Delete-set section shared verbatim by both versions.
pub(crate) fn write_delete_set(w: &mut Writer, ds: &DeleteSet) {
    let sorted = ds.iter_sorted();
    w.var_u64(sorted.len() as u64);
    for (client, ranges) in sorted {
        w.var_u64(client);
        w.var_u64(ranges.len() as u64);
        for (clock, len) in ranges {
            w.var_u64(clock);
            w.var_u64(len);
        }
    }
}

pub(crate) fn read_delete_set(r: &mut Reader<'_>) -> Result<Vec<(u64, Vec<(u64, u64)>)>, CodecError> {
    let clients = r.var_u64()?;
    let mut out = Vec::new();
    for _ in 0..clients {
        let client = r.var_u64()?;
        let count = r.var_u64()?;
        let mut ranges = Vec::new();
        for _ in 0..count {
            let clock = r.var_u64()?;
            let len = r.var_u64()?;
            ranges.push((clock, len));
        }
        out.push((client, ranges));
    }
    Ok(out)
}

