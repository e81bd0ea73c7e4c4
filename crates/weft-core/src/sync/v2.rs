//! V2 update encoding: client and parent tables plus delta-encoded
//! clocks. Same logical payload as V1, smaller once an update carries more
//! than a handful of operations against shared parents.

use std::collections::HashMap;

use weft_buffers::{Reader, Writer};

use crate::error::CodecError;
use crate::id::{Id, IdSpan};
use crate::store::{DecodedUpdate, DeleteSet, Op, OpBody, ParentRef};
use crate::sync::{
    decode_attrs, decode_content, encode_content, kind_from_byte, kind_to_byte, write_any,
    zigzag_decode, zigzag_encode, UPDATE_V2,
};
use crate::value::Any;

const OP_ITEM: u8 = 0;
const OP_MAP_SET: u8 = 1;
const OP_FORMAT: u8 = 2;

const PARENT_ROOT: u8 = 0;
const PARENT_ITEM: u8 = 1;

const FLAG_ORIGIN_LEFT: u8 = 1;
const FLAG_ORIGIN_RIGHT: u8 = 2;
const FLAG_ATTRS: u8 = 4;

/// Interns every client id referenced anywhere in the update, in sorted
/// order, so each later reference is a short table index.
fn client_table(ops: &[(u64, Vec<Op>)], ds: &DeleteSet) -> Vec<u64> {
    let mut clients: Vec<u64> = Vec::new();
    let mut push = |client: u64| {
        if let Err(pos) = clients.binary_search(&client) {
            clients.insert(pos, client);
        }
    };
    for (client, run) in ops {
        push(*client);
        for op in run {
            match &op.body {
                OpBody::Item {
                    parent,
                    origin_left,
                    origin_right,
                    ..
                } => {
                    if let ParentRef::Item(id) = parent {
                        push(id.client);
                    }
                    if let Some(id) = origin_left {
                        push(id.client);
                    }
                    if let Some(id) = origin_right {
                        push(id.client);
                    }
                }
                OpBody::MapSet { parent, .. } => {
                    if let ParentRef::Item(id) = parent {
                        push(id.client);
                    }
                }
                OpBody::Format { parent, spans, .. } => {
                    if let ParentRef::Item(id) = parent {
                        push(id.client);
                    }
                    for span in spans {
                        push(span.client);
                    }
                }
            }
        }
    }
    for (client, _) in ds.iter_sorted() {
        push(client);
    }
    clients
}

/// Interns parents in first-appearance order over the deterministic op
/// walk, so identical logical updates produce identical tables.
fn parent_table(ops: &[(u64, Vec<Op>)]) -> Vec<ParentRef> {
    let mut table: Vec<ParentRef> = Vec::new();
    for (_, run) in ops {
        for op in run {
            let parent = op.parent();
            if !table.contains(parent) {
                table.push(parent.clone());
            }
        }
    }
    table
}

pub(crate) fn encode_update_v2(ops: &[(u64, Vec<Op>)], ds: &DeleteSet) -> Vec<u8> {
    let clients = client_table(ops, ds);
    let client_idx: HashMap<u64, u64> = clients
        .iter()
        .enumerate()
        .map(|(i, c)| (*c, i as u64))
        .collect();
    let parents = parent_table(ops);

    let mut w = Writer::new();
    w.u8(UPDATE_V2);

    w.var_u64(clients.len() as u64);
    for client in &clients {
        w.var_u64(*client);
    }

    w.var_u64(parents.len() as u64);
    for parent in &parents {
        match parent {
            ParentRef::Root(name, kind) => {
                w.u8(PARENT_ROOT);
                w.u8(kind_to_byte(*kind));
                w.var_str(name);
            }
            ParentRef::Item(id) => {
                w.u8(PARENT_ITEM);
                w.var_u64(client_idx[&id.client]);
                w.var_u64(id.clock);
            }
        }
    }

    w.var_u64(ops.len() as u64);
    for (client, run) in ops {
        w.var_u64(client_idx[client]);
        w.var_u64(run.len() as u64);
        w.var_u64(run.first().map(|op| op.id.clock).unwrap_or(0));
        for op in run {
            encode_op(&mut w, op, &client_idx, &parents);
        }
    }

    // Delete set with client-table indices and gap-encoded ranges.
    let sorted = ds.iter_sorted();
    w.var_u64(sorted.len() as u64);
    for (client, ranges) in sorted {
        w.var_u64(client_idx[&client]);
        w.var_u64(ranges.len() as u64);
        let mut prev_end = 0;
        for (clock, len) in ranges {
            w.var_u64(clock - prev_end);
            w.var_u64(len);
            prev_end = clock + len;
        }
    }

    w.into_vec()
}

fn encode_op(w: &mut Writer, op: &Op, client_idx: &HashMap<u64, u64>, parents: &[ParentRef]) {
    let parent_idx = parents
        .iter()
        .position(|p| p == op.parent())
        .expect("parent interned above") as u64;
    let encode_rel_id = |w: &mut Writer, id: Id| {
        w.var_u64(client_idx[&id.client]);
        w.var_u64(zigzag_encode(id.clock.wrapping_sub(op.id.clock) as i64));
    };
    match &op.body {
        OpBody::Item {
            origin_left,
            origin_right,
            content,
            attrs,
            ..
        } => {
            w.u8(OP_ITEM);
            w.var_u64(parent_idx);
            let mut flags = 0;
            if origin_left.is_some() {
                flags |= FLAG_ORIGIN_LEFT;
            }
            if origin_right.is_some() {
                flags |= FLAG_ORIGIN_RIGHT;
            }
            if attrs.is_some() {
                flags |= FLAG_ATTRS;
            }
            w.u8(flags);
            if let Some(id) = origin_left {
                encode_rel_id(w, *id);
            }
            if let Some(id) = origin_right {
                encode_rel_id(w, *id);
            }
            encode_content(w, content);
            if let Some(attrs) = attrs {
                write_any(w, &Any::Map(attrs.clone()));
            }
        }
        OpBody::MapSet { key, content, .. } => {
            w.u8(OP_MAP_SET);
            w.var_u64(parent_idx);
            w.var_str(key);
            encode_content(w, content);
        }
        OpBody::Format { spans, attrs, .. } => {
            w.u8(OP_FORMAT);
            w.var_u64(parent_idx);
            w.var_u64(spans.len() as u64);
            for span in spans {
                w.var_u64(client_idx[&span.client]);
                w.var_u64(zigzag_encode(span.clock.wrapping_sub(op.id.clock) as i64));
                w.var_u64(span.len);
            }
            write_any(w, &Any::Map(attrs.clone()));
        }
    }
}

pub(crate) fn decode_update_v2(r: &mut Reader<'_>) -> Result<DecodedUpdate, CodecError> {
    let client_count = r.var_u64()?;
    let mut clients = Vec::new();
    for _ in 0..client_count {
        clients.push(r.var_u64()?);
    }
    let lookup_client = |idx: u64| -> Result<u64, CodecError> {
        clients
            .get(idx as usize)
            .copied()
            .ok_or(CodecError::InvalidTag {
                tag: idx as u8,
                context: "client index",
            })
    };

    let parent_count = r.var_u64()?;
    let mut parents: Vec<ParentRef> = Vec::new();
    for _ in 0..parent_count {
        let parent = match r.u8()? {
            PARENT_ROOT => {
                let kind = kind_from_byte(r.u8()?)?;
                let name = r.var_str()?.to_owned();
                ParentRef::Root(name, kind)
            }
            PARENT_ITEM => {
                let client = lookup_client(r.var_u64()?)?;
                let clock = r.var_u64()?;
                ParentRef::Item(Id::new(client, clock))
            }
            other => {
                return Err(CodecError::InvalidTag {
                    tag: other,
                    context: "parent",
                })
            }
        };
        parents.push(parent);
    }

    let run_count = r.var_u64()?;
    let mut ops = Vec::new();
    for _ in 0..run_count {
        let client = lookup_client(r.var_u64()?)?;
        let count = r.var_u64()?;
        let mut clock = r.var_u64()?;
        let mut run = Vec::new();
        for _ in 0..count {
            let op = decode_op(r, Id::new(client, clock), &clients, &parents)?;
            clock += op.unit_len();
            run.push(op);
        }
        ops.push((client, run));
    }

    let ds_clients = r.var_u64()?;
    let mut delete_set = Vec::new();
    for _ in 0..ds_clients {
        let client = lookup_client(r.var_u64()?)?;
        let count = r.var_u64()?;
        let mut ranges = Vec::new();
        let mut prev_end = 0;
        for _ in 0..count {
            let gap = r.var_u64()?;
            let len = r.var_u64()?;
            let clock = prev_end + gap;
            prev_end = clock + len;
            ranges.push((clock, len));
        }
        delete_set.push((client, ranges));
    }

    Ok(DecodedUpdate { ops, delete_set })
}

fn decode_op(
    r: &mut Reader<'_>,
    id: Id,
    clients: &[u64],
    parents: &[ParentRef],
) -> Result<Op, CodecError> {
    let tag = r.u8()?;
    let lookup_client = |idx: u64| -> Result<u64, CodecError> {
        clients
            .get(idx as usize)
            .copied()
            .ok_or(CodecError::InvalidTag {
                tag: idx as u8,
                context: "client index",
            })
    };
    let lookup_parent = |idx: u64| -> Result<ParentRef, CodecError> {
        parents
            .get(idx as usize)
            .cloned()
            .ok_or(CodecError::InvalidTag {
                tag: idx as u8,
                context: "parent index",
            })
    };
    let body = match tag {
        OP_ITEM => {
            let parent = lookup_parent(r.var_u64()?)?;
            let flags = r.u8()?;
            let read_rel_id = |r: &mut Reader<'_>| -> Result<Id, CodecError> {
                let client = lookup_client(r.var_u64()?)?;
                let delta = zigzag_decode(r.var_u64()?);
                Ok(Id::new(client, id.clock.wrapping_add(delta as u64)))
            };
            let origin_left = if flags & FLAG_ORIGIN_LEFT != 0 {
                Some(read_rel_id(r)?)
            } else {
                None
            };
            let origin_right = if flags & FLAG_ORIGIN_RIGHT != 0 {
                Some(read_rel_id(r)?)
            } else {
                None
            };
            let content = decode_content(r)?;
            let attrs = if flags & FLAG_ATTRS != 0 {
                Some(decode_attrs(r)?)
            } else {
                None
            };
            OpBody::Item {
                parent,
                origin_left,
                origin_right,
                content,
                attrs,
            }
        }
        OP_MAP_SET => {
            let parent = lookup_parent(r.var_u64()?)?;
            let key = r.var_str()?.to_owned();
            let content = decode_content(r)?;
            OpBody::MapSet {
                parent,
                key,
                content,
            }
        }
        OP_FORMAT => {
            let parent = lookup_parent(r.var_u64()?)?;
            let count = r.var_u64()?;
            let mut spans = Vec::new();
            for _ in 0..count {
                let client = lookup_client(r.var_u64()?)?;
                let delta = zigzag_decode(r.var_u64()?);
                let clock = id.clock.wrapping_add(delta as u64);
                let len = r.var_u64()?;
                if len == 0 {
                    return Err(CodecError::InvalidTag {
                        tag: 0,
                        context: "empty format span",
                    });
                }
                spans.push(IdSpan::new(client, clock, len));
            }
            let attrs = decode_attrs(r)?;
            OpBody::Format {
                parent,
                spans,
                attrs,
            }
        }
        other => {
            return Err(CodecError::InvalidTag {
                tag: other,
                context: "op",
            })
        }
    };
    Ok(Op { id, body })
}
