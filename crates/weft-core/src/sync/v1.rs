//! V1 update encoding: one interleaved record per operation.

use weft_buffers::{Reader, Writer};

use crate::error::CodecError;
use crate::id::{Id, IdSpan};
use crate::store::{DecodedUpdate, DeleteSet, Op, OpBody, ParentRef};
use crate::sync::{
    decode_attrs, decode_content, encode_content, kind_from_byte, kind_to_byte, read_delete_set,
    write_any, write_delete_set, UPDATE_V1,
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

pub(crate) fn encode_update_v1(ops: &[(u64, Vec<Op>)], ds: &DeleteSet) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(UPDATE_V1);
    w.var_u64(ops.len() as u64);
    for (client, run) in ops {
        w.var_u64(*client);
        w.var_u64(run.len() as u64);
        w.var_u64(run.first().map(|op| op.id.clock).unwrap_or(0));
        for op in run {
            encode_op(&mut w, op);
        }
    }
    write_delete_set(&mut w, ds);
    w.into_vec()
}

fn encode_op(w: &mut Writer, op: &Op) {
    match &op.body {
        OpBody::Item {
            parent,
            origin_left,
            origin_right,
            content,
            attrs,
        } => {
            w.u8(OP_ITEM);
            encode_parent(w, parent);
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
                encode_id(w, *id);
            }
            if let Some(id) = origin_right {
                encode_id(w, *id);
            }
            encode_content(w, content);
            if let Some(attrs) = attrs {
                write_any(w, &Any::Map(attrs.clone()));
            }
        }
        OpBody::MapSet {
            parent,
            key,
            content,
        } => {
            w.u8(OP_MAP_SET);
            encode_parent(w, parent);
            w.var_str(key);
            encode_content(w, content);
        }
        OpBody::Format {
            parent,
            spans,
            attrs,
        } => {
            w.u8(OP_FORMAT);
            encode_parent(w, parent);
            w.var_u64(spans.len() as u64);
            for span in spans {
                w.var_u64(span.client);
                w.var_u64(span.clock);
                w.var_u64(span.len);
            }
            write_any(w, &Any::Map(attrs.clone()));
        }
    }
}

fn encode_parent(w: &mut Writer, parent: &ParentRef) {
    match parent {
        ParentRef::Root(name, kind) => {
            w.u8(PARENT_ROOT);
            w.u8(kind_to_byte(*kind));
            w.var_str(name);
        }
        ParentRef::Item(id) => {
            w.u8(PARENT_ITEM);
            encode_id(w, *id);
        }
    }
}

fn encode_id(w: &mut Writer, id: Id) {
    w.var_u64(id.client);
    w.var_u64(id.clock);
}

pub(crate) fn decode_update_v1(r: &mut Reader<'_>) -> Result<DecodedUpdate, CodecError> {
    let clients = r.var_u64()?;
    let mut ops = Vec::new();
    for _ in 0..clients {
        let client = r.var_u64()?;
        let count = r.var_u64()?;
        let mut clock = r.var_u64()?;
        let mut run = Vec::new();
        for _ in 0..count {
            let op = decode_op(r, Id::new(client, clock))?;
            clock += op.unit_len();
            run.push(op);
        }
        ops.push((client, run));
    }
    let delete_set = read_delete_set(r)?;
    Ok(DecodedUpdate { ops, delete_set })
}

fn decode_op(r: &mut Reader<'_>, id: Id) -> Result<Op, CodecError> {
    let tag = r.u8()?;
    let body = match tag {
        OP_ITEM => {
            let parent = decode_parent(r)?;
            let flags = r.u8()?;
            let origin_left = if flags & FLAG_ORIGIN_LEFT != 0 {
                Some(decode_id(r)?)
            } else {
                None
            };
            let origin_right = if flags & FLAG_ORIGIN_RIGHT != 0 {
                Some(decode_id(r)?)
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
            let parent = decode_parent(r)?;
            let key = r.var_str()?.to_owned();
            let content = decode_content(r)?;
            OpBody::MapSet {
                parent,
                key,
                content,
            }
        }
        OP_FORMAT => {
            let parent = decode_parent(r)?;
            let count = r.var_u64()?;
            let mut spans = Vec::new();
            for _ in 0..count {
                let client = r.var_u64()?;
                let clock = r.var_u64()?;
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

fn decode_parent(r: &mut Reader<'_>) -> Result<ParentRef, CodecError> {
    match r.u8()? {
        PARENT_ROOT => {
            let kind = kind_from_byte(r.u8()?)?;
            let name = r.var_str()?.to_owned();
            Ok(ParentRef::Root(name, kind))
        }
        PARENT_ITEM => Ok(ParentRef::Item(decode_id(r)?)),
        other => Err(CodecError::InvalidTag {
            tag: other,
            context: "parent",
        }),
    }
}

fn decode_id(r: &mut Reader<'_>) -> Result<Id, CodecError> {
    let client = r.var_u64()?;
    let clock = r.var_u64()?;
    Ok(Id::new(client, clock))
}
