//! Error taxonomy.
//!
//! Contention ("no transaction available") is deliberately *not* here: it
//! is a normal control-flow value, surfaced as `Option::None` by the
//! transaction constructors. Everything below is either a programmer error
//! that should fail loudly ([`StateError`]), a local validation failure
//! reported to the immediate caller ([`ValidationError`]), or a decode
//! failure that leaves the document untouched ([`CodecError`]).

use thiserror::Error;

use crate::branch::BranchKind;

/// Misuse of a handle whose lifecycle rules were violated. These indicate
/// bugs in calling code; ignoring them corrupts invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("transaction was already committed")]
    CommitAfterCommit,
    #[error("transaction is closed")]
    TransactionClosed,
    #[error("handle used after its document was destroyed")]
    UseAfterFree,
    #[error("mutation attempted through a read-only transaction")]
    ReadOnlyTransaction,
    #[error("transaction belongs to a different document")]
    ForeignTransaction,
}

/// Invalid arguments to a branch or document operation. Nothing is
/// partially applied when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: u64, len: u64 },
    #[error("root {name:?} is bound to {bound:?}, requested {requested:?}")]
    KindMismatch {
        name: String,
        bound: BranchKind,
        requested: BranchKind,
    },
}

/// Malformed bytes handed to a decoder. Decoding is completed before any
/// state is touched, so a codec error never leaves a partial merge behind.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unsupported update version {0}")]
    InvalidVersion(u8),
    #[error("unknown tag {tag} in {context}")]
    InvalidTag { tag: u8, context: &'static str },
    #[error("malformed varint or length prefix: {0}")]
    Buffer(#[from] weft_buffers::BufferError),
    #[error("malformed embedded payload")]
    Payload,
    #[error("trailing bytes after update body")]
    TrailingBytes,
}

/// Failure applying a decoded update to a document.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("update binds root {name:?} to {remote:?}, locally bound to {local:?}")]
    TypeMismatch {
        name: String,
        local: BranchKind,
        remote: BranchKind,
    },
    #[error(transparent)]
    State(#[from] StateError),
}

/// Failure constructing a document or resolving one of its roots.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("document guid must not be empty")]
    EmptyGuid,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure of a branch operation.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
