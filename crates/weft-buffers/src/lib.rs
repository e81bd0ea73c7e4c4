//! Binary cursor primitives shared by the weft wire codecs.
//!
//! The [`Writer`] grows as needed and never fails; the [`Reader`] is
//! bounds-checked and returns [`BufferError`] instead of panicking, so
//! malformed peer input surfaces as a decode error rather than an abort.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("unexpected end of input at byte {at}")]
    UnexpectedEof { at: usize },
    #[error("varint exceeds 64 bits at byte {at}")]
    VarintOverflow { at: usize },
    #[error("length-prefixed string is not valid UTF-8")]
    InvalidUtf8,
}
