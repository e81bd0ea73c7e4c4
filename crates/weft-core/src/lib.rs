//! Weft: a collaborative-document engine.
//!
//! A [`Doc`] holds a tree of shared structures (text, arrays, maps, XML)
//! that merge concurrent edits from any number of replicas without
//! coordination. All reads and writes go through a [`Transaction`];
//! committed transactions encode compact binary updates for transport,
//! and replicas reconcile by exchanging state vectors and state diffs.
//! Deep-change events, undo/redo, and sticky indices are built on the
//! same operation log.
//!
//! ```
//! use weft_core::Doc;
//!
//! let doc = Doc::new();
//! let text = doc.text("value").unwrap();
//! let txn = doc.transact_mut().unwrap();
//! text.insert(&txn, 0, "hello", None).unwrap();
//! txn.commit().unwrap();
//!
//! let txn = doc.transact().unwrap();
//! assert_eq!(text.get_string(&txn).unwrap(), "hello");
//! ```

mod branch;
mod doc;
mod error;
mod event;
mod id;
mod sticky;
mod store;
mod sync;
mod txn;
mod undo;
mod value;

pub use branch::{
    Array, ArrayIter, BranchKind, Map, SharedRef, Text, TextChunk, XmlElement, XmlFragment,
    XmlText,
};
pub use doc::{AfterTransactionEvent, Doc, DocOptions, Subscription, UpdateEvent};
pub use error::{
    BranchError, CodecError, DocError, StateError, UpdateError, ValidationError,
};
pub use event::{
    ArrayDelta, ChangeTag, EntryChange, Event, EventData, MapDelta, PathSegment, TextDelta,
};
pub use id::{generate_client_id, ClientId, Id, IdSpan};
pub use sticky::{Assoc, StickyIndex};
pub use txn::Transaction;
pub use undo::{UndoEvent, UndoEventKind, UndoManager, UndoOptions};
pub use value::{Any, Attrs, Input, Output};
