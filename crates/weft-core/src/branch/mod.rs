//! Shared structures: the closed set of branch kinds and the typed
//! handles through which they are read and mutated.
//!
//! Every handle is a thin `(document, branch id)` pair. Handles never own
//! the document; they hold a weak reference and report `UseAfterFree`
//! once the document is gone.

mod array;
mod map;
mod text;
mod xml;

pub use array::{Array, ArrayIter};
pub use map::Map;
pub use text::{Text, TextChunk};
pub use xml::{XmlElement, XmlFragment, XmlText};

pub(crate) use text::string_of;

use std::rc::{Rc, Weak};

use crate::doc::{DocInner, Subscription};
use crate::error::{BranchError, StateError};
use crate::event::Event;
use crate::store::{BranchId, Content, Store};
use crate::txn::Transaction;
use crate::value::{Any, Output};

/// The closed set of shared-structure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Text,
    Array,
    Map,
    XmlElement,
    XmlText,
    XmlFragment,
}

#[derive(Debug, Clone)]
pub(crate) struct BranchCore {
    pub doc: Weak<DocInner>,
    pub id: BranchId,
    pub kind: BranchKind,
}

impl BranchCore {
    pub fn doc(&self) -> Result<Rc<DocInner>, StateError> {
        self.doc.upgrade().ok_or(StateError::UseAfterFree)
    }

    /// Validates that `txn` is open, belongs to this handle's document,
    /// and (when `write` is set) is read-write.
    pub fn ensure_txn(&self, txn: &Transaction, write: bool) -> Result<Rc<DocInner>, BranchError> {
        let doc = self.doc()?;
        txn.check_usable(&doc, write)?;
        Ok(doc)
    }
}

mod sealed {
    use super::BranchCore;

    pub trait Sealed {
        fn core(&self) -> &BranchCore;
    }
}

pub(crate) use sealed::Sealed;

/// Capabilities common to every branch kind: deep observation and
/// document-scoped transaction access.
pub trait SharedRef: sealed::Sealed {
    fn kind(&self) -> BranchKind {
        self.core().kind
    }

    /// Registers a callback fired once per commit in which this branch or
    /// any branch nested beneath it changed. Events arrive bottom-up
    /// (deepest first) and are valid only for the duration of the call.
    fn observe_deep<F>(&self, callback: F) -> Result<Subscription, BranchError>
    where
        F: FnMut(&[Event]) + 'static,
        Self: Sized,
    {
        let core = self.core();
        let doc = core.doc()?;
        let mut observers = doc.observers.borrow_mut();
        let id = observers.next_subscription();
        observers
            .deep
            .entry(core.id)
            .or_default()
            .insert(id, Rc::new(std::cell::RefCell::new(callback)));
        Ok(Subscription(id))
    }

    /// After this returns, the callback is never invoked again.
    fn unobserve_deep(&self, subscription: Subscription) {
        let core = self.core();
        if let Some(doc) = core.doc.upgrade() {
            if let Some(subs) = doc.observers.borrow_mut().deep.get_mut(&core.id) {
                subs.remove(&subscription.0);
            }
        }
    }

    /// Read-only transaction on the owning document; `None` under the
    /// same contention rule as the document-level call.
    fn read_transaction(&self) -> Option<Transaction> {
        let doc = self.core().doc.upgrade()?;
        crate::txn::begin(&doc, false)
    }

    /// Read-write transaction on the owning document.
    fn write_transaction(&self) -> Option<Transaction> {
        let doc = self.core().doc.upgrade()?;
        crate::txn::begin(&doc, true)
    }
}

/// Builds the read-side cell for a nested branch.
pub(crate) fn branch_output(doc: &Weak<DocInner>, kind: BranchKind, id: BranchId) -> Output {
    let core = BranchCore {
        doc: doc.clone(),
        id,
        kind,
    };
    match kind {
        BranchKind::Text => Output::Text(Text::from_core(core)),
        BranchKind::Array => Output::Array(Array::from_core(core)),
        BranchKind::Map => Output::Map(Map::from_core(core)),
        BranchKind::XmlElement => Output::XmlElement(XmlElement::from_core(core)),
        BranchKind::XmlText => Output::XmlText(XmlText::from_core(core)),
        BranchKind::XmlFragment => Output::XmlFragment(XmlFragment::from_core(core)),
    }
}

/// Builds the read-side cell for stored content.
pub(crate) fn content_output(doc: &Weak<DocInner>, store: &Store, content: &Content) -> Output {
    match content {
        Content::Value(value) | Content::Embed(value) => Output::Any(value.clone()),
        Content::Text(text) => Output::Any(Any::String(text.clone())),
        Content::Values(values) => Output::Any(Any::List(values.clone())),
        Content::Branch(id) => branch_output(doc, store.branch(*id).kind, *id),
    }
}
