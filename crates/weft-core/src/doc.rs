//! The document: root container for shared structures, owner of the
//! replica identity, and the gate that serializes transactions.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use rand::Rng;
use tracing::debug;

use crate::branch::{Array, BranchCore, BranchKind, Map, Text, XmlElement, XmlFragment, XmlText};
use crate::error::DocError;
use crate::event::Event;
use crate::id::{generate_client_id, ClientId, IdSpan};
use crate::store::{BranchId, Store};
use crate::txn::Transaction;
use crate::undo::UndoInner;

/// Identity and behavior flags for a new document. The defaults match a
/// standalone document: fresh random identity, loading requested, no
/// auto-load signaling to a parent.
#[derive(Debug, Clone)]
pub struct DocOptions {
    /// Replica id; random when absent.
    pub client_id: Option<ClientId>,
    /// Stable document identifier; random hex when absent.
    pub guid: Option<String>,
    pub collection_id: Option<String>,
    pub should_load: bool,
    pub auto_load: bool,
}

impl Default for DocOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            guid: None,
            collection_id: None,
            should_load: true,
            auto_load: false,
        }
    }
}

/// Bytes of one committed transaction's update, as delivered to
/// [`Doc::observe_updates_v1`] / [`Doc::observe_updates_v2`] callbacks.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub update: Vec<u8>,
}

/// Posted to [`Doc::observe_after_transaction`] callbacks once a
/// transaction commits: the state vectors on both sides of the commit and
/// the operations it tombstoned. Storage collaborators use this to decide
/// whether to snapshot.
#[derive(Debug, Clone)]
pub struct AfterTransactionEvent {
    pub before_state: Vec<u8>,
    pub after_state: Vec<u8>,
    pub delete_set: Vec<IdSpan>,
}

/// Identifies one registered observer; pass it back to the matching
/// unobserve method. After unobserve returns, the callback is never
/// invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(pub(crate) u64);

pub(crate) type UpdateCallback = Rc<RefCell<dyn FnMut(&UpdateEvent)>>;
pub(crate) type AfterTxnCallback = Rc<RefCell<dyn FnMut(&AfterTransactionEvent)>>;
pub(crate) type DeepCallback = Rc<RefCell<dyn FnMut(&[Event])>>;

#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    pub update_v1: BTreeMap<u64, UpdateCallback>,
    pub update_v2: BTreeMap<u64, UpdateCallback>,
    pub after_txn: BTreeMap<u64, AfterTxnCallback>,
    pub deep: HashMap<BranchId, BTreeMap<u64, DeepCallback>>,
    /// Undo managers attached to this document; dead weak refs are swept
    /// during commit.
    pub undo: Vec<std::rc::Weak<RefCell<UndoInner>>>,
}

impl Observers {
    pub fn next_subscription(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub(crate) struct DocInner {
    pub store: RefCell<Store>,
    pub observers: RefCell<Observers>,
}

/// A collaborative document. Cheap to clone; the last clone dropped
/// destroys the document, after which every derived handle reports
/// `UseAfterFree`.
#[derive(Clone)]
pub struct Doc {
    pub(crate) inner: Rc<DocInner>,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Doc {
        Self::with_options(DocOptions::default()).expect("default options are valid")
    }

    pub fn with_options(options: DocOptions) -> Result<Doc, DocError> {
        if options.guid.as_deref() == Some("") {
            return Err(DocError::EmptyGuid);
        }
        let client_id = options.client_id.unwrap_or_else(generate_client_id);
        let guid = options.guid.unwrap_or_else(random_guid);
        debug!(client_id, guid = guid.as_str(), "document created");
        Ok(Doc {
            inner: Rc::new(DocInner {
                store: RefCell::new(Store::new(
                    client_id,
                    guid,
                    options.collection_id,
                    options.should_load,
                    options.auto_load,
                )),
                observers: RefCell::new(Observers::default()),
            }),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.store.borrow().client_id
    }

    pub fn guid(&self) -> String {
        self.inner.store.borrow().guid.clone()
    }

    pub fn collection_id(&self) -> Option<String> {
        self.inner.store.borrow().collection_id.clone()
    }

    pub fn should_load(&self) -> bool {
        self.inner.store.borrow().should_load
    }

    pub fn auto_load(&self) -> bool {
        self.inner.store.borrow().auto_load
    }

    // ---- root branches --------------------------------------------------

    /// Gets or creates the root text branch bound to `name`.
    pub fn text(&self, name: &str) -> Result<Text, DocError> {
        Ok(Text::from_core(self.root(name, BranchKind::Text)?))
    }

    pub fn array(&self, name: &str) -> Result<Array, DocError> {
        Ok(Array::from_core(self.root(name, BranchKind::Array)?))
    }

    pub fn map(&self, name: &str) -> Result<Map, DocError> {
        Ok(Map::from_core(self.root(name, BranchKind::Map)?))
    }

    pub fn xml_fragment(&self, name: &str) -> Result<XmlFragment, DocError> {
        Ok(XmlFragment::from_core(self.root(name, BranchKind::XmlFragment)?))
    }

    pub fn xml_text(&self, name: &str) -> Result<XmlText, DocError> {
        Ok(XmlText::from_core(self.root(name, BranchKind::XmlText)?))
    }

    /// Root XML element; the root name doubles as its tag.
    pub fn xml_element(&self, name: &str) -> Result<XmlElement, DocError> {
        Ok(XmlElement::from_core(self.root(name, BranchKind::XmlElement)?))
    }

    /// Kind-generic root lookup; the typed getters are thin wrappers over
    /// this. Returns the existing root when `name` is already bound to
    /// `kind`, creates it otherwise, and signals `KindMismatch` when the
    /// name is bound to a different kind.
    pub fn root_branch(&self, name: &str, kind: BranchKind) -> Result<crate::Output, DocError> {
        let core = self.root(name, kind)?;
        Ok(crate::branch::branch_output(
            &Rc::downgrade(&self.inner),
            kind,
            core.id,
        ))
    }

    fn root(&self, name: &str, kind: BranchKind) -> Result<BranchCore, DocError> {
        let id = self.inner.store.borrow_mut().root_branch(name, kind)?;
        Ok(BranchCore {
            doc: Rc::downgrade(&self.inner),
            id,
            kind,
        })
    }

    // ---- transactions ---------------------------------------------------

    /// Opens a transaction, read-write when `read_write` is set. `None`
    /// means another transaction currently holds the document; retry
    /// later, this is not a failure.
    pub fn begin_transaction(&self, read_write: bool) -> Option<Transaction> {
        crate::txn::begin(&self.inner, read_write)
    }

    /// Read-only transaction; may coexist with other readers.
    pub fn transact(&self) -> Option<Transaction> {
        self.begin_transaction(false)
    }

    /// Read-write transaction; at most one per document.
    pub fn transact_mut(&self) -> Option<Transaction> {
        self.begin_transaction(true)
    }

    // ---- observers ------------------------------------------------------

    /// Calls `callback` once per committed write transaction that
    /// produced operations, with that transaction's own V1-encoded update.
    pub fn observe_updates_v1<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&UpdateEvent) + 'static,
    {
        let mut observers = self.inner.observers.borrow_mut();
        let id = observers.next_subscription();
        observers
            .update_v1
            .insert(id, Rc::new(RefCell::new(callback)));
        Subscription(id)
    }

    pub fn unobserve_updates_v1(&self, subscription: Subscription) {
        self.inner
            .observers
            .borrow_mut()
            .update_v1
            .remove(&subscription.0);
    }

    /// V2-encoded counterpart of [`Doc::observe_updates_v1`].
    pub fn observe_updates_v2<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&UpdateEvent) + 'static,
    {
        let mut observers = self.inner.observers.borrow_mut();
        let id = observers.next_subscription();
        observers
            .update_v2
            .insert(id, Rc::new(RefCell::new(callback)));
        Subscription(id)
    }

    pub fn unobserve_updates_v2(&self, subscription: Subscription) {
        self.inner
            .observers
            .borrow_mut()
            .update_v2
            .remove(&subscription.0);
    }

    pub fn observe_after_transaction<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&AfterTransactionEvent) + 'static,
    {
        let mut observers = self.inner.observers.borrow_mut();
        let id = observers.next_subscription();
        observers
            .after_txn
            .insert(id, Rc::new(RefCell::new(callback)));
        Subscription(id)
    }

    pub fn unobserve_after_transaction(&self, subscription: Subscription) {
        self.inner
            .observers
            .borrow_mut()
            .after_txn
            .remove(&subscription.0);
    }

    pub(crate) fn downgrade(&self) -> Weak<DocInner> {
        Rc::downgrade(&self.inner)
    }
}

fn random_guid() -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(32);
    for _ in 0..32 {
        let nibble: u8 = rng.gen_range(0..16);
        out.push(char::from_digit(nibble as u32, 16).expect("nibble in range"));
    }
    out
}
