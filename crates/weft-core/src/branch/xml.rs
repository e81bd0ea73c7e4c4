//! Shared XML structures: text nodes, elements, and fragments.
//!
//! XML branches reuse the sequence part (children, text) and the map part
//! (attributes) of the common branch representation.

use std::rc::Weak;

use crate::branch::text::{chunks_of, string_of};
use crate::branch::{branch_output, sealed, BranchCore, BranchKind, SharedRef, TextChunk};
use crate::doc::DocInner;
use crate::error::BranchError;
use crate::store::{BranchId, Content, Store};
use crate::txn::Transaction;
use crate::value::{Any, Attrs, Input, Output};

/// A text node in an XML tree: the text surface plus XML attributes.
#[derive(Debug, Clone)]
pub struct XmlText {
    core: BranchCore,
}

/// An element in an XML tree: a tag, attributes, and an ordered child
/// list of further XML nodes.
#[derive(Debug, Clone)]
pub struct XmlElement {
    core: BranchCore,
}

/// An unnamed XML container: children only.
#[derive(Debug, Clone)]
pub struct XmlFragment {
    core: BranchCore,
}

impl sealed::Sealed for XmlText {
    fn core(&self) -> &BranchCore {
        &self.core
    }
}

impl sealed::Sealed for XmlElement {
    fn core(&self) -> &BranchCore {
        &self.core
    }
}

impl sealed::Sealed for XmlFragment {
    fn core(&self) -> &BranchCore {
        &self.core
    }
}

impl SharedRef for XmlText {}
impl SharedRef for XmlElement {}
impl SharedRef for XmlFragment {}

impl XmlText {
    pub(crate) fn from_core(core: BranchCore) -> Self {
        Self { core }
    }

    pub fn insert(
        &self,
        txn: &Transaction,
        index: u64,
        chunk: &str,
        attrs: Option<Attrs>,
    ) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_insert_text(self.core.id, index, chunk, attrs)?;
        Ok(())
    }

    pub fn insert_embed(
        &self,
        txn: &Transaction,
        index: u64,
        content: Any,
        attrs: Option<Attrs>,
    ) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_insert_embed(self.core.id, index, content, attrs)?;
        Ok(())
    }

    pub fn remove_range(&self, txn: &Transaction, index: u64, len: u64) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_remove_range(self.core.id, index, len)?;
        Ok(())
    }

    pub fn format(
        &self,
        txn: &Transaction,
        index: u64,
        len: u64,
        attrs: Attrs,
    ) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_format(self.core.id, index, len, attrs)?;
        Ok(())
    }

    pub fn len(&self, txn: &Transaction) -> Result<u64, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let len = doc.store.borrow().branch(self.core.id).visible_len();
        Ok(len)
    }

    pub fn is_empty(&self, txn: &Transaction) -> Result<bool, BranchError> {
        Ok(self.len(txn)? == 0)
    }

    pub fn get_string(&self, txn: &Transaction) -> Result<String, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(string_of(&store, self.core.id))
    }

    pub fn chunks(&self, txn: &Transaction) -> Result<Vec<TextChunk>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(chunks_of(&store, self.core.id))
    }

    pub fn insert_attribute(
        &self,
        txn: &Transaction,
        name: &str,
        value: &str,
    ) -> Result<(), BranchError> {
        attr_insert(&self.core, txn, name, value)
    }

    pub fn attribute(&self, txn: &Transaction, name: &str) -> Result<Option<String>, BranchError> {
        attr_get(&self.core, txn, name)
    }

    pub fn remove_attribute(&self, txn: &Transaction, name: &str) -> Result<bool, BranchError> {
        attr_remove(&self.core, txn, name)
    }

    pub fn attributes(&self, txn: &Transaction) -> Result<Vec<(String, String)>, BranchError> {
        attr_list(&self.core, txn)
    }
}

impl XmlElement {
    pub(crate) fn from_core(core: BranchCore) -> Self {
        Self { core }
    }

    /// The element tag. Root elements use their root name as the tag.
    pub fn tag(&self, txn: &Transaction) -> Result<Option<String>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let tag = doc.store.borrow().branch(self.core.id).name.clone();
        Ok(tag)
    }

    pub fn insert_attribute(
        &self,
        txn: &Transaction,
        name: &str,
        value: &str,
    ) -> Result<(), BranchError> {
        attr_insert(&self.core, txn, name, value)
    }

    pub fn attribute(&self, txn: &Transaction, name: &str) -> Result<Option<String>, BranchError> {
        attr_get(&self.core, txn, name)
    }

    pub fn remove_attribute(&self, txn: &Transaction, name: &str) -> Result<bool, BranchError> {
        attr_remove(&self.core, txn, name)
    }

    pub fn attributes(&self, txn: &Transaction) -> Result<Vec<(String, String)>, BranchError> {
        attr_list(&self.core, txn)
    }

    /// Creates a text-node child at `index`.
    pub fn insert_text(&self, txn: &Transaction, index: u64) -> Result<XmlText, BranchError> {
        child_text(&self.core, txn, index)
    }

    /// Creates an element child with `tag` at `index`.
    pub fn insert_element(
        &self,
        txn: &Transaction,
        index: u64,
        tag: &str,
    ) -> Result<XmlElement, BranchError> {
        child_element(&self.core, txn, index, tag)
    }

    pub fn remove_range(&self, txn: &Transaction, index: u64, len: u64) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_remove_range(self.core.id, index, len)?;
        Ok(())
    }

    pub fn get(&self, txn: &Transaction, index: u64) -> Result<Option<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(crate::branch::array::cell_at(
            &store,
            self.core.id,
            index,
            &self.core.doc,
        ))
    }

    pub fn child_len(&self, txn: &Transaction) -> Result<u64, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let len = doc.store.borrow().branch(self.core.id).visible_len();
        Ok(len)
    }

    /// Direct children, in document order.
    pub fn children(&self, txn: &Transaction) -> Result<Vec<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(crate::branch::array::cells_of(
            &store,
            self.core.id,
            &self.core.doc,
        ))
    }

    /// Every node beneath this element, depth-first.
    pub fn descendants(&self, txn: &Transaction) -> Result<Vec<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let mut out = Vec::new();
        collect_descendants(&store, self.core.id, &self.core.doc, &mut out);
        Ok(out)
    }

    /// Renders `<tag attr="value">…</tag>`.
    pub fn get_string(&self, txn: &Transaction) -> Result<String, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let mut out = String::new();
        render_xml(&store, self.core.id, &mut out);
        Ok(out)
    }
}

impl XmlFragment {
    pub(crate) fn from_core(core: BranchCore) -> Self {
        Self { core }
    }

    pub fn insert_text(&self, txn: &Transaction, index: u64) -> Result<XmlText, BranchError> {
        child_text(&self.core, txn, index)
    }

    pub fn insert_element(
        &self,
        txn: &Transaction,
        index: u64,
        tag: &str,
    ) -> Result<XmlElement, BranchError> {
        child_element(&self.core, txn, index, tag)
    }

    pub fn remove_range(&self, txn: &Transaction, index: u64, len: u64) -> Result<(), BranchError> {
        let doc = self.core.ensure_txn(txn, true)?;
        doc.store
            .borrow_mut()
            .local_remove_range(self.core.id, index, len)?;
        Ok(())
    }

    pub fn get(&self, txn: &Transaction, index: u64) -> Result<Option<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(crate::branch::array::cell_at(
            &store,
            self.core.id,
            index,
            &self.core.doc,
        ))
    }

    pub fn child_len(&self, txn: &Transaction) -> Result<u64, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let len = doc.store.borrow().branch(self.core.id).visible_len();
        Ok(len)
    }

    pub fn children(&self, txn: &Transaction) -> Result<Vec<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(crate::branch::array::cells_of(
            &store,
            self.core.id,
            &self.core.doc,
        ))
    }

    pub fn descendants(&self, txn: &Transaction) -> Result<Vec<Output>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let mut out = Vec::new();
        collect_descendants(&store, self.core.id, &self.core.doc, &mut out);
        Ok(out)
    }

    /// Renders the children concatenated.
    pub fn get_string(&self, txn: &Transaction) -> Result<String, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        let mut out = String::new();
        render_xml(&store, self.core.id, &mut out);
        Ok(out)
    }
}

// ---- shared attribute and child plumbing ---------------------------------

fn attr_insert(
    core: &BranchCore,
    txn: &Transaction,
    name: &str,
    value: &str,
) -> Result<(), BranchError> {
    let doc = core.ensure_txn(txn, true)?;
    doc.store
        .borrow_mut()
        .local_map_set(core.id, name, Input::string(value));
    Ok(())
}

fn attr_get(core: &BranchCore, txn: &Transaction, name: &str) -> Result<Option<String>, BranchError> {
    let doc = core.ensure_txn(txn, false)?;
    let store = doc.store.borrow();
    Ok(store
        .branch(core.id)
        .visible_entry(name)
        .and_then(|entry| match &entry.content {
            Content::Value(Any::String(value)) => Some(value.clone()),
            _ => None,
        }))
}

fn attr_remove(core: &BranchCore, txn: &Transaction, name: &str) -> Result<bool, BranchError> {
    let doc = core.ensure_txn(txn, true)?;
    let removed = doc.store.borrow_mut().local_map_remove(core.id, name);
    Ok(removed)
}

fn attr_list(core: &BranchCore, txn: &Transaction) -> Result<Vec<(String, String)>, BranchError> {
    let doc = core.ensure_txn(txn, false)?;
    let store = doc.store.borrow();
    let branch = store.branch(core.id);
    Ok(branch
        .visible_keys()
        .into_iter()
        .filter_map(|key| {
            branch.visible_entry(key).and_then(|entry| match &entry.content {
                Content::Value(Any::String(value)) => Some((key.to_owned(), value.clone())),
                _ => None,
            })
        })
        .collect())
}

fn child_text(core: &BranchCore, txn: &Transaction, index: u64) -> Result<XmlText, BranchError> {
    let doc = core.ensure_txn(txn, true)?;
    let child = doc
        .store
        .borrow_mut()
        .local_insert_branch(core.id, index, Input::XmlText(String::new()))?;
    Ok(XmlText::from_core(BranchCore {
        doc: core.doc.clone(),
        id: child,
        kind: BranchKind::XmlText,
    }))
}

fn child_element(
    core: &BranchCore,
    txn: &Transaction,
    index: u64,
    tag: &str,
) -> Result<XmlElement, BranchError> {
    let doc = core.ensure_txn(txn, true)?;
    let child = doc
        .store
        .borrow_mut()
        .local_insert_branch(core.id, index, Input::XmlElement(tag.to_owned()))?;
    Ok(XmlElement::from_core(BranchCore {
        doc: core.doc.clone(),
        id: child,
        kind: BranchKind::XmlElement,
    }))
}

fn collect_descendants(
    store: &Store,
    branch: BranchId,
    doc: &Weak<DocInner>,
    out: &mut Vec<Output>,
) {
    for item in &store.branch(branch).seq {
        if item.deleted {
            continue;
        }
        if let Content::Branch(child) = item.content {
            let kind = store.branch(child).kind;
            out.push(branch_output(doc, kind, child));
            if matches!(kind, BranchKind::XmlElement | BranchKind::XmlFragment) {
                collect_descendants(store, child, doc, out);
            }
        }
    }
}

pub(crate) fn render_xml(store: &Store, branch: BranchId, out: &mut String) {
    let data = store.branch(branch);
    match data.kind {
        BranchKind::XmlText | BranchKind::Text => out.push_str(&string_of(store, branch)),
        BranchKind::XmlElement => {
            let tag = data.name.clone().unwrap_or_default();
            out.push('<');
            out.push_str(&tag);
            for key in data.visible_keys() {
                if let Some(entry) = data.visible_entry(key) {
                    if let Content::Value(Any::String(value)) = &entry.content {
                        out.push(' ');
                        out.push_str(key);
                        out.push_str("=\"");
                        out.push_str(value);
                        out.push('"');
                    }
                }
            }
            out.push('>');
            render_children(store, branch, out);
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        BranchKind::XmlFragment => render_children(store, branch, out),
        BranchKind::Array | BranchKind::Map => {}
    }
}

fn render_children(store: &Store, branch: BranchId, out: &mut String) {
    for item in &store.branch(branch).seq {
        if item.deleted {
            continue;
        }
        if let Content::Branch(child) = item.content {
            render_xml(store, child, out);
        }
    }
}
