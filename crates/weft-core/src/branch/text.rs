//! Shared text.

use crate::branch::{sealed, BranchCore, SharedRef};
use crate::error::BranchError;
use crate::store::{visible_attrs, BranchId, Content, Store};
use crate::txn::Transaction;
use crate::value::{Any, Attrs, Output};

/// A shared collaborative string. Indices and lengths count Unicode
/// scalar values.
#[derive(Debug, Clone)]
pub struct Text {
    core: BranchCore,
}

/// A maximal run of text (or one embed) whose formatting attributes are
/// uniform.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub value: Output,
    pub attributes: Option<Attrs>,
}

impl sealed::Sealed for Text {
    fn core(&self) -> &BranchCore {
        &self.core
    }
}

impl SharedRef for Text {}

impl Text {
    pub(crate) fn from_core(core: BranchCore) -> Self {
        Self { core }
    }

    /// Inserts `chunk` at `index`, optionally formatted. Inserting
    /// strictly inside a formatted run splits that run in two; the
    /// surrounding pieces keep their attributes.
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

    /// Inserts embedded content at `index`; it occupies one unit.
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

    /// Applies `attrs` to the range `[index, index + len)`, splitting
    /// runs exactly at the range boundaries. A `Null` attribute value
    /// clears that key.
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

    /// The full visible string. Embeds contribute nothing here; use
    /// [`Text::chunks`] to see them.
    pub fn get_string(&self, txn: &Transaction) -> Result<String, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(string_of(&store, self.core.id))
    }

    /// The visible content as runs grouped by formatting attributes.
    pub fn chunks(&self, txn: &Transaction) -> Result<Vec<TextChunk>, BranchError> {
        let doc = self.core.ensure_txn(txn, false)?;
        let store = doc.store.borrow();
        Ok(chunks_of(&store, self.core.id))
    }
}

pub(crate) fn string_of(store: &Store, branch: BranchId) -> String {
    let mut out = String::new();
    for item in &store.branch(branch).seq {
        if item.deleted {
            continue;
        }
        if let Content::Text(text) = &item.content {
            out.push_str(text);
        }
    }
    out
}

pub(crate) fn chunks_of(store: &Store, branch: BranchId) -> Vec<TextChunk> {
    let mut out: Vec<TextChunk> = Vec::new();
    for item in &store.branch(branch).seq {
        if item.deleted {
            continue;
        }
        let attributes = visible_attrs(&item.attrs);
        match &item.content {
            Content::Text(text) => match out.last_mut() {
                Some(TextChunk {
                    value: Output::Any(Any::String(run)),
                    attributes: last,
                }) if *last == attributes => run.push_str(text),
                _ => out.push(TextChunk {
                    value: Output::Any(Any::String(text.clone())),
                    attributes,
                }),
            },
            Content::Embed(content) => out.push(TextChunk {
                value: Output::Any(content.clone()),
                attributes,
            }),
            _ => {}
        }
    }
    out
}
