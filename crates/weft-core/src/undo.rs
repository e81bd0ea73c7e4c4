//! Undo/redo over a set of scoped branches.
//!
//! The manager batches committed transactions into capture groups by
//! commit timestamp, keeps a two-ended history, and replays inverses
//! through ordinary write transactions: undoing tombstones the group's
//! insertions and re-inserts its deletions under fresh ids. Formatting
//! runs and XML subtrees are restored as plain content.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::branch::{Sealed, SharedRef};
use crate::doc::{Doc, DocInner, Subscription};
use crate::error::StateError;
use crate::id::IdSpan;
use crate::store::{BranchId, Store, TxnChanges};

/// Tuning for capture grouping. Edits committed within
/// `capture_timeout` of each other fall into one undoable group.
#[derive(Debug, Clone)]
pub struct UndoOptions {
    pub capture_timeout: Duration,
}

impl Default for UndoOptions {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoEventKind {
    /// A fresh edit opened a new capture group.
    Edit,
    /// An undo pushed a group onto the redo side.
    Undo,
    /// A redo pushed a group back onto the undo side.
    Redo,
}

/// Posted to [`UndoManager::observe_added`] callbacks whenever a new
/// group lands on either stack.
#[derive(Debug, Clone)]
pub struct UndoEvent {
    pub kind: UndoEventKind,
}

#[derive(Debug, Clone)]
struct Group {
    insertions: Vec<IdSpan>,
    deletions: Vec<IdSpan>,
    at: Instant,
}

type AddedCallback = Rc<RefCell<dyn FnMut(&UndoEvent)>>;

pub(crate) struct UndoInner {
    scope: HashSet<BranchId>,
    capture_timeout: Duration,
    undo_stack: Vec<Group>,
    redo_stack: Vec<Group>,
    last_capture: Option<Instant>,
    stopped: bool,
    added_subs: BTreeMap<u64, AddedCallback>,
    next_sub: u64,
}

impl UndoInner {
    fn in_scope(&self, store: &Store, branch: BranchId) -> bool {
        self.scope
            .iter()
            .any(|&scope| store.ancestor_of(branch, scope))
    }
}

/// Undo/redo manager for one document, scoped to one or more branches
/// (and everything nested beneath them).
pub struct UndoManager {
    doc: Weak<DocInner>,
    inner: Rc<RefCell<UndoInner>>,
}

impl UndoManager {
    pub fn new(doc: &Doc, scope: &impl SharedRef, options: UndoOptions) -> Result<Self, StateError> {
        let core = scope.core();
        let scope_doc = core.doc()?;
        if !Rc::ptr_eq(&scope_doc, &doc.inner) {
            return Err(StateError::ForeignTransaction);
        }
        let inner = Rc::new(RefCell::new(UndoInner {
            scope: HashSet::from([core.id]),
            capture_timeout: options.capture_timeout,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            last_capture: None,
            stopped: false,
            added_subs: BTreeMap::new(),
            next_sub: 0,
        }));
        doc.inner
            .observers
            .borrow_mut()
            .undo
            .push(Rc::downgrade(&inner));
        Ok(Self {
            doc: doc.downgrade(),
            inner,
        })
    }

    /// Adds another branch (subtree) to the tracked scope.
    pub fn expand_scope(&self, scope: &impl SharedRef) -> Result<(), StateError> {
        let core = scope.core();
        let scope_doc = core.doc()?;
        let doc = self.doc.upgrade().ok_or(StateError::UseAfterFree)?;
        if !Rc::ptr_eq(&scope_doc, &doc) {
            return Err(StateError::ForeignTransaction);
        }
        self.inner.borrow_mut().scope.insert(core.id);
        Ok(())
    }

    /// Closes the current capture group; the next edit starts a new one
    /// regardless of the capture timeout.
    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
    }

    /// Discards both stacks.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.undo_stack.clear();
        inner.redo_stack.clear();
        inner.last_capture = None;
    }

    /// Reverts the most recent capture group. Returns whether anything
    /// was actually applied; an empty stack is a no-op, not an error.
    pub fn undo(&self) -> Result<bool, StateError> {
        self.replay(true)
    }

    /// Re-applies the most recently undone group.
    pub fn redo(&self) -> Result<bool, StateError> {
        self.replay(false)
    }

    fn replay(&self, undo: bool) -> Result<bool, StateError> {
        let doc = self.doc.upgrade().ok_or(StateError::UseAfterFree)?;
        let group = {
            let mut inner = self.inner.borrow_mut();
            let stack = if undo {
                &mut inner.undo_stack
            } else {
                &mut inner.redo_stack
            };
            match stack.pop() {
                Some(group) => group,
                None => return Ok(false),
            }
        };

        let Some(txn) = crate::txn::begin(&doc, true) else {
            // Contention: put the group back, let the caller retry.
            let mut inner = self.inner.borrow_mut();
            if undo {
                inner.undo_stack.push(group);
            } else {
                inner.redo_stack.push(group);
            }
            return Ok(false);
        };
        doc.store.borrow_mut().undo_replay = true;

        let (inverse, applied) = {
            let mut store = doc.store.borrow_mut();
            apply_inverse(&mut store, &group)
        };
        txn.commit()?;

        debug!(undo, applied, "history replay");
        if applied {
            let callbacks: Vec<AddedCallback> = {
                let mut inner = self.inner.borrow_mut();
                if undo {
                    inner.redo_stack.push(inverse);
                } else {
                    inner.undo_stack.push(inverse);
                }
                inner.added_subs.values().cloned().collect()
            };
            let event = UndoEvent {
                kind: if undo {
                    UndoEventKind::Undo
                } else {
                    UndoEventKind::Redo
                },
            };
            for callback in callbacks {
                (&mut *callback.borrow_mut())(&event);
            }
        }
        Ok(applied)
    }

    /// Registers a callback fired once per group landing on a stack: a
    /// fresh capture group, or the counterpart group pushed by an
    /// undo/redo.
    pub fn observe_added<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&UndoEvent) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_sub += 1;
        let id = inner.next_sub;
        inner
            .added_subs
            .insert(id, Rc::new(RefCell::new(callback)));
        Subscription(id)
    }

    pub fn unobserve_added(&self, subscription: Subscription) {
        self.inner.borrow_mut().added_subs.remove(&subscription.0);
    }
}

fn apply_inverse(store: &mut Store, group: &Group) -> (Group, bool) {
    let mut applied = false;
    for span in &group.insertions {
        applied |= store.delete_units(*span);
    }
    let mut restored = Vec::new();
    for span in &group.deletions {
        let spans = store.resurrect_span(*span);
        applied |= !spans.is_empty();
        restored.extend(spans);
    }
    (
        Group {
            insertions: restored,
            deletions: group.insertions.clone(),
            at: group.at,
        },
        applied,
    )
}

/// Called once per committed (non-replay) transaction for every live
/// manager on the document.
pub(crate) fn capture_commit(
    doc: &Rc<DocInner>,
    hook: &Rc<RefCell<UndoInner>>,
    changes: &TxnChanges,
) {
    let callbacks: Vec<AddedCallback> = {
        let store = doc.store.borrow();
        let mut inner = hook.borrow_mut();

        let insertions: Vec<IdSpan> = changes
            .added
            .iter()
            .filter(|(branch, _)| inner.in_scope(&store, **branch))
            .flat_map(|(_, spans)| spans.iter().copied())
            .collect();
        let deletions: Vec<IdSpan> = changes
            .deleted
            .iter()
            .filter(|(branch, _)| inner.in_scope(&store, **branch))
            .flat_map(|(_, spans)| spans.iter().copied())
            .collect();
        if insertions.is_empty() && deletions.is_empty() {
            return;
        }

        inner.redo_stack.clear();
        let now = Instant::now();
        let merge = !inner.stopped
            && !inner.undo_stack.is_empty()
            && inner
                .last_capture
                .is_some_and(|at| now.duration_since(at) <= inner.capture_timeout);
        inner.stopped = false;
        inner.last_capture = Some(now);
        if merge {
            let group = inner.undo_stack.last_mut().expect("stack checked non-empty");
            group.insertions.extend(insertions);
            group.deletions.extend(deletions);
            return;
        }
        inner.undo_stack.push(Group {
            insertions,
            deletions,
            at: now,
        });
        inner.added_subs.values().cloned().collect()
    };

    let event = UndoEvent {
        kind: UndoEventKind::Edit,
    };
    for callback in callbacks {
        (&mut *callback.borrow_mut())(&event);
    }
}
