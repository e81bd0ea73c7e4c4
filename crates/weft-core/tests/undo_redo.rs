//! Undo/redo grouping and replay.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use weft_core::{Doc, DocOptions, Input, UndoEventKind, UndoManager, UndoOptions};

fn doc() -> Doc {
    Doc::with_options(DocOptions {
        client_id: Some(31),
        ..DocOptions::default()
    })
    .unwrap()
}

/// Long window: every edit in a test merges unless `stop` intervenes.
fn options() -> UndoOptions {
    UndoOptions {
        capture_timeout: Duration::from_secs(3600),
    }
}

#[test]
fn undo_restores_and_reports_whether_it_applied() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "hello", None).unwrap();
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    {
        let txn = doc.transact().unwrap();
        assert_eq!(text.get_string(&txn).unwrap(), "");
    }
    assert!(!undo.undo().unwrap(), "nothing left to undo");
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "");
}

#[test]
fn redo_reapplies_an_undone_group() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "abc", None).unwrap();
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    assert!(undo.redo().unwrap());
    {
        let txn = doc.transact().unwrap();
        assert_eq!(text.get_string(&txn).unwrap(), "abc");
    }
    assert!(undo.undo().unwrap());
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "");
}

#[test]
fn stop_closes_the_capture_group() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "a", None).unwrap();
    txn.commit().unwrap();
    undo.stop();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 1, "b", None).unwrap();
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    {
        let txn = doc.transact().unwrap();
        assert_eq!(text.get_string(&txn).unwrap(), "a");
    }
    assert!(undo.undo().unwrap());
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "");
}

#[test]
fn edits_within_the_window_merge_into_one_group() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "a", None).unwrap();
    txn.commit().unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 1, "b", None).unwrap();
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "", "both edits undone at once");
}

#[test]
fn a_fresh_edit_clears_the_redo_side() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "a", None).unwrap();
    txn.commit().unwrap();
    assert!(undo.undo().unwrap());

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "c", None).unwrap();
    txn.commit().unwrap();

    assert!(!undo.redo().unwrap(), "redo cleared by the fresh edit");
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "c");
}

#[test]
fn undo_restores_deleted_content() {
    let doc = doc();
    let text = doc.text("t").unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "keep me around", None).unwrap();
    txn.commit().unwrap();

    // Manager attached after the seed edit: only the deletion is undoable.
    let undo = UndoManager::new(&doc, &text, options()).unwrap();
    let txn = doc.transact_mut().unwrap();
    text.remove_range(&txn, 4, 3).unwrap();
    txn.commit().unwrap();
    {
        let txn = doc.transact().unwrap();
        assert_eq!(text.get_string(&txn).unwrap(), "keep around");
    }

    assert!(undo.undo().unwrap());
    {
        let txn = doc.transact().unwrap();
        assert_eq!(text.get_string(&txn).unwrap(), "keep me around");
    }
    assert!(undo.redo().unwrap());
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "keep around");
}

#[test]
fn map_keys_are_restored() {
    let doc = doc();
    let map = doc.map("m").unwrap();

    let txn = doc.transact_mut().unwrap();
    map.insert(&txn, "k", Input::long(7)).unwrap();
    txn.commit().unwrap();

    let undo = UndoManager::new(&doc, &map, options()).unwrap();
    let txn = doc.transact_mut().unwrap();
    assert!(map.remove(&txn, "k").unwrap());
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    let txn = doc.transact().unwrap();
    let value = map.get(&txn, "k").unwrap().expect("restored");
    assert_eq!(value.as_any().and_then(|any| any.as_long()), Some(7));
}

#[test]
fn changes_outside_the_scope_are_ignored() {
    let doc = doc();
    let tracked = doc.text("tracked").unwrap();
    let other = doc.text("other").unwrap();
    let undo = UndoManager::new(&doc, &tracked, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    other.insert(&txn, 0, "untracked", None).unwrap();
    txn.commit().unwrap();

    assert!(!undo.undo().unwrap());
    let txn = doc.transact().unwrap();
    assert_eq!(other.get_string(&txn).unwrap(), "untracked");
}

#[test]
fn observe_added_fires_per_group_and_replay() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();
    let kinds: Rc<RefCell<Vec<UndoEventKind>>> = Rc::default();
    let sink = kinds.clone();
    undo.observe_added(move |event| sink.borrow_mut().push(event.kind));

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "a", None).unwrap();
    txn.commit().unwrap();
    // Merged into the same group: no second Edit notification.
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 1, "b", None).unwrap();
    txn.commit().unwrap();

    assert!(undo.undo().unwrap());
    assert!(undo.redo().unwrap());

    assert_eq!(
        *kinds.borrow(),
        vec![UndoEventKind::Edit, UndoEventKind::Undo, UndoEventKind::Redo]
    );
}

#[test]
fn clear_discards_both_stacks() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let undo = UndoManager::new(&doc, &text, options()).unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "x", None).unwrap();
    txn.commit().unwrap();
    assert!(undo.undo().unwrap());
    undo.clear();

    assert!(!undo.undo().unwrap());
    assert!(!undo.redo().unwrap());
}
