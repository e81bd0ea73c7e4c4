//! Deep observation: delivery, ordering, paths, and the unobserve
//! guarantee.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{
    ChangeTag, Doc, DocOptions, EventData, Input, PathSegment, SharedRef, TextDelta,
};

fn doc() -> Doc {
    Doc::with_options(DocOptions {
        client_id: Some(21),
        ..DocOptions::default()
    })
    .unwrap()
}

#[test]
fn text_insert_delivers_a_delta() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let log: Rc<RefCell<Vec<Vec<weft_core::Event>>>> = Rc::default();
    let sink = log.clone();
    text.observe_deep(move |events| sink.borrow_mut().push(events.to_vec()))
        .unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "hi", None).unwrap();
    txn.commit().unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].len(), 1);
    let event = &log[0][0];
    assert!(event.path.is_empty());
    match &event.data {
        EventData::Text { delta } => match delta.as_slice() {
            [TextDelta::Insert { chunk, .. }] => assert_eq!(chunk, "hi"),
            other => panic!("unexpected delta {other:?}"),
        },
        other => panic!("unexpected event data {other:?}"),
    }
}

#[test]
fn nested_changes_arrive_bottom_up_with_paths() {
    let doc = doc();
    let map = doc.map("root").unwrap();
    let log: Rc<RefCell<Vec<Vec<weft_core::Event>>>> = Rc::default();
    let sink = log.clone();
    map.observe_deep(move |events| sink.borrow_mut().push(events.to_vec()))
        .unwrap();

    let txn = doc.transact_mut().unwrap();
    map.insert(&txn, "body", Input::Text("abc".into())).unwrap();
    txn.commit().unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    let events = &log[0];
    assert_eq!(events.len(), 2, "one event for the text, one for the map");

    // Child first (deeper), parent after.
    assert_eq!(events[0].path, vec![PathSegment::Key("body".into())]);
    assert!(matches!(events[0].data, EventData::Text { .. }));
    assert!(events[1].path.is_empty());
    match &events[1].data {
        EventData::Map { keys } => {
            let change = keys.entries.get("body").expect("changed key");
            assert_eq!(change.tag, ChangeTag::Add);
            assert!(change.old.is_none());
            assert!(change.new.is_some());
        }
        other => panic!("unexpected event data {other:?}"),
    }
}

#[test]
fn map_updates_carry_old_and_new_cells() {
    let doc = doc();
    let map = doc.map("m").unwrap();
    let txn = doc.transact_mut().unwrap();
    map.insert(&txn, "k", Input::long(1)).unwrap();
    txn.commit().unwrap();

    let log: Rc<RefCell<Vec<(ChangeTag, Option<i64>, Option<i64>)>>> = Rc::default();
    let sink = log.clone();
    map.observe_deep(move |events| {
        for event in events {
            if let EventData::Map { keys } = &event.data {
                for change in keys.entries.values() {
                    let as_long = |cell: &Option<weft_core::Output>| {
                        cell.as_ref()
                            .and_then(|output| output.as_any())
                            .and_then(|any| any.as_long())
                    };
                    sink.borrow_mut().push((
                        change.tag,
                        as_long(&change.old),
                        as_long(&change.new),
                    ));
                }
            }
        }
    })
    .unwrap();

    let txn = doc.transact_mut().unwrap();
    map.insert(&txn, "k", Input::long(2)).unwrap();
    txn.commit().unwrap();
    let txn = doc.transact_mut().unwrap();
    assert!(map.remove(&txn, "k").unwrap());
    txn.commit().unwrap();

    let log = log.borrow();
    assert_eq!(
        *log,
        vec![
            (ChangeTag::Update, Some(1), Some(2)),
            (ChangeTag::Remove, Some(2), None),
        ]
    );
}

#[test]
fn unobserve_stops_deliveries() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let calls: Rc<RefCell<usize>> = Rc::default();
    let counter = calls.clone();
    let sub = text
        .observe_deep(move |_| *counter.borrow_mut() += 1)
        .unwrap();

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "a", None).unwrap();
    txn.commit().unwrap();
    assert_eq!(*calls.borrow(), 1);

    text.unobserve_deep(sub);
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "b", None).unwrap();
    txn.commit().unwrap();
    assert_eq!(*calls.borrow(), 1, "no calls after unobserve returned");
}

#[test]
fn observers_on_siblings_do_not_cross_talk() {
    let doc = doc();
    let left = doc.text("left").unwrap();
    let right = doc.text("right").unwrap();
    let calls: Rc<RefCell<usize>> = Rc::default();
    let counter = calls.clone();
    right
        .observe_deep(move |_| *counter.borrow_mut() += 1)
        .unwrap();

    let txn = doc.transact_mut().unwrap();
    left.insert(&txn, 0, "only left changes", None).unwrap();
    txn.commit().unwrap();

    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn formatting_reports_retain_with_attributes() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "abcd", None).unwrap();
    txn.commit().unwrap();

    let log: Rc<RefCell<Vec<Vec<TextDelta>>>> = Rc::default();
    let sink = log.clone();
    text.observe_deep(move |events| {
        for event in events {
            if let EventData::Text { delta } = &event.data {
                sink.borrow_mut().push(delta.clone());
            }
        }
    })
    .unwrap();

    let txn = doc.transact_mut().unwrap();
    text.format(
        &txn,
        1,
        2,
        std::collections::BTreeMap::from([("bold".to_owned(), weft_core::Any::Bool(true))]),
    )
    .unwrap();
    txn.commit().unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    match log[0].as_slice() {
        [TextDelta::Retain {
            len: 1,
            attributes: None,
        }, TextDelta::Retain {
            len: 2,
            attributes: Some(attrs),
        }] => {
            assert!(attrs.contains_key("bold"));
        }
        other => panic!("unexpected delta {other:?}"),
    }
}

#[test]
fn after_transaction_reports_state_vectors_and_delete_set() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "abc", None).unwrap();
    txn.commit().unwrap();

    let log: Rc<RefCell<Vec<weft_core::AfterTransactionEvent>>> = Rc::default();
    let sink = log.clone();
    let sub = doc.observe_after_transaction(move |event| sink.borrow_mut().push(event.clone()));

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 3, "!", None).unwrap();
    text.remove_range(&txn, 0, 2).unwrap();
    txn.commit().unwrap();
    doc.unobserve_after_transaction(sub);

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    let event = &log[0];
    assert_ne!(event.before_state, event.after_state);
    let deleted: u64 = event.delete_set.iter().map(|span| span.len).sum();
    assert_eq!(deleted, 2);
}
