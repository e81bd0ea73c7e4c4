//! Update observer contract and wire-size properties.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{Doc, DocOptions};

fn doc_with_client(client_id: u64) -> Doc {
    Doc::with_options(DocOptions {
        client_id: Some(client_id),
        ..DocOptions::default()
    })
    .expect("options are valid")
}

#[test]
fn one_callback_per_producing_commit() {
    let doc = doc_with_client(7);
    let calls: Rc<RefCell<usize>> = Rc::default();
    let counter = calls.clone();
    let sub = doc.observe_updates_v1(move |_| *counter.borrow_mut() += 1);

    let text = doc.text("t").unwrap();
    for i in 0..3 {
        let txn = doc.transact_mut().unwrap();
        text.insert(&txn, i, "x", None).unwrap();
        txn.commit().unwrap();
    }
    // A committed transaction that produced nothing fires no callback.
    let txn = doc.transact_mut().unwrap();
    txn.commit().unwrap();

    assert_eq!(*calls.borrow(), 3);
    doc.unobserve_updates_v1(sub);

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "y", None).unwrap();
    txn.commit().unwrap();
    assert_eq!(*calls.borrow(), 3, "no delivery after unobserve returned");
}

#[test]
fn six_char_insert_encodes_to_expected_v1_size() {
    let doc = doc_with_client(0x1234_5678);
    let bytes: Rc<RefCell<Vec<u8>>> = Rc::default();
    let sink = bytes.clone();
    doc.observe_updates_v1(move |event| *sink.borrow_mut() = event.update.clone());

    let text = doc.text("value").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "abcdef", None).unwrap();
    txn.commit().unwrap();

    let len = bytes.borrow().len();
    assert!(
        (25..=30).contains(&len),
        "expected 25..=30 bytes, got {len}"
    );
}

#[test]
fn per_transaction_updates_are_not_cumulative() {
    let doc = doc_with_client(9);
    let sizes: Rc<RefCell<Vec<usize>>> = Rc::default();
    let sink = sizes.clone();
    doc.observe_updates_v1(move |event| sink.borrow_mut().push(event.update.len()));

    let text = doc.text("t").unwrap();
    for _ in 0..3 {
        let txn = doc.transact_mut().unwrap();
        let len = text.len(&txn).unwrap();
        text.insert(&txn, len, "ab", None).unwrap();
        txn.commit().unwrap();
    }

    let sizes = sizes.borrow();
    assert_eq!(sizes.len(), 3);
    // Each carries one two-char insert, so none should balloon with
    // the accumulated history.
    let spread = sizes.iter().max().unwrap() - sizes.iter().min().unwrap();
    assert!(spread <= 4, "sizes {sizes:?} look cumulative");
}

#[test]
fn null_vector_diff_is_full_history_and_peer_diff_is_smaller() {
    let a = doc_with_client(1);
    let b = doc_with_client(2);

    let text = a.text("t").unwrap();
    let txn = a.transact_mut().unwrap();
    text.insert(&txn, 0, "shared prefix", None).unwrap();
    txn.commit().unwrap();

    // Bring B up to date, then extend A.
    let full = {
        let txn = a.transact().unwrap();
        txn.state_diff_v1(None).unwrap()
    };
    {
        let txn = b.transact_mut().unwrap();
        txn.apply_update(&full).unwrap();
        txn.commit().unwrap();
    }
    let txn = a.transact_mut().unwrap();
    text.insert(&txn, 0, "!", None).unwrap();
    txn.commit().unwrap();

    let b_vector = {
        let txn = b.transact().unwrap();
        txn.state_vector().unwrap()
    };
    let txn = a.transact().unwrap();
    let against_null = txn.state_diff_v1(None).unwrap();
    let against_peer = txn.state_diff_v1(Some(&b_vector)).unwrap();
    assert!(
        against_peer.len() < against_null.len(),
        "peer diff ({}) should be smaller than full history ({})",
        against_peer.len(),
        against_null.len()
    );

    // Applying the full-history diff on a fresh replica reproduces A.
    let c = doc_with_client(3);
    {
        let txn = c.transact_mut().unwrap();
        txn.apply_update(&against_null).unwrap();
        txn.commit().unwrap();
    }
    let text_c = c.text("t").unwrap();
    let txn = c.transact().unwrap();
    assert_eq!(text_c.get_string(&txn).unwrap(), "!shared prefix");
}

#[test]
fn v2_is_no_larger_than_v1_for_multi_op_updates() {
    let doc = doc_with_client(4);
    let map = doc.map("m").unwrap();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    for i in 0..8 {
        map.insert(&txn, &format!("key{i}"), weft_core::Input::long(i))
            .unwrap();
    }
    text.insert(&txn, 0, "columnar encodings pay off", None).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    let v1 = txn.state_diff_v1(None).unwrap();
    let v2 = txn.state_diff_v2(None).unwrap();
    assert!(
        v2.len() <= v1.len(),
        "v2 ({}) should not exceed v1 ({})",
        v2.len(),
        v1.len()
    );
}

#[test]
fn v1_and_v2_describe_the_same_logical_update() {
    let a = doc_with_client(1);
    let text = a.text("t").unwrap();
    let txn = a.transact_mut().unwrap();
    text.insert(&txn, 0, "payload", None).unwrap();
    text.remove_range(&txn, 2, 2).unwrap();
    txn.commit().unwrap();

    let (v1, v2) = {
        let txn = a.transact().unwrap();
        (
            txn.state_diff_v1(None).unwrap(),
            txn.state_diff_v2(None).unwrap(),
        )
    };

    let via_v1 = doc_with_client(2);
    let via_v2 = doc_with_client(3);
    {
        let txn = via_v1.transact_mut().unwrap();
        txn.apply_update(&v1).unwrap();
        txn.commit().unwrap();
    }
    {
        let txn = via_v2.transact_mut().unwrap();
        txn.apply_update(&v2).unwrap();
        txn.commit().unwrap();
    }

    let txn1 = via_v1.transact().unwrap();
    let txn2 = via_v2.transact().unwrap();
    assert_eq!(
        via_v1.text("t").unwrap().get_string(&txn1).unwrap(),
        via_v2.text("t").unwrap().get_string(&txn2).unwrap(),
    );
    assert_eq!(
        via_v1.text("t").unwrap().get_string(&txn1).unwrap(),
        "paoad"
    );
}

#[test]
fn malformed_updates_are_rejected_without_side_effects() {
    let doc = doc_with_client(5);
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "stable", None).unwrap();
    txn.commit().unwrap();

    let before = {
        let txn = doc.transact().unwrap();
        txn.state_vector().unwrap()
    };

    let txn = doc.transact_mut().unwrap();
    assert!(txn.apply_update(&[0xff, 0x01, 0x02]).is_err());
    assert!(txn.apply_update(&[]).is_err());
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(txn.state_vector().unwrap(), before);
    assert_eq!(text.get_string(&txn).unwrap(), "stable");
}
