//! Sticky index resolution across edits.

use weft_core::{Assoc, Doc, DocOptions, StickyIndex};

fn arrange(content: &str) -> (Doc, weft_core::Text) {
    let doc = Doc::with_options(DocOptions {
        client_id: Some(41),
        ..DocOptions::default()
    })
    .unwrap();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, content, None).unwrap();
    txn.commit().unwrap();
    (doc, text)
}

#[test]
fn out_of_bounds_offsets_yield_none() {
    let (doc, text) = arrange("abc");
    let txn = doc.transact().unwrap();
    assert!(StickyIndex::at(&text, &txn, 99, Assoc::After)
        .unwrap()
        .is_none());
    assert!(StickyIndex::at(&text, &txn, 3, Assoc::After)
        .unwrap()
        .is_some(), "the end of the branch is a valid position");
}

#[test]
fn association_decides_which_side_of_an_insertion_the_index_stays_on() {
    let (doc, text) = arrange("hello");
    let (before, after) = {
        let txn = doc.transact().unwrap();
        (
            StickyIndex::at(&text, &txn, 2, Assoc::Before)
                .unwrap()
                .unwrap(),
            StickyIndex::at(&text, &txn, 2, Assoc::After)
                .unwrap()
                .unwrap(),
        )
    };

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 2, "XX", None).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(before.read(&txn).unwrap(), Some(2), "stays left of the insertion");
    assert_eq!(after.read(&txn).unwrap(), Some(4), "stays right of the insertion");
}

#[test]
fn indices_shift_with_remote_edits_elsewhere() {
    let (doc, text) = arrange("abcdef");
    let sticky = {
        let txn = doc.transact().unwrap();
        StickyIndex::at(&text, &txn, 4, Assoc::After).unwrap().unwrap()
    };

    let txn = doc.transact_mut().unwrap();
    text.remove_range(&txn, 0, 2).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(sticky.read(&txn).unwrap(), Some(2));
}

#[test]
fn deleted_anchor_falls_back_to_a_surviving_neighbor() {
    let (doc, text) = arrange("abcd");
    let sticky = {
        let txn = doc.transact().unwrap();
        StickyIndex::at(&text, &txn, 1, Assoc::After).unwrap().unwrap()
    };

    let txn = doc.transact_mut().unwrap();
    text.remove_range(&txn, 1, 1).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    // 'b' is gone; the index lands on 'c', now at offset 1.
    assert_eq!(sticky.read(&txn).unwrap(), Some(1));
}

#[test]
fn anchor_with_no_surviving_side_resolves_to_none() {
    let (doc, text) = arrange("abcd");
    let sticky = {
        let txn = doc.transact().unwrap();
        StickyIndex::at(&text, &txn, 3, Assoc::After).unwrap().unwrap()
    };

    let txn = doc.transact_mut().unwrap();
    text.remove_range(&txn, 1, 3).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(sticky.read(&txn).unwrap(), None);
}

#[test]
fn edge_positions_survive_arbitrary_edits() {
    let (doc, text) = arrange("abc");
    let (start, end) = {
        let txn = doc.transact().unwrap();
        (
            StickyIndex::at(&text, &txn, 0, Assoc::Before)
                .unwrap()
                .unwrap(),
            StickyIndex::at(&text, &txn, 3, Assoc::After).unwrap().unwrap(),
        )
    };

    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "--", None).unwrap();
    text.insert(&txn, 5, "++", None).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(start.read(&txn).unwrap(), Some(0));
    assert_eq!(end.read(&txn).unwrap(), Some(7));
}

#[test]
fn encode_decode_round_trips_across_replicas() {
    let (doc, text) = arrange("shared");
    let sticky = {
        let txn = doc.transact().unwrap();
        StickyIndex::at(&text, &txn, 3, Assoc::After).unwrap().unwrap()
    };
    let encoded = sticky.encode().unwrap();

    // Replicate the document, then restore the position there.
    let peer = Doc::with_options(DocOptions {
        client_id: Some(42),
        ..DocOptions::default()
    })
    .unwrap();
    let full = {
        let txn = doc.transact().unwrap();
        txn.state_diff_v1(None).unwrap()
    };
    {
        let txn = peer.transact_mut().unwrap();
        txn.apply_update(&full).unwrap();
        txn.commit().unwrap();
    }

    let restored = StickyIndex::decode(&peer, &encoded).unwrap();
    let txn = peer.transact().unwrap();
    assert_eq!(restored.read(&txn).unwrap(), Some(3));
}
