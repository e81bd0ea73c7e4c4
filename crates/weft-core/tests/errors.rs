//! Error taxonomy: contention is a value, misuse is loud, validation is
//! local.

use weft_core::{
    BranchError, Doc, DocError, DocOptions, SharedRef, StateError, ValidationError,
};

fn doc() -> Doc {
    Doc::with_options(DocOptions {
        client_id: Some(61),
        ..DocOptions::default()
    })
    .unwrap()
}

#[test]
fn write_contention_is_none_not_an_error() {
    let doc = doc();
    let held = doc.transact_mut().unwrap();
    assert!(doc.transact_mut().is_none());
    assert!(doc.transact().is_none(), "readers wait for the writer too");
    drop(held);
    assert!(doc.transact_mut().is_some());
}

#[test]
fn readers_coexist_but_block_the_writer() {
    let doc = doc();
    let first = doc.transact().unwrap();
    let second = doc.transact().unwrap();
    assert!(doc.transact_mut().is_none());
    drop(first);
    assert!(doc.transact_mut().is_none(), "one reader still open");
    drop(second);
    assert!(doc.transact_mut().is_some());
}

#[test]
fn root_kind_is_bound_on_first_access() {
    let doc = doc();
    doc.text("name").unwrap();
    match doc.array("name") {
        Err(DocError::Validation(ValidationError::KindMismatch { name, .. })) => {
            assert_eq!(name, "name");
        }
        other => panic!("expected kind mismatch, got {other:?}"),
    }
    // Same kind keeps working.
    doc.text("name").unwrap();
}

#[test]
fn out_of_range_indices_are_rejected_without_effect() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "abc", None).unwrap();
    match text.insert(&txn, 99, "!", None) {
        Err(BranchError::Validation(ValidationError::IndexOutOfRange { .. })) => {}
        other => panic!("expected out-of-range, got {other:?}"),
    }
    match text.remove_range(&txn, 1, 99) {
        Err(BranchError::Validation(ValidationError::IndexOutOfRange { .. })) => {}
        other => panic!("expected out-of-range, got {other:?}"),
    }
    txn.commit().unwrap();
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "abc");
}

#[test]
fn mutating_through_a_read_transaction_is_a_state_error() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let txn = doc.transact().unwrap();
    match text.insert(&txn, 0, "nope", None) {
        Err(BranchError::State(StateError::ReadOnlyTransaction)) => {}
        other => panic!("expected read-only error, got {other:?}"),
    }
}

#[test]
fn commit_is_idempotent_once() {
    let doc = doc();
    let txn = doc.transact_mut().unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.commit(), Err(StateError::CommitAfterCommit));
}

#[test]
fn a_committed_write_transaction_rejects_further_use() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    let txn = doc.transact_mut().unwrap();
    text.insert(&txn, 0, "x", None).unwrap();
    txn.commit().unwrap();
    match text.insert(&txn, 0, "y", None) {
        Err(BranchError::State(StateError::TransactionClosed)) => {}
        other => panic!("expected closed-transaction error, got {other:?}"),
    }
    match text.get_string(&txn) {
        Err(BranchError::State(StateError::TransactionClosed)) => {}
        other => panic!("expected closed-transaction error, got {other:?}"),
    }
}

#[test]
fn a_committed_read_transaction_still_reads() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    {
        let txn = doc.transact_mut().unwrap();
        text.insert(&txn, 0, "still here", None).unwrap();
        txn.commit().unwrap();
    }
    let txn = doc.transact().unwrap();
    txn.commit().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "still here");
}

#[test]
fn transactions_are_bound_to_their_document() {
    let a = doc();
    let b = Doc::with_options(DocOptions {
        client_id: Some(62),
        ..DocOptions::default()
    })
    .unwrap();
    let text_a = a.text("t").unwrap();
    let txn_b = b.transact_mut().unwrap();
    match text_a.insert(&txn_b, 0, "wrong doc", None) {
        Err(BranchError::State(StateError::ForeignTransaction)) => {}
        other => panic!("expected foreign-transaction error, got {other:?}"),
    }
}

#[test]
fn handles_report_use_after_free_once_the_document_is_gone() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    drop(doc);

    assert!(text.read_transaction().is_none());
    match text.observe_deep(|_| {}) {
        Err(BranchError::State(StateError::UseAfterFree)) => {}
        other => panic!("expected use-after-free, got {other:?}"),
    }
}

#[test]
fn dropping_an_uncommitted_writer_releases_the_gate() {
    let doc = doc();
    let text = doc.text("t").unwrap();
    {
        let txn = doc.transact_mut().unwrap();
        text.insert(&txn, 0, "auto", None).unwrap();
        // No explicit commit: drop finalizes.
    }
    let txn = doc.transact().unwrap();
    assert_eq!(text.get_string(&txn).unwrap(), "auto");
}
