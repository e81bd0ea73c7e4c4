//! Map and array surfaces, including nesting.

use weft_core::{Any, Doc, DocOptions, Input, Output};

fn doc() -> Doc {
    Doc::with_options(DocOptions {
        client_id: Some(51),
        ..DocOptions::default()
    })
    .unwrap()
}

#[test]
fn array_insert_get_and_iterate() {
    let doc = doc();
    let array = doc.array("a").unwrap();
    let txn = doc.transact_mut().unwrap();
    array
        .insert_range(
            &txn,
            0,
            vec![Input::long(1), Input::string("two"), Input::bool(true)],
        )
        .unwrap();
    array.push_back(&txn, Input::null()).unwrap();
    array.push_front(&txn, Input::double(0.5)).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(array.len(&txn).unwrap(), 5);
    let values: Vec<Option<Any>> = array
        .iter(&txn)
        .unwrap()
        .map(|cell| cell.as_any().cloned())
        .collect();
    assert_eq!(
        values,
        vec![
            Some(Any::Double(0.5)),
            Some(Any::Long(1)),
            Some(Any::String("two".into())),
            Some(Any::Bool(true)),
            Some(Any::Null),
        ]
    );
    let cell = array.get(&txn, 2).unwrap().expect("in range");
    assert_eq!(cell.as_any(), Some(&Any::String("two".into())));
    assert!(array.get(&txn, 5).unwrap().is_none());
}

#[test]
fn array_remove_range_collapses_indices() {
    let doc = doc();
    let array = doc.array("a").unwrap();
    let txn = doc.transact_mut().unwrap();
    array
        .insert_range(
            &txn,
            0,
            (0..6).map(Input::long).collect(),
        )
        .unwrap();
    txn.commit().unwrap();

    let txn = doc.transact_mut().unwrap();
    array.remove_range(&txn, 1, 3).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(array.len(&txn).unwrap(), 3);
    let values: Vec<i64> = array
        .iter(&txn)
        .unwrap()
        .filter_map(|cell| cell.as_any().and_then(Any::as_long))
        .collect();
    assert_eq!(values, vec![0, 4, 5]);
}

#[test]
fn map_set_get_remove_and_keys() {
    let doc = doc();
    let map = doc.map("m").unwrap();
    let txn = doc.transact_mut().unwrap();
    map.insert(&txn, "b", Input::long(2)).unwrap();
    map.insert(&txn, "a", Input::long(1)).unwrap();
    map.insert(&txn, "a", Input::long(10)).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(map.len(&txn).unwrap(), 2);
    assert_eq!(map.keys(&txn).unwrap(), vec!["a", "b"]);
    let a = map.get(&txn, "a").unwrap().expect("present");
    assert_eq!(a.as_any().and_then(Any::as_long), Some(10));
    assert!(map.get(&txn, "missing").unwrap().is_none());
    drop(txn);

    let txn = doc.transact_mut().unwrap();
    assert!(map.remove(&txn, "a").unwrap());
    assert!(!map.remove(&txn, "a").unwrap(), "already gone");
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert_eq!(map.len(&txn).unwrap(), 1);
}

#[test]
fn map_clear_empties_the_map() {
    let doc = doc();
    let map = doc.map("m").unwrap();
    let txn = doc.transact_mut().unwrap();
    for key in ["x", "y", "z"] {
        map.insert(&txn, key, Input::bool(true)).unwrap();
    }
    txn.commit().unwrap();

    let txn = doc.transact_mut().unwrap();
    map.clear(&txn).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    assert!(map.is_empty(&txn).unwrap());
}

#[test]
fn nested_branches_are_owned_by_their_cell() {
    let doc = doc();
    let map = doc.map("root").unwrap();
    let txn = doc.transact_mut().unwrap();
    map.insert(
        &txn,
        "list",
        Input::Array(vec![Input::long(1), Input::Text("deep".into())]),
    )
    .unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    let list = map.get(&txn, "list").unwrap().expect("present");
    let list = list.as_array().expect("array cell").clone();
    assert_eq!(list.len(&txn).unwrap(), 2);
    let nested = list.get(&txn, 1).unwrap().expect("in range");
    let nested = nested.as_text().expect("text cell").clone();
    assert_eq!(nested.get_string(&txn).unwrap(), "deep");
    drop(txn);

    // Deleting the cell tombstones the subtree; the key reads as gone.
    let txn = doc.transact_mut().unwrap();
    assert!(map.remove(&txn, "list").unwrap());
    txn.commit().unwrap();
    let txn = doc.transact().unwrap();
    assert!(map.get(&txn, "list").unwrap().is_none());
}

#[test]
fn embedded_collections_are_plain_values() {
    let doc = doc();
    let map = doc.map("m").unwrap();
    let txn = doc.transact_mut().unwrap();
    map.insert(
        &txn,
        "point",
        Input::object([
            ("x".to_owned(), Any::Long(3)),
            ("y".to_owned(), Any::Long(4)),
        ]),
    )
    .unwrap();
    map.insert(&txn, "bytes", Input::bytes(vec![1u8, 2, 3])).unwrap();
    txn.commit().unwrap();

    let txn = doc.transact().unwrap();
    let point = map.get(&txn, "point").unwrap().expect("present");
    match point {
        Output::Any(Any::Map(entries)) => {
            assert_eq!(entries.get("x"), Some(&Any::Long(3)));
        }
        other => panic!("expected embedded map, got {other:?}"),
    }
    let bytes = map.get(&txn, "bytes").unwrap().expect("present");
    assert_eq!(bytes.as_any(), Some(&Any::Bytes(vec![1, 2, 3])));
}
