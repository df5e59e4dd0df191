use cbordata::{Cbor, FromCbor, IntoCbor};

use super::*;

#[test]
fn test_row_new() {
    let mut row = Row::new(vec![Value::Integer(1), Value::Text("a".to_string())]);
    assert_eq!(row.to_key(), 0);
    assert_eq!(row.column_count(), 2);
    assert!(!row.is_tombstone());

    row.set_key(42);
    assert_eq!(row.to_key(), 42);
    assert_eq!(row.get_value(0).unwrap(), &Value::Integer(1));
    assert_eq!(row.get_value(1).unwrap(), &Value::Text("a".to_string()));
    assert!(row.get_value(2).is_err());
    assert_eq!(row.as_values().unwrap().len(), 2);
}

#[test]
fn test_row_tombstone() {
    let row = Row::new_tombstone(7);
    assert_eq!(row.to_key(), 7);
    assert_eq!(row.column_count(), 0);
    assert!(row.is_tombstone());
    assert!(row.as_values().is_err());
    assert!(row.get_value(0).is_err());
    assert!(!row.has_large_object());
}

#[test]
fn test_row_footprint() {
    let small = Row::new(vec![Value::Integer(1)]).footprint().unwrap();
    let large = Row::new(vec![Value::Integer(1), Value::Bytes(vec![0; 1024])])
        .footprint()
        .unwrap();
    assert!(large >= small + 1024, "footprint {} {}", large, small);
}

#[test]
fn test_row_large_object() {
    let row = Row::new(vec![Value::Integer(1), Value::Bytes(vec![0])]);
    assert!(row.has_large_object());
    let row = Row::new(vec![Value::Integer(1)]);
    assert!(!row.has_large_object());
}

#[test]
fn test_row_cbor() {
    let rows = vec![
        Row::new(vec![Value::Integer(10), Value::Text("x".to_string())]),
        Row::new_tombstone(99),
    ];

    for row in rows.into_iter() {
        let cbor: Cbor = row.clone().into_cbor().unwrap();
        let mut buf: Vec<u8> = vec![];
        cbor.encode(&mut buf).unwrap();
        let (cbor, _) = Cbor::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(Row::from_cbor(cbor).unwrap(), row);
    }
}
