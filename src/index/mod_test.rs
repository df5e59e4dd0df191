use super::*;

#[test]
fn test_prepare_columns() {
    // duplicates are eliminated preserving first occurrence
    assert_eq!(prepare_columns(&[2, 1, 2, 0, 1], &[]), vec![2, 1, 0]);

    // primary-key columns stably ordered first
    assert_eq!(prepare_columns(&[3, 1, 0, 2], &[0, 2]), vec![0, 2, 3, 1]);

    // deterministic and idempotent
    let cols = prepare_columns(&[3, 1, 0, 2, 1], &[0, 2]);
    assert_eq!(prepare_columns(&cols, &[0, 2]), cols);

    assert_eq!(prepare_columns(&[], &[0]), Vec::<usize>::new());
}

#[test]
fn test_index_type() {
    let mut index_type = IndexType::new();
    assert_eq!(index_type, IndexType::default());

    index_type
        .set_persistent(true)
        .set_unique(true)
        .set_hash(false)
        .set_spatial(false);
    assert!(index_type.persistent);
    assert!(index_type.unique);
    assert!(!index_type.hash);
    assert!(!index_type.spatial);
}

#[test]
fn test_project() {
    let mut row = Row::new(vec![
        Value::Integer(1),
        Value::Text("x".to_string()),
        Value::Null,
    ]);
    row.set_key(9);

    let values = project(&row, &[2, 0]).unwrap();
    assert_eq!(values, vec![Value::Null, Value::Integer(1)]);

    assert!(project(&row, &[3]).is_err());
    assert!(project(&Row::new_tombstone(9), &[0]).is_err());
}

#[test]
fn test_stats_display() {
    let mut stats = Stats::new("some-index");
    stats.n_count = 10;
    stats.footprint = 1024;
    stats.persistent = true;

    let text = stats.to_string();
    assert!(text.contains("some-index"), "{}", text);
    assert!(text.contains("n_count=10"), "{}", text);
}
