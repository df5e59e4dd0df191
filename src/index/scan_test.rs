use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, fs, path};

use super::*;

fn make_dir(prefix: &str, seed: u128) -> ffi::OsString {
    let dir: path::PathBuf = [
        env::temp_dir(),
        format!("reltab-{}-{:x}", prefix, seed).into(),
    ]
    .iter()
    .collect();
    fs::create_dir_all(&dir).unwrap();
    dir.into_os_string()
}

fn int_row(value: i64) -> Row {
    Row::new(vec![Value::Integer(value)])
}

#[test]
fn test_scan_mem() {
    let session = Session::new(1);
    let index = ScanIndex::new_mem("test-scan-mem");

    assert_eq!(index.row_count(&session), 0);
    assert!(!index.needs_rebuild());
    assert!(!index.is_persistent());
    assert!(!index.is_unique());

    let mut keys = vec![];
    for i in 0..100 {
        let row = index.assign_key(int_row(i)).unwrap();
        assert!(row.to_key() > 0);
        index.add(&session, &row).unwrap();
        keys.push(row.to_key());
    }
    assert_eq!(index.row_count(&session), 100);

    // keys are strictly monotonic
    for w in keys.windows(2) {
        assert!(w[0] < w[1], "keys {} {}", w[0], w[1]);
    }

    // adding the same key again is a duplicate
    let mut row = int_row(1000);
    row.set_key(keys[0]);
    assert!(matches!(
        index.add(&session, &row),
        Err(Error::DuplicateKey(_, _))
    ));

    let row = index.get_row(&session, keys[10]).unwrap();
    assert_eq!(row.get_value(0).unwrap(), &Value::Integer(10));

    index.remove(&session, &row).unwrap();
    assert_eq!(index.row_count(&session), 99);
    assert!(matches!(
        index.get_row(&session, keys[10]),
        Err(Error::KeyNotFound(_, _))
    ));
    assert!(matches!(
        index.remove(&session, &row),
        Err(Error::KeyNotFound(_, _))
    ));

    // full scan in key order
    let rows: Vec<Row> = index
        .find(&session, Bound::Unbounded, Bound::Unbounded)
        .unwrap()
        .collect();
    assert_eq!(rows.len(), 99);
    for w in rows.windows(2) {
        assert!(w[0].to_key() < w[1].to_key());
    }

    index.truncate(&session).unwrap();
    assert_eq!(index.row_count(&session), 0);
    assert_eq!(index.footprint().unwrap(), 0);
}

#[test]
fn test_scan_read_batch() {
    let session = Session::new(1);
    let index = ScanIndex::new_mem("test-scan-batch");

    for i in 0..1000 {
        let row = index.assign_key(int_row(i)).unwrap();
        index.add(&session, &row).unwrap();
    }

    let mut after = None;
    let mut total = 0;
    let mut batches = 0;
    loop {
        let batch = index.read_batch(after, 100).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 100);
        after = Some(batch.last().unwrap().to_key());
        total += batch.len();
        batches += 1;
    }
    assert_eq!(total, 1000);
    assert_eq!(batches, 10);
}

#[test]
fn test_scan_persistent() {
    let seed: u128 = random();
    println!("test_scan_persistent seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed as u64);

    let dir = make_dir("scan-persist", seed);
    let session = Session::new(1);

    let mut alive = std::collections::BTreeMap::new();
    {
        let index = ScanIndex::open("persist-scan", &dir, false).unwrap();
        assert!(index.is_persistent());
        for i in 0..500_i64 {
            let row = index.assign_key(int_row(i)).unwrap();
            index.add(&session, &row).unwrap();
            alive.insert(row.to_key(), row.clone());
        }
        // remove a random subset
        let keys: Vec<u64> = alive.keys().cloned().collect();
        for key in keys.into_iter() {
            if rng.gen::<u8>() % 3 == 0 {
                let row = alive.remove(&key).unwrap();
                index.remove(&session, &row).unwrap();
            }
        }
    }

    // reopen, replay and verify
    let index = ScanIndex::open("persist-scan", &dir, false).unwrap();
    assert_eq!(index.row_count(&session) as usize, alive.len());
    for (key, row) in alive.iter() {
        assert_eq!(&index.get_row(&session, *key).unwrap(), row);
    }

    // key assignment continues past replayed keys
    let row = index.assign_key(int_row(-1)).unwrap();
    assert!(row.to_key() > *alive.keys().last().unwrap());

    index.drop_storage().unwrap();

    // dropped storage means a fresh journal on next open
    let index = ScanIndex::open("persist-scan", &dir, false).unwrap();
    assert_eq!(index.row_count(&session), 0);
}

#[test]
fn test_scan_main_column() {
    let session = Session::new(1);
    let index = ScanIndex::new_mem("test-scan-main");
    index.set_main_column(0);
    assert_eq!(index.to_main_column(), Some(0));

    let row = index
        .assign_key(Row::new(vec![Value::Integer(42), Value::Null]))
        .unwrap();
    assert_eq!(row.to_key(), 42);
    index.add(&session, &row).unwrap();

    // duplicate primary key surfaces from add
    let row = index
        .assign_key(Row::new(vec![Value::Integer(42), Value::Null]))
        .unwrap();
    assert!(matches!(
        index.add(&session, &row),
        Err(Error::DuplicateKey(_, _))
    ));

    // non-integer main column value is rejected
    let res = index.assign_key(Row::new(vec![Value::Text("x".to_string()), Value::Null]));
    assert!(matches!(res, Err(Error::InvalidInput(_, _))));
}
