use arbitrary::{Arbitrary, Unstructured};
use rand::{prelude::random, rngs::SmallRng, RngCore, SeedableRng};

use std::{
    collections::BTreeMap,
    env, ffi, fs, path,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
};

use super::*;
use crate::{
    config::Settings,
    database::{Database, EventListener, Progress},
    db::Value,
    index::IndexType,
    Error,
};

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    Add { value: i64 },
    Remove { nth: usize },
}

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

fn int_columns(n: usize) -> Vec<Column> {
    (0..n)
        .map(|i| Column::new(&format!("col{}", i), ColumnType::Integer))
        .collect()
}

fn make_table(db: &Arc<Database>, name: &str, n_cols: usize) -> Arc<Table> {
    Table::new(TableConfig::new(name, 1, int_columns(n_cols)), Arc::clone(db)).unwrap()
}

struct CountListener {
    calls: AtomicUsize,
    top: AtomicUsize,
}

impl EventListener for CountListener {
    fn set_progress(&self, state: Progress, label: &str, current: usize, total: usize) {
        assert_eq!(state, Progress::CreateIndex);
        assert!(label.contains(':'), "{}", label);
        assert!(current <= total, "{} {}", current, total);
        self.calls.fetch_add(1, SeqCst);
        self.top.store(current, SeqCst);
    }
}

#[test]
fn test_single_row_add() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "single-add", 2);
    let session = db.new_session();

    table.lock(&session, true /*exclusive*/, false).unwrap();
    let before = table.to_last_modification_id();

    let row = table
        .add_row(&session, Row::new(vec![Value::Integer(1), Value::Integer(2)]))
        .unwrap();
    assert!(row.to_key() > 0);
    assert_eq!(table.row_count(&session).unwrap(), 1);
    assert!(table.to_last_modification_id() > before);

    let fetched = table.get_row(&session, row.to_key()).unwrap();
    assert_eq!(fetched, row);
    table.unlock(&session);
}

#[test]
fn test_unique_violation_rollback() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "unique-rollback", 1);
    let session = db.new_session();

    table.lock(&session, true /*exclusive*/, false).unwrap();
    let unique = {
        let mut index_type = IndexType::new();
        index_type.set_unique(true);
        table
            .add_index(&session, "unique-rollback-idx", 2, &[0], index_type, true, None)
            .unwrap()
    };

    table
        .add_row(&session, Row::new(vec![Value::Integer(1)]))
        .unwrap();
    table
        .add_row(&session, Row::new(vec![Value::Integer(2)]))
        .unwrap();

    // snapshot the scan index before the failing add
    let snapshot: Vec<Row> = table
        .scan_index()
        .read_batch(None, usize::MAX)
        .unwrap();

    let res = table.add_row(&session, Row::new(vec![Value::Integer(1)]));
    assert!(matches!(res, Err(Error::DuplicateKey(_, _))), "{:?}", res);

    // the failed add left no residue in any index
    assert_eq!(table.row_count(&session).unwrap(), 2);
    assert_eq!(table.scan_index().read_batch(None, usize::MAX).unwrap(), snapshot);
    assert_eq!(unique.row_count(&session), 2);
    table.unlock(&session);
}

#[test]
fn test_rebuild_in_batches() {
    let mut settings = Settings::default();
    settings.set_max_memory_rows(100);
    let db = Database::new(settings);

    let listener = Arc::new(CountListener {
        calls: AtomicUsize::new(0),
        top: AtomicUsize::new(0),
    });
    db.set_listener(Arc::clone(&listener) as Arc<dyn EventListener>);

    let table = make_table(&db, "rebuild-batches", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    for i in 0..10_000_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i)]))
            .unwrap();
    }

    let index = table
        .add_index(
            &session,
            "rebuild-batches-idx",
            2,
            &[0],
            IndexType::new(),
            true,
            None,
        )
        .unwrap();

    assert_eq!(index.row_count(&session), 10_000);
    assert!(listener.calls.load(SeqCst) >= 99, "{}", listener.calls.load(SeqCst));
    assert_eq!(listener.top.load(SeqCst), 10_000);
    table.unlock(&session);
}

#[test]
fn test_add_remove_model() {
    let seed: u128 = random();
    println!("test_add_remove_model seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed as u64);

    let db = Database::new(Settings::default());
    let table = make_table(&db, "add-remove-model", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    table
        .add_index(&session, "model-tree", 2, &[0], IndexType::new(), true, None)
        .unwrap();
    let hash_type = {
        let mut index_type = IndexType::new();
        index_type.set_hash(true);
        index_type
    };
    table
        .add_index(&session, "model-hash", 3, &[0], hash_type, true, None)
        .unwrap();

    let mut model: BTreeMap<u64, Row> = BTreeMap::new();
    let mut last_mod = table.to_last_modification_id();
    let (mut n_adds, mut n_removes) = (0, 0);

    let mut bytes = vec![0_u8; 64 * 1024];
    rng.fill_bytes(&mut bytes);
    let mut uns = Unstructured::new(&bytes);

    for _ in 0..2000 {
        let op: Op = match uns.arbitrary() {
            Ok(op) => op,
            Err(_) => break,
        };
        match op {
            Op::Add { value } => {
                let row = table
                    .add_row(&session, Row::new(vec![Value::Integer(value)]))
                    .unwrap();
                model.insert(row.to_key(), row);
                n_adds += 1;
            }
            Op::Remove { nth } if !model.is_empty() => {
                let nth = nth % model.len();
                let key = *model.keys().nth(nth).unwrap();
                let row = model.remove(&key).unwrap();
                table.remove_row(&session, &row).unwrap();
                n_removes += 1;
            }
            Op::Remove { .. } => continue,
        }
        // strictly monotonic modification-id per successful mutation
        let mod_id = table.to_last_modification_id();
        assert!(mod_id > last_mod, "{} {}", mod_id, last_mod);
        last_mod = mod_id;
    }

    // every non-delegate index reports the same count
    let count = table.row_count(&session).unwrap();
    assert_eq!(count as usize, model.len());
    assert_eq!(count as i64, n_adds - n_removes);
    for idx in table.indexes().iter() {
        assert_eq!(idx.row_count(&session), count, "index {:?}", idx.to_name());
    }

    // every modeled row is still readable
    for (key, row) in model.iter() {
        assert_eq!(&table.get_row(&session, *key).unwrap(), row);
    }
    table.unlock(&session);
}

#[test]
fn test_add_remove_round_trip() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "round-trip", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    table
        .add_index(&session, "round-trip-idx", 2, &[0], IndexType::new(), true, None)
        .unwrap();

    let row = table
        .add_row(&session, Row::new(vec![Value::Integer(7)]))
        .unwrap();
    table.remove_row(&session, &row).unwrap();

    assert_eq!(table.row_count(&session).unwrap(), 0);
    for idx in table.indexes().iter() {
        assert_eq!(idx.row_count(&session), 0, "index {:?}", idx.to_name());
    }
    table.unlock(&session);
}

#[test]
fn test_add_index_visibility() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "index-visibility", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    let mut rows = vec![];
    for i in 0..100_i64 {
        rows.push(
            table
                .add_row(&session, Row::new(vec![Value::Integer(i)]))
                .unwrap(),
        );
    }

    let index = table
        .add_index(&session, "visibility-idx", 2, &[0], IndexType::new(), true, None)
        .unwrap();

    // the index list ends in the new index
    let indexes = table.indexes();
    assert_eq!(indexes.last().unwrap().to_name(), "visibility-idx");
    assert!(db.is_index_registered("visibility-idx"));

    // every row previously visible in the scan index is found
    use std::ops::Bound;
    for row in rows.iter() {
        let values = vec![row.get_value(0).unwrap().clone()];
        let found: Vec<Row> = index
            .find(
                &session,
                Bound::Included(values.clone()),
                Bound::Included(values),
            )
            .unwrap()
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_key(), row.to_key());
    }
    table.unlock(&session);
}

#[test]
fn test_truncate() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "truncate", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    table
        .add_index(&session, "truncate-idx", 2, &[0], IndexType::new(), true, None)
        .unwrap();
    for i in 0..10_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i)]))
            .unwrap();
    }

    assert_eq!(table.truncate(&session).unwrap(), 10);
    assert_eq!(table.row_count(&session).unwrap(), 0);
    for idx in table.indexes().iter() {
        assert_eq!(idx.row_count(&session), 0, "index {:?}", idx.to_name());
    }
    table.unlock(&session);
}

#[test]
fn test_analyze_cadence() {
    let mut settings = Settings::default();
    settings.set_analyze_auto(4);
    let db = Database::new(settings);
    let table = make_table(&db, "analyze-cadence", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    // threshold 4, the 5th change triggers the first analyze
    for i in 0..5_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i)]))
            .unwrap();
    }
    assert_eq!(session.take_pending_analyze(), vec!["analyze-cadence".to_string()]);
    assert_eq!(session.take_pending_analyze(), Vec::<String>::new());

    // cadence doubled to 8, the 9th further change triggers the next
    for i in 0..8_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i + 100)]))
            .unwrap();
    }
    assert_eq!(session.take_pending_analyze(), Vec::<String>::new());
    table
        .add_row(&session, Row::new(vec![Value::Integer(999)]))
        .unwrap();
    assert_eq!(session.take_pending_analyze(), vec!["analyze-cadence".to_string()]);

    let stats = table.to_stats(&session).unwrap();
    assert_eq!(stats.next_analyze, 16);
    table.unlock(&session);
}

#[test]
fn test_analyze_disabled() {
    let db = Database::new(Settings::default()); // analyze_auto == 0
    let table = make_table(&db, "analyze-disabled", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    for i in 0..100_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i)]))
            .unwrap();
    }
    assert_eq!(session.take_pending_analyze(), Vec::<String>::new());
    table.unlock(&session);
}

#[test]
fn test_add_index_unsupported() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "unsupported", 2);
    let session = db.new_session();

    let spatial = {
        let mut index_type = IndexType::new();
        index_type.set_spatial(true);
        index_type
    };
    let res = table.add_index(&session, "spatial-idx", 2, &[0], spatial, true, None);
    assert!(matches!(res, Err(Error::Unsupported(_, _))), "{:?}", res);

    let hash = {
        let mut index_type = IndexType::new();
        index_type.set_hash(true);
        index_type
    };
    let res = table.add_index(&session, "hash-multi-idx", 3, &[0, 1], hash, true, None);
    assert!(matches!(res, Err(Error::Unsupported(_, _))), "{:?}", res);

    // failed creations leave no schema residue
    assert!(!db.is_index_registered("spatial-idx"));
    assert!(!db.is_index_registered("hash-multi-idx"));

    // duplicate index name
    table
        .add_index(&session, "dup-idx", 4, &[0], IndexType::new(), true, None)
        .unwrap();
    let res = table.add_index(&session, "dup-idx", 5, &[1], IndexType::new(), true, None);
    assert!(matches!(res, Err(Error::InvalidInput(_, _))), "{:?}", res);
}

#[test]
fn test_delegate_index() {
    let seed: u128 = random();
    println!("test_delegate_index seed:{}", seed);
    let dir = make_dir("delegate", seed);

    let mut settings = Settings::new(&dir);
    settings.set_fsync(false);
    let db = Database::new(settings);

    let table = {
        let mut config = TableConfig::new("delegate-table", 1, int_columns(2));
        config.set_persistent(true);
        Table::new(config, Arc::clone(&db)).unwrap()
    };
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    let index_type = {
        let mut index_type = IndexType::new();
        index_type.set_persistent(true).set_unique(true);
        index_type
    };
    let index = table
        .add_index(&session, "delegate-pk", 2, &[0], index_type, true, None)
        .unwrap();

    // the primary key over an integer column delegates to the scan index
    assert!(index.is_delegate());
    assert_eq!(table.main_index_column(), Some(0));
    assert_eq!(table.unique_index().unwrap().to_name(), "delegate-pk");

    // row keys are the primary-key column values now
    let row = table
        .add_row(&session, Row::new(vec![Value::Integer(42), Value::Integer(0)]))
        .unwrap();
    assert_eq!(row.to_key(), 42);
    assert_eq!(index.get_row(&session, 42).unwrap(), row);
    assert_eq!(index.row_count(&session), 1);

    // duplicate primary key is rejected by the scan index
    let res = table.add_row(&session, Row::new(vec![Value::Integer(42), Value::Integer(1)]));
    assert!(matches!(res, Err(Error::DuplicateKey(_, _))), "{:?}", res);
    assert_eq!(table.row_count(&session).unwrap(), 1);

    // a second persistent index does not qualify for delegation
    let index_type = {
        let mut index_type = IndexType::new();
        index_type.set_persistent(true);
        index_type
    };
    let second = table
        .add_index(&session, "delegate-btree", 3, &[1], index_type, true, None)
        .unwrap();
    assert!(!second.is_delegate());
    assert!(second.is_persistent());
    table.unlock(&session);
}

#[test]
fn test_persistent_reopen() {
    let seed: u128 = random();
    println!("test_persistent_reopen seed:{}", seed);
    let dir = make_dir("reopen", seed);

    let mut settings = Settings::new(&dir);
    settings.set_fsync(false);
    let db = Database::new(settings);
    let session = db.new_session();

    let config = {
        let mut config = TableConfig::new("reopen-table", 1, int_columns(1));
        config.set_persistent(true);
        config
    };
    let index_type = {
        let mut index_type = IndexType::new();
        index_type.set_persistent(true);
        index_type
    };

    let mut keys = vec![];
    {
        let table = Table::new(config.clone(), Arc::clone(&db)).unwrap();
        table.lock(&session, true /*exclusive*/, false).unwrap();
        table
            .add_index(&session, "reopen-btree", 2, &[0], index_type, true, None)
            .unwrap();
        for i in 0..100_i64 {
            let row = table
                .add_row(&session, Row::new(vec![Value::Integer(i % 10)]))
                .unwrap();
            keys.push(row.to_key());
        }
        table.unlock(&session);
        db.release_index_name("reopen-btree"); // simulate shutdown
    }

    // reopen the table, replaying the scan journal, and re-attach the
    // btree index the way a startup replay would
    db.set_starting_up(true);
    let table = Table::new(config, Arc::clone(&db)).unwrap();
    assert_eq!(table.row_count(&session).unwrap(), 100);
    for key in keys.iter() {
        assert!(table.get_row(&session, *key).is_ok());
    }

    let index = table
        .add_index(&session, "reopen-btree", 2, &[0], index_type, true, None)
        .unwrap();
    db.set_starting_up(false);

    // journal content made the rebuild unnecessary
    assert!(!index.needs_rebuild());
    assert_eq!(index.row_count(&session), 100);
}

#[test]
fn test_teardown() {
    let seed: u128 = random();
    let dir = make_dir("teardown", seed);

    let mut settings = Settings::new(&dir);
    settings.set_fsync(false);
    let db = Database::new(settings);

    let table = {
        let mut config = TableConfig::new("teardown-table", 1, int_columns(1));
        config.set_persistent(true);
        Table::new(config, Arc::clone(&db)).unwrap()
    };
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    let index_type = {
        let mut index_type = IndexType::new();
        index_type.set_persistent(true);
        index_type
    };
    table
        .add_index(&session, "teardown-btree", 2, &[0], index_type, true, None)
        .unwrap();
    table
        .add_row(&session, Row::new(vec![Value::Integer(1)]))
        .unwrap();

    table.remove_children_and_resources(&session).unwrap();

    // the table is invalid now, and its schema objects are gone
    assert!(!db.is_index_registered("teardown-btree"));
    assert!(matches!(
        table.row_count(&session),
        Err(Error::Invalid(_, _))
    ));
    assert!(matches!(
        table.add_row(&session, Row::new(vec![Value::Integer(2)])),
        Err(Error::Invalid(_, _))
    ));
    assert!(matches!(
        table.lock(&session, true, false),
        Err(Error::Invalid(_, _))
    ));
    assert!(table.indexes().is_empty());
}

#[test]
fn test_session_temp_index() {
    let db = Database::new(Settings::default());
    let table = {
        let mut config = TableConfig::new("temp-table", 1, int_columns(1));
        config.set_temporary(true, false /*global*/);
        Table::new(config, Arc::clone(&db)).unwrap()
    };
    let session = db.new_session();

    let index = table
        .add_index(&session, "temp-idx", 2, &[0], IndexType::new(), true, None)
        .unwrap();

    // attached to the session, not to the schema
    assert!(!db.is_index_registered("temp-idx"));
    let local = session.local_temp_indexes();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].to_name(), index.to_name());
}

#[test]
fn test_prepared_columns_ordering() {
    let db = Database::new(Settings::default());
    let table = {
        let mut config = TableConfig::new("prepared-cols", 1, int_columns(3));
        config.set_primary_columns(vec![2]);
        Table::new(config, Arc::clone(&db)).unwrap()
    };
    let session = db.new_session();

    // duplicate columns collapse, primary-key column floats first
    let index = table
        .add_index(
            &session,
            "prepared-cols-idx",
            2,
            &[0, 2, 0],
            IndexType::new(),
            true,
            None,
        )
        .unwrap();
    assert_eq!(index.as_columns(), &[2, 0]);
}

#[test]
fn test_table_stats() {
    let db = Database::new(Settings::default());
    let table = make_table(&db, "table-stats", 1);
    let session = db.new_session();
    table.lock(&session, true /*exclusive*/, false).unwrap();

    for i in 0..10_i64 {
        table
            .add_row(&session, Row::new(vec![Value::Integer(i)]))
            .unwrap();
    }

    let stats = table.to_stats(&session).unwrap();
    assert_eq!(stats.name, "table-stats");
    assert_eq!(stats.row_count, 10);
    assert_eq!(stats.indexes.len(), 1);
    assert!(stats.footprint > 0);

    let text = stats.to_string();
    assert!(text.contains("table-stats"), "{}", text);
    assert!(text.contains("row_count=10"), "{}", text);
    table.unlock(&session);
}
