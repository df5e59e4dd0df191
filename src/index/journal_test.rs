use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, fs, path};

use super::*;
use crate::db::Value;

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

#[test]
fn test_journal_replay() {
    let seed: u128 = random();
    println!("test_journal_replay seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed as u64);

    let dir = make_dir("journal-replay", seed);
    let name = "replay-index";

    let mut ops: Vec<RowOp> = vec![];
    for key in 1..=100_u64 {
        let op = match rng.gen::<u8>() % 3 {
            0 => RowOp::Add {
                row: {
                    let mut row = Row::new(vec![Value::Integer(rng.gen())]);
                    row.set_key(key);
                    row
                },
            },
            1 => RowOp::Remove { key },
            _ => RowOp::Truncate { count: key },
        };
        ops.push(op);
    }

    {
        let mut journal = Journal::start(&dir, name, false).unwrap();
        assert!(journal.is_fresh());
        for (i, op) in ops.iter().enumerate() {
            let seqno = journal.add_op(op).unwrap();
            assert_eq!(seqno, (i as u64) + 1);
        }
    }

    let (journal, replayed) = Journal::load(&dir, name, false).unwrap();
    assert!(!journal.is_fresh());
    assert_eq!(replayed, ops);

    // appends continue from the replayed seqno
    let mut journal = journal;
    let seqno = journal.add_op(&RowOp::Remove { key: 1 }).unwrap();
    assert_eq!(seqno, 101);

    journal.purge().unwrap();
    assert!(!path::Path::new(&journal.to_location()).is_file());
}

#[test]
fn test_journal_load_missing() {
    let seed: u128 = random();
    let dir = make_dir("journal-missing", seed);

    let (journal, ops) = Journal::load(&dir, "no-such-index", true).unwrap();
    assert!(journal.is_fresh());
    assert!(ops.is_empty());
}

#[test]
fn test_row_op_bytes() {
    let mut row = Row::new(vec![Value::Text("hello".to_string()), Value::Null]);
    row.set_key(11);
    let op = RowOp::Add { row };

    let buf = op.to_bytes().unwrap();
    assert_eq!(RowOp::from_bytes(&buf).unwrap(), op);
}
