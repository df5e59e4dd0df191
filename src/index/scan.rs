use std::{
    cmp,
    collections::BTreeMap,
    ffi,
    ops::Bound,
    sync::{Mutex, RwLock},
};

use crate::{
    db::{Footprint, Row, Value},
    index::{
        journal::{Journal, RowOp},
        Cursor, Index, Stats,
    },
    session::Session,
    Error, Result,
};

/// Scan index, the authoritative storage for all rows of a table and
/// the issuer of row keys.
///
/// The scan index is always the first entry in a table's index list,
/// removing it is equivalent to destroying the table. Rows are held in
/// key order, the full-scan cursor supplies the ordered base for online
/// index builds.
///
/// When a *main-index column* is claimed, refer to
/// [Table::add_index][crate::Table::add_index], the row key is no longer
/// generated but taken from that column's integer value, which lets a
/// delegate index forward primary-key lookups here without storage of
/// its own.
pub struct ScanIndex {
    name: String,
    columns: Vec<usize>, // empty, the scan index covers the whole row
    persistent: bool,
    main_column: Mutex<Option<usize>>,
    inner: RwLock<Inner>,
}

struct Inner {
    rows: BTreeMap<u64, Row>,
    next_key: u64,
    footprint: isize,
    journal: Option<Journal>,
}

impl ScanIndex {
    /// Create a volatile scan index.
    pub fn new_mem(name: &str) -> ScanIndex {
        let inner = Inner {
            rows: BTreeMap::new(),
            next_key: 1,
            footprint: 0,
            journal: None,
        };
        ScanIndex {
            name: name.to_string(),
            columns: vec![],
            persistent: false,
            main_column: Mutex::new(None),
            inner: RwLock::new(inner),
        }
    }

    /// Open a durable scan index under `dir`, replaying the journal if
    /// one exists for `name`.
    pub fn open(name: &str, dir: &ffi::OsStr, fsync: bool) -> Result<ScanIndex> {
        let (journal, ops) = Journal::load(dir, name, fsync)?;

        let mut inner = Inner {
            rows: BTreeMap::new(),
            next_key: 1,
            footprint: 0,
            journal: None,
        };
        for op in ops.into_iter() {
            match op {
                RowOp::Add { row } => {
                    let key = row.to_key();
                    inner.footprint += row.footprint()?;
                    inner.next_key = cmp::max(inner.next_key, key.saturating_add(1));
                    inner.rows.insert(key, row);
                }
                RowOp::Remove { key } => {
                    if let Some(row) = inner.rows.remove(&key) {
                        inner.footprint -= row.footprint()?;
                    }
                }
                RowOp::Truncate { .. } => {
                    inner.rows.clear();
                    inner.footprint = 0;
                }
            }
        }
        inner.journal = Some(journal);

        let index = ScanIndex {
            name: name.to_string(),
            columns: vec![],
            persistent: true,
            main_column: Mutex::new(None),
            inner: RwLock::new(inner),
        };
        Ok(index)
    }

    /// Claim `col` as the main-index column, subsequent rows take their
    /// key from this column's integer value.
    pub(crate) fn set_main_column(&self, col: usize) {
        *lock_or_inner(&self.main_column) = Some(col);
    }

    /// Return the claimed main-index column, if any.
    pub fn to_main_column(&self) -> Option<usize> {
        *lock_or_inner(&self.main_column)
    }

    /// Return number of rows in this index.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.rows.len(),
            Err(poison) => poison.into_inner().rows.len(),
        }
    }

    /// Return whether index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Assign the row key. Without a main-index column keys are generated
    // monotonically, otherwise the key is the main column's integer value
    // and uniqueness is enforced by `add`.
    pub(crate) fn assign_key(&self, mut row: Row) -> Result<Row> {
        let main_column = self.to_main_column();
        let mut inner = err_at!(Fatal, self.inner.write())?;

        let key = match main_column {
            Some(col) => match row.get_value(col)? {
                Value::Integer(value) => *value as u64,
                value => {
                    let value = value.clone();
                    err_at!(InvalidInput, msg: "main column value {} not an integer", value)?
                }
            },
            None => inner.next_key,
        };
        inner.next_key = cmp::max(inner.next_key, key.saturating_add(1));
        row.set_key(key);
        Ok(row)
    }

    // Key-range read, used by delegate indexes to answer lookups on the
    // main-index column.
    pub(crate) fn range_by_key(&self, low: Bound<u64>, high: Bound<u64>) -> Result<Vec<Row>> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let rows = inner
            .rows
            .range((low, high))
            .map(|(_, row)| row.clone())
            .collect();
        Ok(rows)
    }

    // Page-wise fetch in key order, for memory-capped index rebuilds.
    pub(crate) fn read_batch(&self, after: Option<u64>, limit: usize) -> Result<Vec<Row>> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let range = match after {
            Some(key) => (Bound::Excluded(key), Bound::Unbounded),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        let batch = inner
            .rows
            .range(range)
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect();
        Ok(batch)
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut stats = Stats::new(&self.name);
        stats.n_count = inner.rows.len();
        stats.footprint = inner.footprint;
        stats.persistent = self.persistent;
        Ok(stats)
    }
}

impl Index for ScanIndex {
    fn to_name(&self) -> String {
        self.name.clone()
    }

    fn as_columns(&self) -> &[usize] {
        &self.columns
    }

    fn add(&self, _session: &Session, row: &Row) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let key = row.to_key();
        if inner.rows.contains_key(&key) {
            return err_at!(DuplicateKey, msg: "row {} in scan index {:?}", key, self.name);
        }

        let footprint = row.footprint()?;
        inner.rows.insert(key, row.clone());
        if let Some(journal) = &mut inner.journal {
            let op = RowOp::Add { row: row.clone() };
            if let Err(err) = journal.add_op(&op) {
                inner.rows.remove(&key);
                return Err(err);
            }
        }
        inner.footprint += footprint;

        Ok(())
    }

    fn remove(&self, _session: &Session, row: &Row) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let key = row.to_key();
        match inner.rows.remove(&key) {
            Some(old) => {
                if let Some(journal) = &mut inner.journal {
                    let op = RowOp::Remove { key };
                    if let Err(err) = journal.add_op(&op) {
                        inner.rows.insert(key, old);
                        return Err(err);
                    }
                }
                inner.footprint -= old.footprint()?;
                Ok(())
            }
            None => {
                err_at!(KeyNotFound, msg: "row {} missing in scan index {:?}", key, self.name)
            }
        }
    }

    fn find(
        &self,
        _session: &Session,
        _low: Bound<Vec<Value>>,
        _high: Bound<Vec<Value>>,
    ) -> Result<Cursor> {
        // the scan index ignores the bounds, full scan in key order
        let inner = err_at!(Fatal, self.inner.read())?;
        Ok(Cursor::new(inner.rows.values().cloned().collect()))
    }

    fn get_row(&self, _session: &Session, key: u64) -> Result<Row> {
        let inner = err_at!(Fatal, self.inner.read())?;
        match inner.rows.get(&key) {
            Some(row) => Ok(row.clone()),
            None => {
                err_at!(KeyNotFound, msg: "row {} missing in scan index {:?}", key, self.name)
            }
        }
    }

    fn row_count(&self, _session: &Session) -> u64 {
        match self.inner.read() {
            Ok(inner) => inner.rows.len() as u64,
            Err(poison) => poison.into_inner().rows.len() as u64,
        }
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let count = inner.rows.len() as u64;
        if let Some(journal) = &mut inner.journal {
            journal.add_op(&RowOp::Truncate { count })?;
        }
        inner.rows.clear();
        inner.footprint = 0;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        false
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn drop_storage(&self) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        if let Some(journal) = &mut inner.journal {
            journal.purge()?;
        }
        Ok(())
    }

    fn footprint(&self) -> Result<isize> {
        let inner = err_at!(Fatal, self.inner.read())?;
        Ok(inner.footprint)
    }
}

fn lock_or_inner<'a, T>(mu: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mu.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[cfg(test)]
#[path = "scan_test.rs"]
mod scan_test;
