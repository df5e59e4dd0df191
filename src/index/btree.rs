use std::{
    collections::{BTreeMap, HashMap},
    convert::TryFrom,
    ffi,
    mem::size_of,
    ops::Bound,
    sync::RwLock,
};

use crate::{
    db::{Footprint, Row, Value},
    index::{
        self,
        journal::{Journal, RowOp},
        tree::entry_bounds,
        Cursor, Index, Stats,
    },
    session::Session,
    Error, Result,
};

/// Btree index, journal-backed ordered secondary index over one or more
/// columns.
///
/// Entry layout matches [TreeIndex][crate::index::TreeIndex], projected
/// column values with the row key as tie-breaker. Every mutation is
/// appended to the index's journal and replayed while opening the index,
/// an index opened with existing content does not need a rebuild.
pub struct BtreeIndex {
    name: String,
    columns: Vec<usize>,
    unique: bool,
    rebuild: bool,
    inner: RwLock<Inner>,
}

struct Inner {
    entries: BTreeMap<(Vec<Value>, u64), Row>,
    footprint: isize,
    journal: Journal,
}

impl BtreeIndex {
    /// Open a btree index under `dir`, replaying the journal if one
    /// exists for `name`.
    pub fn open(
        name: &str,
        dir: &ffi::OsStr,
        columns: Vec<usize>,
        unique: bool,
        fsync: bool,
    ) -> Result<BtreeIndex> {
        let (journal, ops) = Journal::load(dir, name, fsync)?;
        let rebuild = journal.is_fresh();

        let mut inner = Inner {
            entries: BTreeMap::new(),
            footprint: 0,
            journal,
        };
        // replay, track projected values by row key for removes
        let mut projected: HashMap<u64, Vec<Value>> = HashMap::new();
        for op in ops.into_iter() {
            match op {
                RowOp::Add { row } => {
                    let values = index::project(&row, &columns)?;
                    inner.footprint += row.footprint()?;
                    projected.insert(row.to_key(), values.clone());
                    inner.entries.insert((values, row.to_key()), row);
                }
                RowOp::Remove { key } => {
                    if let Some(values) = projected.remove(&key) {
                        if let Some(row) = inner.entries.remove(&(values, key)) {
                            inner.footprint -= row.footprint()?;
                        }
                    }
                }
                RowOp::Truncate { .. } => {
                    inner.entries.clear();
                    inner.footprint = 0;
                    projected.clear();
                }
            }
        }

        let btree = BtreeIndex {
            name: name.to_string(),
            columns,
            unique,
            rebuild,
            inner: RwLock::new(inner),
        };
        Ok(btree)
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut stats = Stats::new(&self.name);
        stats.n_count = inner.entries.len();
        stats.footprint = inner.footprint;
        stats.persistent = true;
        stats.unique = self.unique;
        Ok(stats)
    }
}

impl Index for BtreeIndex {
    fn to_name(&self) -> String {
        self.name.clone()
    }

    fn as_columns(&self) -> &[usize] {
        &self.columns
    }

    fn add(&self, _session: &Session, row: &Row) -> Result<()> {
        let values = index::project(row, &self.columns)?;
        let footprint = row.footprint()?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        if self.unique {
            let bounds = entry_bounds(
                Bound::Included(values.clone()),
                Bound::Included(values.clone()),
            );
            if inner.entries.range(bounds).next().is_some() {
                return err_at!(
                    DuplicateKey,
                    msg: "values {:?} in btree index {:?}", values, self.name
                );
            }
        }

        let entry_key = (values, row.to_key());
        inner.entries.insert(entry_key.clone(), row.clone());
        let op = RowOp::Add { row: row.clone() };
        if let Err(err) = inner.journal.add_op(&op) {
            inner.entries.remove(&entry_key);
            return Err(err);
        }
        inner.footprint += footprint;

        Ok(())
    }

    fn remove(&self, _session: &Session, row: &Row) -> Result<()> {
        let values = index::project(row, &self.columns)?;
        let footprint = row.footprint()?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let entry_key = (values, row.to_key());
        match inner.entries.remove(&entry_key) {
            Some(old) => {
                let op = RowOp::Remove { key: row.to_key() };
                if let Err(err) = inner.journal.add_op(&op) {
                    inner.entries.insert(entry_key, old);
                    return Err(err);
                }
                inner.footprint -= footprint;
                Ok(())
            }
            None => err_at!(
                KeyNotFound,
                msg: "row {} missing in btree index {:?}", row.to_key(), self.name
            ),
        }
    }

    fn find(
        &self,
        _session: &Session,
        low: Bound<Vec<Value>>,
        high: Bound<Vec<Value>>,
    ) -> Result<Cursor> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let bounds = entry_bounds(low, high);
        let rows = inner.entries.range(bounds).map(|(_, row)| row.clone()).collect();
        Ok(Cursor::new(rows))
    }

    fn get_row(&self, _session: &Session, key: u64) -> Result<Row> {
        err_at!(
            Unsupported,
            msg: "get_row {} on btree index {:?}", key, self.name
        )
    }

    fn row_count(&self, _session: &Session) -> u64 {
        match self.inner.read() {
            Ok(inner) => inner.entries.len() as u64,
            Err(poison) => poison.into_inner().entries.len() as u64,
        }
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let count = inner.entries.len() as u64;
        inner.journal.add_op(&RowOp::Truncate { count })?;
        inner.entries.clear();
        inner.footprint = 0;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.rebuild
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn drop_storage(&self) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        inner.journal.purge()
    }

    fn footprint(&self) -> Result<isize> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let size = err_at!(FailConvert, isize::try_from(size_of::<BtreeIndex>()))?;
        Ok(size + inner.footprint)
    }
}

#[cfg(test)]
#[path = "btree_test.rs"]
mod btree_test;
