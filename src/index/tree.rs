use std::{
    collections::BTreeMap,
    convert::TryFrom,
    mem::size_of,
    ops::Bound,
    sync::RwLock,
};

use crate::{
    db::{Footprint, Row, Value},
    index::{self, Cursor, Index, Stats},
    session::Session,
    Error, Result,
};

/// Tree index, in-memory ordered secondary index over one or more
/// columns.
///
/// Entries are keyed by the projected column values with the row key as
/// tie-breaker, rows projecting to the same values sort by insertion
/// key.
pub struct TreeIndex {
    name: String,
    columns: Vec<usize>,
    unique: bool,
    inner: RwLock<Inner>,
}

struct Inner {
    entries: BTreeMap<(Vec<Value>, u64), Row>,
    footprint: isize,
}

impl TreeIndex {
    pub fn new(name: &str, columns: Vec<usize>, unique: bool) -> TreeIndex {
        let inner = Inner {
            entries: BTreeMap::new(),
            footprint: 0,
        };
        TreeIndex {
            name: name.to_string(),
            columns,
            unique,
            inner: RwLock::new(inner),
        }
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut stats = Stats::new(&self.name);
        stats.n_count = inner.entries.len();
        stats.footprint = inner.footprint;
        stats.unique = self.unique;
        Ok(stats)
    }
}

// Translate projected-key bounds into entry bounds, the row-key
// tie-breaker makes `Excluded` skip, and `Included` cover, every row
// projecting to the bounding values.
pub(crate) fn entry_bounds(
    low: Bound<Vec<Value>>,
    high: Bound<Vec<Value>>,
) -> (Bound<(Vec<Value>, u64)>, Bound<(Vec<Value>, u64)>) {
    let low = match low {
        Bound::Included(values) => Bound::Included((values, 0)),
        Bound::Excluded(values) => Bound::Excluded((values, u64::MAX)),
        Bound::Unbounded => Bound::Unbounded,
    };
    let high = match high {
        Bound::Included(values) => Bound::Included((values, u64::MAX)),
        Bound::Excluded(values) => Bound::Excluded((values, 0)),
        Bound::Unbounded => Bound::Unbounded,
    };
    (low, high)
}

impl Index for TreeIndex {
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
                    msg: "values {:?} in tree index {:?}", values, self.name
                );
            }
        }

        inner.entries.insert((values, row.to_key()), row.clone());
        inner.footprint += footprint;
        Ok(())
    }

    fn remove(&self, _session: &Session, row: &Row) -> Result<()> {
        let values = index::project(row, &self.columns)?;
        let footprint = row.footprint()?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        match inner.entries.remove(&(values, row.to_key())) {
            Some(_) => {
                inner.footprint -= footprint;
                Ok(())
            }
            None => err_at!(
                KeyNotFound,
                msg: "row {} missing in tree index {:?}", row.to_key(), self.name
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
            msg: "get_row {} on tree index {:?}", key, self.name
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
        inner.entries.clear();
        inner.footprint = 0;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        true
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn footprint(&self) -> Result<isize> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let size = err_at!(FailConvert, isize::try_from(size_of::<TreeIndex>()))?;
        Ok(size + inner.footprint)
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
