use std::{mem::size_of, ops::Bound, sync::Arc};

use crate::{
    db::{Row, Value},
    index::{Cursor, Index, ScanIndex, Stats},
    session::Session,
    Error, Result,
};

/// Delegate index, forwards lookups for a single integer column to the
/// scan index's row key.
///
/// Created when the requested index is the effective primary key over
/// the scan index's main-index column, refer to
/// [Table::add_index][crate::Table::add_index]. The delegate holds no
/// storage of its own, adds and removes are satisfied by the scan index,
/// and the per-index row-count invariant is waived for it.
pub struct DelegateIndex {
    name: String,
    columns: Vec<usize>,
    scan: Arc<ScanIndex>,
}

impl DelegateIndex {
    pub(crate) fn new(name: &str, column: usize, scan: Arc<ScanIndex>) -> DelegateIndex {
        DelegateIndex {
            name: name.to_string(),
            columns: vec![column],
            scan,
        }
    }

    fn to_key_bound(&self, bound: Bound<Vec<Value>>) -> Result<Bound<u64>> {
        let bound = match bound {
            Bound::Included(values) => Bound::Included(self.to_key(values)?),
            Bound::Excluded(values) => Bound::Excluded(self.to_key(values)?),
            Bound::Unbounded => Bound::Unbounded,
        };
        Ok(bound)
    }

    fn to_key(&self, values: Vec<Value>) -> Result<u64> {
        match values.as_slice() {
            [Value::Integer(value)] => Ok(*value as u64),
            _ => err_at!(
                InvalidInput,
                msg: "delegate index {:?} expects a single integer value", self.name
            ),
        }
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let mut stats = Stats::new(&self.name);
        stats.n_count = 0; // no independent storage
        stats.footprint = 0;
        stats.persistent = true;
        stats.unique = true;
        Ok(stats)
    }
}

impl Index for DelegateIndex {
    fn to_name(&self) -> String {
        self.name.clone()
    }

    fn as_columns(&self) -> &[usize] {
        &self.columns
    }

    // Row data lives in the scan index, which has already stored the row
    // under the delegated column's value by the time this is called.
    fn add(&self, _session: &Session, _row: &Row) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _session: &Session, _row: &Row) -> Result<()> {
        Ok(())
    }

    fn find(
        &self,
        _session: &Session,
        low: Bound<Vec<Value>>,
        high: Bound<Vec<Value>>,
    ) -> Result<Cursor> {
        let low = self.to_key_bound(low)?;
        let high = self.to_key_bound(high)?;
        Ok(Cursor::new(self.scan.range_by_key(low, high)?))
    }

    fn get_row(&self, session: &Session, key: u64) -> Result<Row> {
        self.scan.get_row(session, key)
    }

    fn row_count(&self, session: &Session) -> u64 {
        self.scan.row_count(session)
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        false
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn is_delegate(&self) -> bool {
        true
    }

    fn footprint(&self) -> Result<isize> {
        Ok(size_of::<DelegateIndex>() as isize)
    }
}
