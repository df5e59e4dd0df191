//! Module `index` define the index capability set and its variants.
//!
//! A [Table][crate::Table] treats all of its indexes polymorphically
//! through the [Index] trait. Variants are constructed by the table from
//! [IndexType] flags, never supplied from outside:
//!
//! * [ScanIndex], authoritative storage for all rows of a table, assigns
//!   the 64-bit row key, in-memory or journal-backed.
//! * [BtreeIndex], ordered secondary index, journal-backed.
//! * [TreeIndex], in-memory ordered secondary index.
//! * [HashIndex], in-memory single-column hash index, unique or
//!   non-unique.
//! * [DelegateIndex], forwards lookups for a single integer column to
//!   the scan index's row key, holds no storage of its own.
//!
//! Persistent variants keep their authoritative state in memory and
//! append every mutation to a [journal][Journal], replayed while opening
//! the index.

mod btree;
mod delegate;
mod hash;
mod journal;
mod scan;
mod tree;

pub use btree::BtreeIndex;
pub use delegate::DelegateIndex;
pub use hash::HashIndex;
pub use journal::{Journal, RowOp};
pub use scan::ScanIndex;
pub use tree::TreeIndex;

use std::{fmt, ops::Bound, result, vec};

use crate::{
    db::{Row, Value},
    session::Session,
    Result,
};

/// Index type-flags requested by DDL while creating an index.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexType {
    pub persistent: bool,
    pub unique: bool,
    pub hash: bool,
    pub spatial: bool,
}

impl IndexType {
    pub fn new() -> IndexType {
        IndexType::default()
    }

    pub fn set_persistent(&mut self, persistent: bool) -> &mut Self {
        self.persistent = persistent;
        self
    }

    pub fn set_unique(&mut self, unique: bool) -> &mut Self {
        self.unique = unique;
        self
    }

    pub fn set_hash(&mut self, hash: bool) -> &mut Self {
        self.hash = hash;
        self
    }

    pub fn set_spatial(&mut self, spatial: bool) -> &mut Self {
        self.spatial = spatial;
        self
    }
}

/// Cursor over rows returned by [Index::find], in index order for the
/// ordered variants.
pub struct Cursor {
    rows: vec::IntoIter<Row>,
}

impl Cursor {
    pub(crate) fn new(rows: Vec<Row>) -> Cursor {
        Cursor {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }
}

/// Trait define the capability set for table indexes.
///
/// An index is an ordered or hashed structure over a subset of a table's
/// columns. All mutations originate from the owning table, which holds
/// the exclusive table lock while calling `add`/`remove`/`truncate`, so
/// implementations may assume exclusive access to their own storage for
/// the duration of a call.
pub trait Index: Send + Sync {
    /// Return name of the index, unique across the database.
    fn to_name(&self) -> String;

    /// Return the column positions covered by this index. Empty for the
    /// scan index, which covers the whole row.
    fn as_columns(&self) -> &[usize];

    /// Add `row` into index. The row carries its final key.
    fn add(&self, session: &Session, row: &Row) -> Result<()>;

    /// Remove `row` from index.
    fn remove(&self, session: &Session, row: &Row) -> Result<()>;

    /// Return rows whose projected key falls within `low .. high`. Hash
    /// indexes support equality bounds only, the scan index ignores the
    /// bounds and cursors all rows in key order.
    fn find(&self, session: &Session, low: Bound<Vec<Value>>, high: Bound<Vec<Value>>)
        -> Result<Cursor>;

    /// Return the row stored under `key`. Supported by the scan and
    /// delegate variants, secondary indexes fail with `Unsupported`.
    fn get_row(&self, session: &Session, key: u64) -> Result<Row>;

    /// Return the number of rows in this index.
    fn row_count(&self, session: &Session) -> u64;

    /// Remove all rows from this index.
    fn truncate(&self, session: &Session) -> Result<()>;

    /// Return whether this index must be rebuilt from the scan index
    /// after creation.
    fn needs_rebuild(&self) -> bool;

    fn is_unique(&self) -> bool;

    fn is_hash(&self) -> bool {
        false
    }

    fn is_spatial(&self) -> bool {
        false
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn is_delegate(&self) -> bool {
        false
    }

    /// Release backing storage held by this index. Called while removing
    /// the index from its table, and to clean up a partially built index
    /// whose rebuild failed.
    fn drop_storage(&self) -> Result<()> {
        Ok(())
    }

    /// Approximate memory footprint of this index.
    fn footprint(&self) -> Result<isize>;
}

/// Statistic type, for index variants.
#[derive(Default)]
pub struct Stats {
    pub name: String,
    pub n_count: usize,
    pub footprint: isize,
    pub persistent: bool,
    pub unique: bool,
    pub hash: bool,
}

impl Stats {
    pub(crate) fn new(name: &str) -> Stats {
        Stats {
            name: name.to_string(),
            ..Stats::default()
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        writeln!(f, "index.name = {}", self.name)?;
        writeln!(
            f,
            "index = {{ n_count={}, footprint={} }}",
            self.n_count, self.footprint
        )?;
        writeln!(
            f,
            "index = {{ persistent={}, unique={}, hash={} }}",
            self.persistent, self.unique, self.hash
        )
    }
}

// Project the index key out of `row` for the given column positions.
pub(crate) fn project(row: &Row, columns: &[usize]) -> Result<Vec<Value>> {
    let mut key = Vec::with_capacity(columns.len());
    for col in columns.iter() {
        key.push(row.get_value(*col)?.clone());
    }
    Ok(key)
}

/// Prepare a DDL column list: duplicates are eliminated preserving first
/// occurrence and primary-key columns are stably ordered first. The
/// transformation is deterministic and idempotent.
pub fn prepare_columns(cols: &[usize], primary: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(cols.len());
    for col in cols.iter().copied().filter(|col| primary.contains(col)) {
        if !out.contains(&col) {
            out.push(col);
        }
    }
    for col in cols.iter().copied() {
        if !out.contains(&col) {
            out.push(col);
        }
    }
    out
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
