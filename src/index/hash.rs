use std::{
    collections::HashMap,
    convert::TryFrom,
    hash::{BuildHasher, Hasher},
    mem::size_of,
    ops::Bound,
    sync::RwLock,
};

use crate::{
    db::{Footprint, Row, Value},
    index::{Cursor, Index, Stats},
    session::Session,
    Error, Result,
};

/// Hasher state using google's city hash to digest column values.
/// Refer [cityhash_rs] for details.
#[derive(Clone, Copy, Default)]
pub struct CityHashState;

impl BuildHasher for CityHashState {
    type Hasher = CityHasher;

    #[inline]
    fn build_hasher(&self) -> CityHasher {
        CityHasher::default()
    }
}

/// Hasher accumulating written bytes, digested through
/// [cityhash_rs::cityhash_110_128] on finish.
#[derive(Clone, Default)]
pub struct CityHasher {
    buf: Vec<u8>,
}

impl Hasher for CityHasher {
    fn finish(&self) -> u64 {
        let digest = cityhash_rs::cityhash_110_128(&self.buf);
        ((digest >> 64) as u64) ^ ((digest & 0xFFFFFFFFFFFFFFFF) as u64)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Hash index, in-memory secondary index over exactly one column.
///
/// Supports equality lookups only. The unique flavor rejects a second
/// row for an already indexed value with
/// [DuplicateKey][crate::Error::DuplicateKey].
pub struct HashIndex {
    name: String,
    columns: Vec<usize>,
    unique: bool,
    inner: RwLock<Inner>,
}

struct Inner {
    buckets: HashMap<Value, Vec<Row>, CityHashState>,
    n_count: usize,
    footprint: isize,
}

impl HashIndex {
    pub fn new(name: &str, column: usize, unique: bool) -> HashIndex {
        let inner = Inner {
            buckets: HashMap::with_hasher(CityHashState),
            n_count: 0,
            footprint: 0,
        };
        HashIndex {
            name: name.to_string(),
            columns: vec![column],
            unique,
            inner: RwLock::new(inner),
        }
    }

    fn project(&self, row: &Row) -> Result<Value> {
        Ok(row.get_value(self.columns[0])?.clone())
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut stats = Stats::new(&self.name);
        stats.n_count = inner.n_count;
        stats.footprint = inner.footprint;
        stats.unique = self.unique;
        stats.hash = true;
        Ok(stats)
    }
}

impl Index for HashIndex {
    fn to_name(&self) -> String {
        self.name.clone()
    }

    fn as_columns(&self) -> &[usize] {
        &self.columns
    }

    fn add(&self, _session: &Session, row: &Row) -> Result<()> {
        let value = self.project(row)?;
        let footprint = row.footprint()? + value.footprint()?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let bucket = inner.buckets.entry(value.clone()).or_insert_with(Vec::new);
        if self.unique && !bucket.is_empty() {
            return err_at!(
                DuplicateKey,
                msg: "value {} in hash index {:?}", value, self.name
            );
        }
        bucket.push(row.clone());
        inner.n_count += 1;
        inner.footprint += footprint;

        Ok(())
    }

    fn remove(&self, _session: &Session, row: &Row) -> Result<()> {
        let value = self.project(row)?;
        let footprint = row.footprint()? + value.footprint()?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let key = row.to_key();
        let bucket = match inner.buckets.get_mut(&value) {
            Some(bucket) => bucket,
            None => {
                return err_at!(
                    KeyNotFound,
                    msg: "value {} missing in hash index {:?}", value, self.name
                )
            }
        };
        match bucket.iter().position(|r| r.to_key() == key) {
            Some(off) => {
                bucket.remove(off);
                if bucket.is_empty() {
                    inner.buckets.remove(&value);
                }
                inner.n_count -= 1;
                inner.footprint -= footprint;
                Ok(())
            }
            None => err_at!(
                KeyNotFound,
                msg: "row {} missing in hash index {:?}", key, self.name
            ),
        }
    }

    fn find(
        &self,
        _session: &Session,
        low: Bound<Vec<Value>>,
        high: Bound<Vec<Value>>,
    ) -> Result<Cursor> {
        let value = match (low, high) {
            (Bound::Included(low), Bound::Included(high)) if low == high && low.len() == 1 => {
                low.into_iter().next().unwrap()
            }
            _ => {
                return err_at!(
                    Unsupported,
                    msg: "hash index {:?} supports equality lookups only", self.name
                )
            }
        };

        let inner = err_at!(Fatal, self.inner.read())?;
        let rows = inner.buckets.get(&value).cloned().unwrap_or_default();
        Ok(Cursor::new(rows))
    }

    fn get_row(&self, _session: &Session, key: u64) -> Result<Row> {
        err_at!(
            Unsupported,
            msg: "get_row {} on hash index {:?}", key, self.name
        )
    }

    fn row_count(&self, _session: &Session) -> u64 {
        match self.inner.read() {
            Ok(inner) => inner.n_count as u64,
            Err(poison) => poison.into_inner().n_count as u64,
        }
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        inner.buckets.clear();
        inner.n_count = 0;
        inner.footprint = 0;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        true
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn is_hash(&self) -> bool {
        true
    }

    fn footprint(&self) -> Result<isize> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let size = err_at!(FailConvert, isize::try_from(size_of::<HashIndex>()))?;
        Ok(size + inner.footprint)
    }
}

#[cfg(test)]
#[path = "hash_test.rs"]
mod hash_test;
