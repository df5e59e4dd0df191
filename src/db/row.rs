use cbordata::Cborize;

use std::{convert::TryFrom, fmt, mem::size_of, result};

use crate::{
    db::{Footprint, Value},
    Error, Result,
};

/// This value must change only when the shape of Row type changes. High
/// 16-bits identify the type and lower 16-bits identify the version.
const ROW_VER: u32 = 0x00020001;

/// Row type, an immutable-after-insert tuple of column values along with
/// the 64-bit row key assigned by the scan index during add.
///
/// `Tombstone` rows carry only the key and exist as removed-row
/// sentinels inside index internals. Reading column values off a
/// tombstone fails with [Error::Fatal].
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Row {
    Data { key: u64, values: Vec<Value> },
    Tombstone { key: u64 },
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Row::Data { key, values } => {
                write!(f, "row<key:{},cols:{}>", key, values.len())
            }
            Row::Tombstone { key } => write!(f, "row<key:{},removed>", key),
        }
    }
}

impl Footprint for Row {
    fn footprint(&self) -> Result<isize> {
        let mut size = err_at!(FailConvert, isize::try_from(size_of::<Row>()))?;
        if let Row::Data { values, .. } = self {
            for value in values.iter() {
                size += value.footprint()?;
            }
        }
        Ok(size)
    }
}

impl Row {
    pub const ID: u32 = ROW_VER;

    /// Start a new row from column values. The row key shall be assigned
    /// by the scan index while adding the row into its table.
    pub fn new(values: Vec<Value>) -> Row {
        Row::Data { key: 0, values }
    }

    /// Start a new removed-row sentinel carrying only the key.
    pub fn new_tombstone(key: u64) -> Row {
        Row::Tombstone { key }
    }

    /// Return the 64-bit row key.
    #[inline]
    pub fn to_key(&self) -> u64 {
        match self {
            Row::Data { key, .. } => *key,
            Row::Tombstone { key } => *key,
        }
    }

    pub(crate) fn set_key(&mut self, new_key: u64) {
        match self {
            Row::Data { key, .. } => *key = new_key,
            Row::Tombstone { key } => *key = new_key,
        }
    }

    /// Return whether this row is a removed-row sentinel.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Row::Tombstone { .. })
    }

    /// Return the number of columns, ZERO for tombstones.
    #[inline]
    pub fn column_count(&self) -> usize {
        match self {
            Row::Data { values, .. } => values.len(),
            Row::Tombstone { .. } => 0,
        }
    }

    /// Return the full tuple of column values.
    pub fn as_values(&self) -> Result<&[Value]> {
        match self {
            Row::Data { values, .. } => Ok(values),
            Row::Tombstone { key } => {
                err_at!(Fatal, msg: "column read on removed row {}", key)
            }
        }
    }

    /// Return the value at column position `col`.
    pub fn get_value(&self, col: usize) -> Result<&Value> {
        match self {
            Row::Data { values, .. } => match values.get(col) {
                Some(value) => Ok(value),
                None => err_at!(Fatal, msg: "column {} out of range", col),
            },
            Row::Tombstone { key } => {
                err_at!(Fatal, msg: "column read on removed row {}", key)
            }
        }
    }

    /// Return whether any column holds a large object.
    pub fn has_large_object(&self) -> bool {
        match self {
            Row::Data { values, .. } => values.iter().any(Value::is_large_object),
            Row::Tombstone { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "row_test.rs"]
mod row_test;
