use arbitrary::Arbitrary;
use cbordata::Cborize;

use std::{convert::TryFrom, fmt, mem::size_of, result};

use crate::{db::Footprint, Error, Result};

/// This value must change only when the shape of Value type changes. High
/// 16-bits identify the type and lower 16-bits identify the version.
const VALUE_VER: u32 = 0x00010001;

/// Value type, a single column's value within a [Row][crate::Row].
///
/// Values are dynamically typed and totally ordered. Order across
/// variants follows declaration order, `Null` sorts before `Boolean`,
/// `Boolean` before `Integer`, `Integer` before `Text` and `Text` before
/// `Bytes`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Cborize, Arbitrary)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(val) => write!(f, "{}", val),
            Value::Integer(val) => write!(f, "{}", val),
            Value::Text(val) => write!(f, "{:?}", val),
            Value::Bytes(val) => write!(f, "bytes<{}>", val.len()),
        }
    }
}

impl Footprint for Value {
    fn footprint(&self) -> Result<isize> {
        let size = size_of::<Value>()
            + match self {
                Value::Text(val) => val.capacity(),
                Value::Bytes(val) => val.capacity(),
                _ => 0,
            };
        err_at!(FailConvert, isize::try_from(size))
    }
}

impl Value {
    pub const ID: u32 = VALUE_VER;

    /// Return whether this value counts as a large object. Tables holding
    /// large-object columns get their backing store truncated during
    /// teardown.
    #[inline]
    pub fn is_large_object(&self) -> bool {
        matches!(self, Value::Bytes(_))
    }

    /// Return whether this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
