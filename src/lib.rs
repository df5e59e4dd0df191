//! Reltab implement the storage core of a relational database. The
//! central abstraction is a [Table] that stores rows keyed by an opaque
//! 64-bit row identifier, maintains one or more secondary indexes over
//! projected columns, mediates concurrent session access through
//! shared/exclusive table-level locks and supports atomic row
//! insertion/deletion across all indexes, with rollback on partial
//! failure.
//!
//! Every table owns an ordered list of indexes, the first of which is
//! always the *scan index*, the authoritative storage for all rows and
//! the issuer of row keys. Secondary indexes are maintained in lockstep
//! with the scan index and come in several variants, refer to the
//! [index] module. A new index can be built online from the existing
//! scan index, batched through a configurable in-memory row cap.
//!
//! Concurrency model is one thread per [Session]. Mutating operations
//! on a table are serialized by the per-table exclusive lock, shared
//! locks permit concurrent readers. The [Database] value serves as the
//! process-wide monitor for condition waits and notification, and issues
//! monotonic modification-ids used by higher layers for change
//! detection.

use std::result;

#[macro_use]
mod error;

pub mod config;
mod database;
pub mod db;
pub mod index;
mod session;
pub mod table;

pub use crate::config::{LockMode, Settings};
pub use crate::database::{Database, EventListener, LobStore, Progress};
pub use crate::database::{NoListener, NoLobs};
pub use crate::db::{Footprint, Row, Value};
pub use crate::error::Error;
pub use crate::index::{Index, IndexType};
pub use crate::session::Session;
pub use crate::table::Table;

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;
