//! Module `table` implement the central abstraction of this package.
//!
//! A [Table] stores rows keyed by an opaque 64-bit row identifier,
//! owns an ordered list of indexes, the first of which is always the
//! scan index, and mediates concurrent session access through
//! shared/exclusive table-level locks.
//!
//! Create a table via [TableConfig]:
//!
//! ```ignore
//! let db = Database::new(Settings::default());
//! let config = {
//!     let columns = vec![Column::new("id", ColumnType::Integer)];
//!     let mut config = TableConfig::new("movies", 1, columns);
//!     config.set_persistent(true);
//!     config
//! };
//! let table = Table::new(config, Arc::clone(&db))?;
//!
//! let session = db.new_session();
//! table.lock(&session, true /*exclusive*/, false)?;
//! let row = table.add_row(&session, Row::new(vec![Value::Integer(10)]))?;
//! table.unlock(&session);
//! ```
//!
//! Mutating operations require the session to hold the exclusive lock,
//! shared locks permit concurrent readers. Lock requests are served in
//! FIFO order and blocked requests run deadlock detection over the
//! wait-for edges across tables, refer to [Table::lock].

mod lock;
mod table;

pub use self::table::{Stats, Table};

/// Column type for table columns. `Bytes` columns count as large
/// objects, their backing store is truncated during table teardown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Text,
    Bytes,
}

impl ColumnType {
    #[inline]
    pub fn is_large_object(&self) -> bool {
        matches!(self, ColumnType::Bytes)
    }
}

/// Column descriptor for a table.
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Column {
        Column {
            name: name.to_string(),
            column_type,
        }
    }
}

/// Configuration for [Table] type.
#[derive(Clone)]
pub struct TableConfig {
    /// Uniquely name the table within its database.
    pub name: String,
    /// Table id, referenced by the large-object store.
    pub id: u64,
    /// Ordered column descriptors, rows carry exactly this many values.
    pub columns: Vec<Column>,
    /// Whether the table persists its data and indexes.
    pub persistent: bool,
    /// Whether the table is temporary.
    pub temporary: bool,
    /// Whether a temporary table is visible across sessions.
    pub global_temporary: bool,
    /// Primary-key column positions, orders prepared index columns.
    pub primary_columns: Vec<usize>,
}

impl TableConfig {
    pub fn new(name: &str, id: u64, columns: Vec<Column>) -> TableConfig {
        TableConfig {
            name: name.to_string(),
            id,
            columns,
            persistent: false,
            temporary: false,
            global_temporary: false,
            primary_columns: vec![],
        }
    }

    pub fn set_persistent(&mut self, persistent: bool) -> &mut Self {
        self.persistent = persistent;
        self
    }

    pub fn set_temporary(&mut self, temporary: bool, global: bool) -> &mut Self {
        self.temporary = temporary;
        self.global_temporary = global;
        self
    }

    pub fn set_primary_columns(&mut self, primary_columns: Vec<usize>) -> &mut Self {
        self.primary_columns = primary_columns;
        self
    }
}
