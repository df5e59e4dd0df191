use tracing::{debug, error};

use std::{
    cmp, fmt, result,
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Arc, RwLock, Weak,
    },
};

use crate::{
    database::{Database, Progress},
    db::Row,
    index::{
        self, BtreeIndex, DelegateIndex, HashIndex, Index, IndexType, ScanIndex, TreeIndex,
    },
    session::Session,
    table::{
        lock::{self, TableLock},
        Column, ColumnType, TableConfig,
    },
    Error, Result,
};

/// Table type, stores rows keyed by an opaque 64-bit row identifier and
/// maintains every index in lockstep with the scan index.
///
/// Tables are created via [TableConfig] and shared as `Arc<Table>`
/// across sessions. Mutating operations require the calling session to
/// hold the exclusive table lock, acquired via [Table::lock], this
/// pre-condition is enforced by callers and not re-checked per
/// operation.
///
/// Row mutations fan out to every index in deterministic order, adds
/// run left-to-right so a unique-constraint violation surfaces in the
/// last-added index, removes run right-to-left so the scan index is
/// touched last and a row stays readable while secondary indexes are
/// updated. A partial failure unwinds already-applied index edits
/// before re-raising. Failure of the unwind itself leaves the table
/// internally inconsistent and is surfaced as [Error::Fatal], there is
/// no recovery procedure beyond that.
pub struct Table {
    name: String,
    id: u64,
    columns: Vec<Column>,
    persistent: bool,
    temporary: bool,
    global_temporary: bool,
    primary_columns: Vec<usize>,
    contains_large_object: bool,
    check: bool,
    max_memory_rows: usize,

    db: Arc<Database>,
    scan: Arc<ScanIndex>,
    tlock: TableLock,
    last_modification_id: AtomicU64,
    self_ref: Weak<Table>,
    inner: RwLock<Inner>,
}

struct Inner {
    indexes: Vec<Arc<dyn Index>>,
    row_count: u64,
    changes_since_analyze: u64,
    next_analyze: u64,
    valid: bool,
}

impl Table {
    /// Create a table under `db`. Persistent tables open their scan
    /// index from the configured directory, replaying rows from an
    /// earlier incarnation.
    pub fn new(config: TableConfig, db: Arc<Database>) -> Result<Arc<Table>> {
        let settings = db.as_settings();

        let scan_name = format!("{}-scan", config.name);
        let scan = if config.persistent {
            Arc::new(ScanIndex::open(&scan_name, &settings.dir, settings.fsync)?)
        } else {
            Arc::new(ScanIndex::new_mem(&scan_name))
        };

        let contains_large_object = config
            .columns
            .iter()
            .any(|col| col.column_type.is_large_object());

        let inner = Inner {
            indexes: vec![Arc::clone(&scan) as Arc<dyn Index>],
            row_count: scan.len() as u64,
            changes_since_analyze: 0,
            next_analyze: settings.analyze_auto,
            valid: true,
        };

        let (check, max_memory_rows) = (settings.check, settings.max_memory_rows);
        let table = Arc::new_cyclic(|self_ref| Table {
            name: config.name,
            id: config.id,
            columns: config.columns,
            persistent: config.persistent,
            temporary: config.temporary,
            global_temporary: config.global_temporary,
            primary_columns: config.primary_columns,
            contains_large_object,
            check,
            max_memory_rows,

            db,
            scan,
            tlock: TableLock::new(),
            last_modification_id: AtomicU64::new(0),
            self_ref: self_ref.clone(),
            inner: RwLock::new(inner),
        });
        Ok(table)
    }

    /// Return name of this table.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return id of this table.
    #[inline]
    pub fn to_id(&self) -> u64 {
        self.id
    }

    /// Return the column descriptors.
    #[inline]
    pub fn as_columns(&self) -> &[Column] {
        &self.columns
    }

    /// Return the modification-id of the latest mutation on this table.
    pub fn to_last_modification_id(&self) -> u64 {
        self.last_modification_id.load(SeqCst)
    }

    pub(crate) fn as_database(&self) -> &Arc<Database> {
        &self.db
    }

    pub(crate) fn as_lock(&self) -> &TableLock {
        &self.tlock
    }

    fn to_self(&self) -> Result<Arc<Table>> {
        match self.self_ref.upgrade() {
            Some(table) => Ok(table),
            None => err_at!(Fatal, msg: "table {:?} dropped", self.name),
        }
    }

    fn set_modified(&self) {
        let mod_id = self.db.next_modification_id();
        self.last_modification_id.store(mod_id, SeqCst);
    }

    fn check_valid(&self) -> Result<()> {
        let valid = match self.inner.read() {
            Ok(inner) => inner.valid,
            Err(poison) => poison.into_inner().valid,
        };
        match valid {
            true => Ok(()),
            false => err_at!(Invalid, msg: "table {:?} already destroyed", self.name),
        }
    }
}

impl Table {
    /// Acquire the table lock for `session`, shared or exclusive.
    /// Return true when the session already held a sufficient lock.
    ///
    /// Blocked requests queue up FIFO and sleep on the database monitor.
    /// A request that would close a wait-for cycle across tables fails
    /// with [Error::Deadlock], listing every session along the cycle. A
    /// request outliving the session's lock timeout fails with
    /// [Error::LockTimeout]. Either failure leaves table state
    /// untouched.
    ///
    /// Under [LockMode::ReadCommitted][crate::LockMode::ReadCommitted]
    /// shared grants are not recorded unless `force` asks for a real
    /// lock. Under [LockMode::Off][crate::LockMode::Off] nothing is
    /// locked and the return value only reports whether some session
    /// holds this table exclusively.
    pub fn lock(&self, session: &Arc<Session>, exclusive: bool, force: bool) -> Result<bool> {
        self.check_valid()?;
        let table = self.to_self()?;
        lock::lock(&table, session, exclusive, force)
    }

    /// Release whatever lock `session` holds on this table. Never
    /// fails, unlocking an unlocked table is a no-op.
    pub fn unlock(&self, session: &Session) {
        lock::unlock(self, session)
    }

    /// Return whether some session holds this table exclusively.
    pub fn is_locked_exclusively(&self) -> bool {
        self.tlock.is_locked_exclusively()
    }

    /// Return whether `session` holds this table exclusively.
    pub fn is_locked_exclusively_by(&self, session: &Session) -> bool {
        self.tlock.is_locked_exclusively_by(session)
    }
}

impl Table {
    /// Add `row` into this table and every index, left-to-right. The
    /// scan index assigns the row key, the keyed row is returned.
    ///
    /// Pre-condition: `session` holds the exclusive lock on this table.
    pub fn add_row(&self, session: &Session, row: Row) -> Result<Row> {
        self.check_valid()?;
        self.set_modified();

        let row = self.scan.assign_key(row)?;

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let mut failure: Option<(usize, Error)> = None;
        for (off, idx) in inner.indexes.iter().enumerate() {
            if let Err(err) = idx.add(session, &row) {
                failure = Some((off, err));
                break;
            }
            if let Err(err) = self.check_row_count(session, idx, inner.row_count + 1) {
                failure = Some((off, err));
                break;
            }
        }

        match failure {
            None => {
                inner.row_count += 1;
                self.analyze_if_required(session, inner);
                Ok(row)
            }
            Some((off, err)) => {
                for idx in inner.indexes[..off].iter().rev() {
                    if let Err(rerr) = idx.remove(session, &row) {
                        // the table is now internally inconsistent
                        error!(
                            table = self.name.as_str(),
                            index = idx.to_name().as_str(),
                            "rollback of add_row failed: {}",
                            rerr
                        );
                        return Err(rerr);
                    }
                }
                Err(err)
            }
        }
    }

    /// Remove `row` from this table and every index, right-to-left so
    /// the scan index is touched last.
    ///
    /// Pre-condition: `session` holds the exclusive lock on this table.
    pub fn remove_row(&self, session: &Session, row: &Row) -> Result<()> {
        self.check_valid()?;
        self.set_modified();

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        let n = inner.indexes.len();
        let mut failure: Option<(usize, Error)> = None;
        for off in (0..n).rev() {
            let idx = &inner.indexes[off];
            if let Err(err) = idx.remove(session, row) {
                failure = Some((off, err));
                break;
            }
            if let Err(err) = self.check_row_count(session, idx, inner.row_count.wrapping_sub(1)) {
                failure = Some((off, err));
                break;
            }
        }

        match failure {
            None => {
                inner.row_count -= 1;
                self.analyze_if_required(session, inner);
                Ok(())
            }
            Some((off, err)) => {
                for idx in inner.indexes[off + 1..].iter() {
                    if let Err(rerr) = idx.add(session, row) {
                        // the table is now internally inconsistent
                        error!(
                            table = self.name.as_str(),
                            index = idx.to_name().as_str(),
                            "rollback of remove_row failed: {}",
                            rerr
                        );
                        return Err(rerr);
                    }
                }
                Err(err)
            }
        }
    }

    /// Remove all rows from this table and every index, right-to-left.
    /// Return the pre-truncate row count. There is no rollback for a
    /// partial truncate, a mid-way failure invalidates the table.
    ///
    /// Pre-condition: `session` holds the exclusive lock on this table.
    pub fn truncate(&self, session: &Session) -> Result<u64> {
        self.check_valid()?;
        self.set_modified();

        let mut inner = err_at!(Fatal, self.inner.write())?;
        let inner = &mut *inner;

        for idx in inner.indexes.iter().rev() {
            if let Err(err) = idx.truncate(session) {
                inner.valid = false;
                return Err(err);
            }
        }
        let count = inner.row_count;
        inner.row_count = 0;
        inner.changes_since_analyze = 0;
        Ok(count)
    }

    /// Return the row stored under `key`.
    pub fn get_row(&self, session: &Session, key: u64) -> Result<Row> {
        self.check_valid()?;
        self.scan.get_row(session, key)
    }

    /// Return the exact row count of this table.
    pub fn row_count(&self, _session: &Session) -> Result<u64> {
        self.check_valid()?;
        let count = match self.inner.read() {
            Ok(inner) => inner.row_count,
            Err(poison) => poison.into_inner().row_count,
        };
        Ok(count)
    }

    /// Return the approximate row count, cheap and without validity
    /// checks.
    pub fn row_count_approximation(&self, _session: &Session) -> u64 {
        self.scan.len() as u64
    }

    // Row-count invariant, every non-delegate index carries exactly the
    // table's row count. Verified per-mutation when Settings.check is
    // enabled, a mismatch is fatal.
    fn check_row_count(&self, session: &Session, idx: &Arc<dyn Index>, want: u64) -> Result<()> {
        if !self.check || idx.is_delegate() {
            return Ok(());
        }
        let have = idx.row_count(session);
        if have != want {
            err_at!(
                Fatal,
                msg: "index {:?} row-count {} expected {}", idx.to_name(), have, want
            )
        } else {
            Ok(())
        }
    }

    // Automatic statistics refresh. Every mutation bumps the change
    // counter, crossing the threshold marks the table for analyze on the
    // session and doubles the threshold, capped at the integer range.
    fn analyze_if_required(&self, session: &Session, inner: &mut Inner) {
        if inner.next_analyze == 0 {
            return;
        }
        inner.changes_since_analyze += 1;
        if inner.changes_since_analyze > inner.next_analyze {
            inner.changes_since_analyze = 0;
            if let Some(doubled) = inner.next_analyze.checked_mul(2) {
                inner.next_analyze = doubled;
            }
            session.mark_table_for_analyze(&self.name);
        }
    }
}

impl Table {
    /// Build a new index over `cols` and append it to this table's
    /// index list.
    ///
    /// Variant selection: spatial indexes are unsupported. On a
    /// persistent table with a persistent index type, a unique
    /// single-integer-column index over an empty scan index becomes a
    /// [DelegateIndex] claiming the scan index's main column, otherwise
    /// a [BtreeIndex]. Non-persistent hashed types become a [HashIndex]
    /// over exactly one column, everything else a [TreeIndex].
    ///
    /// A non-empty table rebuilds the new index from the scan index in
    /// batches capped by `max_memory_rows`, reporting progress to the
    /// database listener under the label `"<table>:<index>"`. A rebuild
    /// failure releases the partially built storage and the reserved
    /// index name, then re-raises.
    ///
    /// With `create` false, or on a table local to this session, the
    /// index is attached to the session instead of the schema.
    pub fn add_index(
        &self,
        session: &Session,
        name: &str,
        id: u64,
        cols: &[usize],
        index_type: IndexType,
        create: bool,
        comment: Option<String>,
    ) -> Result<Arc<dyn Index>> {
        self.check_valid()?;

        if index_type.spatial {
            return err_at!(
                Unsupported,
                msg: "spatial index {:?} on table {:?}", name, self.name
            );
        }
        let cols = index::prepare_columns(cols, &self.primary_columns);
        if cols.is_empty() {
            return err_at!(InvalidInput, msg: "index {:?} without columns", name);
        }
        for col in cols.iter() {
            if *col >= self.columns.len() {
                return err_at!(
                    InvalidInput,
                    msg: "index {:?} column {} out of range", name, col
                );
            }
        }
        if index_type.hash && cols.len() != 1 {
            return err_at!(
                Unsupported,
                msg: "hash index {:?} needs exactly one column", name
            );
        }

        // tables local to a session skip meta locking
        let _meta = if !(self.temporary && !self.global_temporary) {
            Some(self.db.lock_meta())
        } else {
            None
        };

        self.db.reserve_index_name(name)?;

        let settings = self.db.as_settings();
        let index: Arc<dyn Index> = if self.persistent && index_type.persistent {
            match self.main_index_candidate(&cols, &index_type) {
                Some(col) => {
                    self.scan.set_main_column(col);
                    Arc::new(DelegateIndex::new(name, col, Arc::clone(&self.scan)))
                }
                None => {
                    let btree = BtreeIndex::open(
                        name,
                        &settings.dir,
                        cols.clone(),
                        index_type.unique,
                        settings.fsync,
                    );
                    match btree {
                        Ok(btree) => Arc::new(btree),
                        Err(err) => {
                            self.db.release_index_name(name);
                            return Err(err);
                        }
                    }
                }
            }
        } else if index_type.hash {
            Arc::new(HashIndex::new(name, cols[0], index_type.unique))
        } else {
            Arc::new(TreeIndex::new(name, cols.clone(), index_type.unique))
        };

        if index.needs_rebuild() && self.row_count_approximation(session) > 0 {
            if let Err(err) = self.rebuild_index(session, name, &index) {
                self.db.release_index_name(name);
                return Err(err);
            }
        }

        {
            let mut inner = err_at!(Fatal, self.inner.write())?;
            inner.indexes.push(Arc::clone(&index));
        }

        if (self.temporary && !self.global_temporary) || !create {
            // not a schema object, attach to the session instead
            self.db.release_index_name(name);
            session.add_local_temp_index(Arc::clone(&index));
        }

        debug!(
            table = self.name.as_str(),
            index = name,
            id,
            comment = comment.as_deref().unwrap_or(""),
            "index created"
        );
        self.set_modified();

        Ok(index)
    }

    // Delegation to the scan index's row key, chosen only when not
    // replaying startup, the scan index is empty, no main column is
    // claimed yet and the request is a unique non-hash index over a
    // single integer column.
    fn main_index_candidate(&self, cols: &[usize], index_type: &IndexType) -> Option<usize> {
        if self.db.is_starting_up() {
            return None;
        }
        if !index_type.unique || index_type.hash {
            return None;
        }
        if !self.scan.is_empty() || self.scan.to_main_column().is_some() {
            return None;
        }
        match cols {
            [col] if self.columns[*col].column_type == ColumnType::Integer => Some(*col),
            _ => None,
        }
    }

    fn rebuild_index(&self, session: &Session, name: &str, index: &Arc<dyn Index>) -> Result<()> {
        let total = self.row_count_approximation(session) as usize;
        let cap = cmp::max(1, cmp::min(total, self.max_memory_rows));
        let label = format!("{}:{}", self.name, name);

        let mut after: Option<u64> = None;
        let mut done = 0;
        let res = loop {
            let batch = match self.scan.read_batch(after, cap) {
                Ok(batch) => batch,
                Err(err) => break Err(err),
            };
            if batch.is_empty() {
                break Ok(());
            }
            after = batch.last().map(|row| row.to_key());

            let mut flush = Ok(());
            for row in batch.iter() {
                if let Err(err) = index.add(session, row) {
                    flush = Err(err);
                    break;
                }
            }
            if let Err(err) = flush {
                break Err(err);
            }
            done += batch.len();
            self.db
                .set_progress(Progress::CreateIndex, &label, done, total);
        };

        match res {
            Ok(()) => Ok(()),
            Err(err) => {
                // release whatever the partial build accumulated
                match index.drop_storage() {
                    Ok(()) => Err(err),
                    Err(cerr) => {
                        error!(
                            table = self.name.as_str(),
                            index = name,
                            "cleanup after failed rebuild failed: {}",
                            cerr
                        );
                        Err(cerr)
                    }
                }
            }
        }
    }
}

impl Table {
    /// Return this table's indexes, the scan index first.
    pub fn indexes(&self) -> Vec<Arc<dyn Index>> {
        match self.inner.read() {
            Ok(inner) => inner.indexes.clone(),
            Err(poison) => poison.into_inner().indexes.clone(),
        }
    }

    /// Return the scan index of this table.
    pub fn scan_index(&self) -> Arc<ScanIndex> {
        Arc::clone(&self.scan)
    }

    /// Return the first unique index, if any.
    pub fn unique_index(&self) -> Option<Arc<dyn Index>> {
        self.indexes().into_iter().find(|idx| idx.is_unique())
    }

    /// Return the main-index column claimed on the scan index, if any.
    pub fn main_index_column(&self) -> Option<usize> {
        self.scan.to_main_column()
    }

    /// Destroy this table, removing children and resources in order.
    ///
    /// Large-object storage is truncated first, its data is permanently
    /// gone. Secondary indexes drop their storage in reverse creation
    /// order, then the scan index. Lock state is cleared and the table
    /// invalidated unconditionally, even when a step fails, subsequent
    /// calls fail with [Error::Invalid].
    pub fn remove_children_and_resources(&self, session: &Session) -> Result<()> {
        let res = self.do_remove_children(session);

        self.tlock.clear();
        {
            let mut inner = match self.inner.write() {
                Ok(inner) => inner,
                Err(poison) => poison.into_inner(),
            };
            inner.valid = false;
        }
        if let Err(err) = &res {
            error!(table = self.name.as_str(), "teardown failed: {}", err);
        }
        res
    }

    fn do_remove_children(&self, session: &Session) -> Result<()> {
        if self.contains_large_object {
            // large-object data is gone for good, rollback cannot
            // restore it
            self.truncate(session)?;
            self.db.as_lob_store().remove_all_for_table(self.id)?;
        }

        loop {
            let index = {
                let mut inner = err_at!(Fatal, self.inner.write())?;
                match inner.indexes.len() {
                    n if n > 1 => inner.indexes.pop(),
                    _ => None,
                }
            };
            match index {
                Some(index) => {
                    index.drop_storage()?;
                    self.db.release_index_name(&index.to_name());
                }
                None => break,
            }
        }

        {
            let mut inner = err_at!(Fatal, self.inner.write())?;
            inner.indexes.clear();
            inner.row_count = 0;
        }
        self.scan.drop_storage()?;

        Ok(())
    }

    pub fn to_stats(&self, session: &Session) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;

        let mut indexes = vec![];
        let mut footprint = 0;
        for idx in inner.indexes.iter() {
            let mut stats = index::Stats::new(&idx.to_name());
            stats.n_count = idx.row_count(session) as usize;
            stats.footprint = idx.footprint()?;
            stats.persistent = idx.is_persistent();
            stats.unique = idx.is_unique();
            stats.hash = idx.is_hash();
            footprint += stats.footprint;
            indexes.push(stats);
        }

        let stats = Stats {
            name: self.name.clone(),
            row_count: inner.row_count,
            last_modification_id: self.to_last_modification_id(),
            changes_since_analyze: inner.changes_since_analyze,
            next_analyze: inner.next_analyze,
            footprint,
            indexes,
        };
        Ok(stats)
    }
}

/// Statistic type, for [Table].
pub struct Stats {
    pub name: String,
    pub row_count: u64,
    pub last_modification_id: u64,
    pub changes_since_analyze: u64,
    pub next_analyze: u64,
    pub footprint: isize,
    pub indexes: Vec<index::Stats>,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        writeln!(f, "table.name = {}", self.name)?;
        writeln!(
            f,
            "table = {{ row_count={}, last_modification_id={} }}",
            self.row_count, self.last_modification_id
        )?;
        writeln!(
            f,
            "table = {{ changes_since_analyze={}, next_analyze={}, footprint={} }}",
            self.changes_since_analyze, self.next_analyze, self.footprint
        )?;
        for stats in self.indexes.iter() {
            write!(f, "{}", stats)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod table_test;
