//! Module `session` define the per-connection context.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Arc, Mutex,
    },
    time,
};

use crate::{index::Index, table::Table};

/// Default lock timeout for fresh sessions, in milliseconds.
pub const LOCK_TIMEOUT: u64 = 1000;

/// Session type, the per-connection context.
///
/// Every table operation identifies itself with a session. The session
/// records the lock timeout, the single outgoing wait-for edge while the
/// session is blocked on a table lock, tables marked for statistics
/// refresh and indexes that are local to this session.
///
/// Sessions are created via [Database::new_session][crate::Database::new_session]
/// and handed around as `Arc<Session>`, one thread per session.
pub struct Session {
    id: u64,
    name: String,
    lock_timeout: AtomicU64, // milliseconds
    wait_for: Mutex<Option<Arc<Table>>>,
    pending_analyze: Mutex<Vec<String>>,
    temp_indexes: Mutex<Vec<Arc<dyn Index>>>,
}

impl Session {
    pub(crate) fn new(id: u64) -> Session {
        Session {
            id,
            name: format!("session-{}", id),
            lock_timeout: AtomicU64::new(LOCK_TIMEOUT),
            wait_for: Mutex::new(None),
            pending_analyze: Mutex::new(Vec::default()),
            temp_indexes: Mutex::new(Vec::default()),
        }
    }

    /// Return the unique id for this session.
    #[inline]
    pub fn to_id(&self) -> u64 {
        self.id
    }

    /// Return the human readable name for this session, used in lock
    /// diagnostics.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return the lock timeout for this session.
    pub fn to_lock_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.lock_timeout.load(SeqCst))
    }

    /// Update the lock timeout for this session, in milliseconds.
    pub fn set_lock_timeout(&self, timeout: u64) -> &Self {
        self.lock_timeout.store(timeout, SeqCst);
        self
    }

    /// Drain the list of tables marked for statistics refresh on behalf
    /// of this session.
    pub fn take_pending_analyze(&self) -> Vec<String> {
        let mut pending = match self.pending_analyze.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        pending.drain(..).collect()
    }

    /// Return indexes attached to this session, created on tables local
    /// to this session.
    pub fn local_temp_indexes(&self) -> Vec<Arc<dyn Index>> {
        let temp_indexes = match self.temp_indexes.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        temp_indexes.clone()
    }

    pub(crate) fn add_local_temp_index(&self, index: Arc<dyn Index>) {
        let mut temp_indexes = match self.temp_indexes.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        temp_indexes.push(index);
    }

    pub(crate) fn mark_table_for_analyze(&self, table: &str) {
        let mut pending = match self.pending_analyze.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        if !pending.iter().any(|name| name == table) {
            pending.push(table.to_string());
        }
    }

    // Wait-for edge insertion for deadlock detection. A session waits on
    // at most one table at any time.
    pub(crate) fn set_wait_for(&self, table: Option<Arc<Table>>) {
        let mut wait_for = match self.wait_for.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        *wait_for = table;
    }

    pub(crate) fn to_wait_for(&self) -> Option<Arc<Table>> {
        let wait_for = match self.wait_for.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        wait_for.as_ref().map(Arc::clone)
    }
}
