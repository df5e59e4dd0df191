//! Module `database` implement the registry shared by tables and sessions.
//!
//! [Database] issue monotonic modification-ids, hold the configured
//! [Settings], serve as the process-wide monitor for lock waits, keep the
//! schema registry of index names and fan out progress callbacks for
//! long running operations.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
        Arc, Condvar, Mutex, MutexGuard,
    },
};

use crate::{config::Settings, session::Session, Error, Result};

/// Progress states reported to [EventListener].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    CreateIndex,
}

/// Trait to observe long running storage operations.
///
/// Register a listener via [Database::set_listener]. Index builds report
/// their label as `"<table>:<index>"` along with a `(current, total)`
/// row-count pair.
pub trait EventListener: Send + Sync {
    fn set_progress(&self, state: Progress, label: &str, current: usize, total: usize);
}

/// Null-object for [EventListener], ignores all callbacks.
pub struct NoListener;

impl EventListener for NoListener {
    fn set_progress(&self, _state: Progress, _label: &str, _current: usize, _total: usize) {
    }
}

/// Trait to the large-object store backing `Bytes` columns.
pub trait LobStore: Send + Sync {
    /// Remove every large object stored for table `table_id`. Removed
    /// data is permanently gone, rollback cannot restore it.
    fn remove_all_for_table(&self, table_id: u64) -> Result<()>;
}

/// Null-object for [LobStore], for databases without out-of-row storage.
pub struct NoLobs;

impl LobStore for NoLobs {
    fn remove_all_for_table(&self, _table_id: u64) -> Result<()> {
        Ok(())
    }
}

// Process-wide wait/notify primitive. Table lock-state transitions happen
// while holding `mu`, blocked lock requests sleep on `cv`.
pub(crate) struct Monitor {
    pub(crate) mu: Mutex<()>,
    pub(crate) cv: Condvar,
}

impl Monitor {
    fn new() -> Monitor {
        Monitor {
            mu: Mutex::new(()),
            cv: Condvar::new(),
        }
    }
}

/// Database type, the registry shared by every table and session of one
/// database instance.
pub struct Database {
    settings: Settings,
    mod_id: AtomicU64,
    session_id: AtomicU64,
    starting_up: AtomicBool,
    monitor: Monitor,
    meta: Mutex<()>,
    listener: Mutex<Arc<dyn EventListener>>,
    lobs: Mutex<Arc<dyn LobStore>>,
    schema: Mutex<HashSet<String>>,
}

impl Database {
    pub fn new(settings: Settings) -> Arc<Database> {
        let db = Database {
            settings,
            mod_id: AtomicU64::new(0),
            session_id: AtomicU64::new(0),
            starting_up: AtomicBool::new(false),
            monitor: Monitor::new(),
            meta: Mutex::new(()),
            listener: Mutex::new(Arc::new(NoListener)),
            lobs: Mutex::new(Arc::new(NoLobs)),
            schema: Mutex::new(HashSet::default()),
        };
        Arc::new(db)
    }

    /// Return the configured settings, read once per table at table
    /// construction.
    #[inline]
    pub fn as_settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a new session on this database.
    pub fn new_session(&self) -> Arc<Session> {
        let id = self.session_id.fetch_add(1, SeqCst) + 1;
        Arc::new(Session::new(id))
    }

    /// Reserve and return the next modification-id. Strictly monotonic
    /// across the database instance.
    pub fn next_modification_id(&self) -> u64 {
        self.mod_id.fetch_add(1, SeqCst) + 1
    }

    /// Return the latest modification-id issued.
    pub fn to_modification_id(&self) -> u64 {
        self.mod_id.load(SeqCst)
    }

    /// Flag whether the database is replaying its startup log. Index
    /// delegation to the scan index is disabled while starting up.
    pub fn set_starting_up(&self, yes: bool) -> &Self {
        self.starting_up.store(yes, SeqCst);
        self
    }

    pub fn is_starting_up(&self) -> bool {
        self.starting_up.load(SeqCst)
    }

    /// Register a listener for progress callbacks.
    pub fn set_listener(&self, listener: Arc<dyn EventListener>) -> &Self {
        *lock_or_inner(&self.listener) = listener;
        self
    }

    /// Plug in a large-object store for tables holding `Bytes` columns.
    pub fn set_lob_store(&self, lobs: Arc<dyn LobStore>) -> &Self {
        *lock_or_inner(&self.lobs) = lobs;
        self
    }

    pub(crate) fn set_progress(&self, state: Progress, label: &str, current: usize, total: usize) {
        let listener = Arc::clone(&*lock_or_inner(&self.listener));
        listener.set_progress(state, label, current, total);
    }

    pub(crate) fn as_lob_store(&self) -> Arc<dyn LobStore> {
        Arc::clone(&*lock_or_inner(&self.lobs))
    }

    pub(crate) fn as_monitor(&self) -> &Monitor {
        &self.monitor
    }

    // Meta locking while manipulating schema objects. Tables local to a
    // session skip this.
    pub(crate) fn lock_meta(&self) -> MutexGuard<()> {
        lock_or_inner(&self.meta)
    }
}

impl Database {
    /// Reserve `name` in the schema registry. Index names are unique
    /// across the database.
    pub fn reserve_index_name(&self, name: &str) -> Result<()> {
        let mut schema = lock_or_inner(&self.schema);
        if schema.contains(name) {
            err_at!(InvalidInput, msg: "index {:?} already exists", name)
        } else {
            schema.insert(name.to_string());
            Ok(())
        }
    }

    /// Release a previously reserved index name.
    pub fn release_index_name(&self, name: &str) {
        lock_or_inner(&self.schema).remove(name);
    }

    /// Return whether `name` is a registered schema object.
    pub fn is_index_registered(&self, name: &str) -> bool {
        lock_or_inner(&self.schema).contains(name)
    }
}

fn lock_or_inner<T>(mu: &Mutex<T>) -> MutexGuard<T> {
    match mu.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}
