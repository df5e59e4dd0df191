//! Module `config` define configuration for a database and its tables.
//!
//! Configuration is typically constructed via [Settings] builder methods
//! and handed over to [Database][crate::Database]. Deployments keeping
//! their configuration in toml files can deserialize [TomlSettings] and
//! convert it into [Settings].

use serde::Deserialize;

use std::{convert::TryFrom, env, ffi, fmt, result};

use crate::{Error, Result};

/// Default number of row mutations between automatic analyze triggers.
/// ZERO disables automatic analyze.
pub const ANALYZE_AUTO: u64 = 0;

/// Default cap on the number of rows batched in memory while building
/// a new index from the scan index.
pub const MAX_MEMORY_ROWS: usize = 10_000;

/// Default granularity, in milliseconds, at which contended lock waits
/// wake up to re-run deadlock detection.
pub const DEADLOCK_CHECK: u64 = 100;

/// Lock mode, the table locking discipline applied by every table of a
/// database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// No locking. Lock calls only report whether an exclusive holder
    /// exists.
    Off,
    /// Shared grants are not recorded in the shared-session map. This is
    /// sound only because the engine is single-threaded while running in
    /// this mode, an assumption enforced by the embedding layer and not
    /// re-checked here.
    ReadCommitted,
    /// Full table-level locking.
    Table,
    /// Same as [LockMode::Table], additionally probing free memory while
    /// waiting for a contended lock. Vestigial behavior carried over from
    /// legacy runtimes.
    TableGc,
}

impl Default for LockMode {
    fn default() -> LockMode {
        LockMode::Table
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            LockMode::Off => write!(f, "off"),
            LockMode::ReadCommitted => write!(f, "read_committed"),
            LockMode::Table => write!(f, "table"),
            LockMode::TableGc => write!(f, "table_gc"),
        }
    }
}

impl TryFrom<&str> for LockMode {
    type Error = Error;

    fn try_from(s: &str) -> Result<LockMode> {
        match s {
            "off" => Ok(LockMode::Off),
            "read_committed" => Ok(LockMode::ReadCommitted),
            "table" => Ok(LockMode::Table),
            "table_gc" => Ok(LockMode::TableGc),
            _ => err_at!(InvalidInput, msg: "invalid lock_mode {:?}", s),
        }
    }
}

/// Configuration for a [Database][crate::Database] and every table
/// created under it. Settings are read once per table at construction.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Number of row mutations between analyze triggers, ZERO disables
    /// automatic analyze.
    pub analyze_auto: u64,
    /// Table locking discipline.
    pub lock_mode: LockMode,
    /// Cap on the number of rows batched in memory during index rebuild.
    pub max_memory_rows: usize,
    /// Verify the per-index row-count invariant on every mutation.
    pub check: bool,
    /// Coarse wait granularity for contended locks, in milliseconds.
    pub deadlock_check: u64,
    /// Enable fsync for every journal flush of persistent indexes.
    pub fsync: bool,
    /// Directory in which persistent index journals are stored.
    pub dir: ffi::OsString,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            analyze_auto: ANALYZE_AUTO,
            lock_mode: LockMode::default(),
            max_memory_rows: MAX_MEMORY_ROWS,
            check: false,
            deadlock_check: DEADLOCK_CHECK,
            fsync: true,
            dir: env::temp_dir().into_os_string(),
        }
    }
}

impl<'a> arbitrary::Arbitrary<'a> for Settings {
    fn arbitrary(u: &mut arbitrary::Unstructured) -> arbitrary::Result<Self> {
        let lock_mode = *u.choose(&[
            LockMode::Off,
            LockMode::ReadCommitted,
            LockMode::Table,
            LockMode::TableGc,
        ])?;

        let settings = Settings {
            analyze_auto: *u.choose(&[0, 10, 1000])?,
            lock_mode,
            max_memory_rows: *u.choose(&[1, 100, 10_000])?,
            check: u.arbitrary()?,
            deadlock_check: *u.choose(&[1, 10, 100])?,
            fsync: u.arbitrary()?,
            dir: env::temp_dir().into_os_string(),
        };
        Ok(settings)
    }
}

impl Settings {
    pub fn new(dir: &ffi::OsStr) -> Settings {
        Settings {
            dir: dir.to_os_string(),
            ..Settings::default()
        }
    }

    pub fn set_analyze_auto(&mut self, analyze_auto: u64) -> &mut Self {
        self.analyze_auto = analyze_auto;
        self
    }

    pub fn set_lock_mode(&mut self, lock_mode: LockMode) -> &mut Self {
        self.lock_mode = lock_mode;
        self
    }

    pub fn set_max_memory_rows(&mut self, max_memory_rows: usize) -> &mut Self {
        self.max_memory_rows = max_memory_rows;
        self
    }

    pub fn set_check(&mut self, check: bool) -> &mut Self {
        self.check = check;
        self
    }

    pub fn set_deadlock_check(&mut self, deadlock_check: u64) -> &mut Self {
        self.deadlock_check = deadlock_check;
        self
    }

    pub fn set_fsync(&mut self, fsync: bool) -> &mut Self {
        self.fsync = fsync;
        self
    }
}

/// Toml mirror of [Settings], every field optional, missing fields
/// default to [Settings::default].
#[derive(Clone, Deserialize)]
pub struct TomlSettings {
    analyze_auto: Option<u64>,
    lock_mode: Option<String>,
    max_memory_rows: Option<usize>,
    check: Option<bool>,
    deadlock_check: Option<u64>,
    fsync: Option<bool>,
    dir: Option<String>,
}

impl TryFrom<TomlSettings> for Settings {
    type Error = Error;

    fn try_from(ts: TomlSettings) -> Result<Settings> {
        let mut settings = Settings::default();
        if let Some(analyze_auto) = ts.analyze_auto {
            settings.analyze_auto = analyze_auto;
        }
        if let Some(lock_mode) = ts.lock_mode {
            settings.lock_mode = LockMode::try_from(lock_mode.as_str())?;
        }
        if let Some(max_memory_rows) = ts.max_memory_rows {
            settings.max_memory_rows = max_memory_rows;
        }
        if let Some(check) = ts.check {
            settings.check = check;
        }
        if let Some(deadlock_check) = ts.deadlock_check {
            settings.deadlock_check = deadlock_check;
        }
        if let Some(fsync) = ts.fsync {
            settings.fsync = fsync;
        }
        if let Some(dir) = ts.dir {
            settings.dir = ffi::OsString::from(dir);
        }
        Ok(settings)
    }
}

impl Settings {
    /// Parse settings from toml text.
    pub fn from_toml(text: &str) -> Result<Settings> {
        let ts: TomlSettings = err_at!(InvalidInput, toml::from_str(text))?;
        Settings::try_from(ts)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
