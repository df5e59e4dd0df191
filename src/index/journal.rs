use cbordata::{Cbor, Cborize, FromCbor, IntoCbor};
use fs2::FileExt;

use std::{
    convert::TryFrom,
    ffi, fs,
    io::Write,
    path,
};

use crate::{db::Row, Error, Result};

// A journal is uniquely located by specifying the (`dir`, `name`) pair,
// file name is `{name}-journal-{num}.dat`. Rotation is not required at
// this layer, `num` stays at 1.
const JOURNAL_NUM: usize = 1;

/// Single op-entry in the journal for a persistent index.
///
/// The actual operation is serialized and opaque to the journal, refer
/// to [RowOp] for the operations persisted by index implementations.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Entry {
    pub seqno: u64,
    pub op: Vec<u8>,
}

impl Entry {
    const ID: u32 = 0x0;

    #[inline]
    fn new(seqno: u64, op: Vec<u8>) -> Entry {
        Entry { seqno, op }
    }
}

/// Row operation persisted by indexes into their journal.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum RowOp {
    Add { row: Row },
    Remove { key: u64 },
    Truncate { count: u64 },
}

impl RowOp {
    const ID: u32 = 0x1;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let cbor = err_at!(FailCbor, self.clone().into_cbor())?;
        let mut buf: Vec<u8> = vec![];
        err_at!(FailCbor, cbor.encode(&mut buf))?;
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<RowOp> {
        let (cbor, _) = err_at!(FailCbor, Cbor::decode(&mut &buf[..]))?;
        err_at!(FailCbor, RowOp::from_cbor(cbor))
    }
}

/// Journal type, append-only durability for persistent indexes.
///
/// Authoritative index state lives in memory, every mutation is appended
/// here as a CBOR-framed [Entry] and the full sequence is replayed while
/// opening the index. The journal file is created lazily on first
/// append and held under an exclusive file-system lock.
pub struct Journal {
    name: String,
    location: ffi::OsString, // dir/{name}-journal-{num}.dat
    fsync: bool,
    seqno: u64,
    file: Option<fs::File>,
    fresh: bool,
}

impl Journal {
    /// Start a fresh journal under directory `dir`. An existing journal
    /// file for (`dir`, `name`) shall be removed.
    pub fn start(dir: &ffi::OsStr, name: &str, fsync: bool) -> Result<Journal> {
        let location = make_location(dir, name);
        fs::remove_file(&location).ok(); // cleanup a single journal file

        let journal = Journal {
            name: name.to_string(),
            location,
            fsync,
            seqno: 0,
            file: None,
            fresh: true,
        };
        Ok(journal)
    }

    /// Load the journal for (`dir`, `name`), replaying its entries.
    /// Starts fresh when no journal file exists.
    pub fn load(dir: &ffi::OsStr, name: &str, fsync: bool) -> Result<(Journal, Vec<RowOp>)> {
        let location = make_location(dir, name);

        if !path::Path::new(&location).is_file() {
            let journal = Journal::start(dir, name, fsync)?;
            return Ok((journal, vec![]));
        }

        let mut file = {
            let mut opts = fs::OpenOptions::new();
            err_at!(IOError, opts.read(true).append(true).open(&location))?
        };
        err_at!(IOError, file.try_lock_exclusive(), "journal {:?}", location)?;

        let len = err_at!(IOError, file.metadata())?.len();
        let (mut ops, mut seqno, mut fpos) = (vec![], 0, 0_u64);
        while fpos < len {
            let (val, n) = err_at!(FailCbor, Cbor::decode(&mut file))?;
            let entry = err_at!(FailCbor, Entry::from_cbor(val))?;
            seqno = entry.seqno;
            ops.push(RowOp::from_bytes(&entry.op)?);
            fpos += err_at!(FailConvert, u64::try_from(n))?;
        }

        let fresh = ops.is_empty();
        let journal = Journal {
            name: name.to_string(),
            location,
            fsync,
            seqno,
            file: Some(file),
            fresh,
        };
        Ok((journal, ops))
    }

    /// Append `op` into the journal, fsync-ing when enabled. Return the
    /// op's seqno.
    pub fn add_op(&mut self, op: &RowOp) -> Result<u64> {
        self.seqno += 1;
        let entry = Entry::new(self.seqno, op.to_bytes()?);

        let buf = {
            let cbor = err_at!(FailCbor, entry.into_cbor())?;
            let mut buf: Vec<u8> = vec![];
            err_at!(FailCbor, cbor.encode(&mut buf))?;
            buf
        };

        if self.file.is_none() {
            let file = {
                let mut opts = fs::OpenOptions::new();
                let opts = opts.append(true).create_new(true);
                err_at!(IOError, opts.open(&self.location))?
            };
            err_at!(IOError, file.try_lock_exclusive(), "journal {:?}", self.location)?;
            self.file = Some(file);
        }
        let file = self.file.as_mut().unwrap();

        err_at!(IOError, file.write_all(&buf))?;
        if self.fsync {
            err_at!(IOError, file.sync_all())?;
        }

        Ok(self.seqno)
    }

    /// Return whether this journal was started fresh, as opposed to
    /// loaded with existing content.
    #[inline]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Return name of this journal.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.location.clone()
    }

    /// Remove the journal file from the file-system.
    pub fn purge(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.unlock().ok();
            err_at!(IOError, fs::remove_file(&self.location))?;
        } else if path::Path::new(&self.location).is_file() {
            err_at!(IOError, fs::remove_file(&self.location))?;
        }
        Ok(())
    }
}

fn make_location(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let file = format!("{}-journal-{}.dat", name, JOURNAL_NUM);
    let location: path::PathBuf = [dir, ffi::OsStr::new(&file)].iter().collect();
    location.into_os_string()
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
