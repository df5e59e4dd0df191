use std::fmt;

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(Fatal, msg: "fatal failure")
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fs::read(file_path))
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fs::read(file_path), "reading file {:?}", file_path)
/// ```
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, identifying the file:line where the
/// error originated, and a message describing the failure.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Internal failure, typically a broken invariant. A table that
    /// surfaces this error during mutation rollback must be treated as
    /// inconsistent by higher layers.
    Fatal(String, String),
    /// Operation on a table that was already destroyed.
    Invalid(String, String),
    /// Invalid argument supplied by the caller.
    InvalidInput(String, String),
    /// Requested capability is not supported by this index/table variant.
    Unsupported(String, String),
    /// Row key, or projected index key, not found.
    KeyNotFound(String, String),
    /// Unique constraint violation.
    DuplicateKey(String, String),
    /// Lock request aborted because it would close a wait-for cycle.
    Deadlock(String, String),
    /// Lock request timed out.
    LockTimeout(String, String),
    IOError(String, String),
    FailCbor(String, String),
    FailConvert(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            Invalid(p, msg) => write!(f, "{} Invalid: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            Unsupported(p, msg) => write!(f, "{} Unsupported: {}", p, msg),
            KeyNotFound(p, msg) => write!(f, "{} KeyNotFound: {}", p, msg),
            DuplicateKey(p, msg) => write!(f, "{} DuplicateKey: {}", p, msg),
            Deadlock(p, msg) => write!(f, "{} Deadlock: {}", p, msg),
            LockTimeout(p, msg) => write!(f, "{} LockTimeout: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            FailCbor(p, msg) => write!(f, "{} FailCbor: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
        }
    }
}

impl std::error::Error for Error {}
