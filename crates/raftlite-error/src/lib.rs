//! Central error taxonomy for the replicated storage plane (spec §7).
//!
//! Every subsystem — VFS, replication hook, leader loop, registry — returns
//! [`Error`]. The mapping to a SQLite result code lives in one place
//! ([`Error::to_sqlite_extended_rc`]) instead of being re-derived ad hoc at
//! each call site.

use std::ffi::c_int;

/// Result alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// SQLite primary and extended result codes this crate produces. Values
/// match `sqlite3.h` exactly so they can be handed back across the VFS FFI
/// boundary unchanged.
pub mod sqlite_rc {
    use std::ffi::c_int;

    pub const OK: c_int = 0;
    pub const ERROR: c_int = 1;
    pub const BUSY: c_int = 5;
    pub const NOMEM: c_int = 7;
    pub const IOERR: c_int = 10;
    pub const CORRUPT: c_int = 11;
    pub const NOTFOUND: c_int = 12;
    pub const CANTOPEN: c_int = 14;

    pub const IOERR_READ: c_int = IOERR | (1 << 8);
    pub const IOERR_SHORT_READ: c_int = IOERR | (2 << 8);
    pub const IOERR_WRITE: c_int = IOERR | (3 << 8);
    pub const IOERR_TRUNCATE: c_int = IOERR | (6 << 8);
    pub const IOERR_DELETE: c_int = IOERR | (10 << 8);
}

/// The error taxonomy of spec §7.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Allocation failure.
    #[error("allocation failed")]
    ResourceExhausted,

    /// Malformed header, bad page size, or a page-size mismatch between the
    /// database and its paired WAL file.
    #[error("invalid on-disk format: {reason}")]
    FormatInvalid { reason: String },

    /// A read or write landed at an offset illegal for the file's tag.
    #[error("illegal I/O boundary: {reason}")]
    IoBoundary { reason: String },

    /// The writer slot is held, an SHM lock is contended, or a reader lock
    /// prevents a checkpoint. Callers (SQLite itself, or the checkpoint
    /// coordinator) are expected to retry.
    #[error("busy")]
    Busy,

    /// This node is not the Raft leader.
    #[error("not leader")]
    NotLeader,

    /// The Raft cluster could not commit the submitted entry (timeout,
    /// quorum loss, or a leadership change mid-flight).
    #[error("consensus failed: {reason}")]
    ConsensusFailed { reason: String },

    /// The client attempted a second concurrent data request on one
    /// connection, or otherwise violated the one-in-flight-request rule.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// Unknown database id, statement id, or file name.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// `xOpen` was called in a way spec §4.3's file-lifecycle rules forbid:
    /// `EXCLUSIVE|CREATE` against an existing file, or a missing file
    /// opened without `CREATE`.
    #[error("cannot open: {reason}")]
    CantOpen { reason: String },

    /// `xDelete`/`xClose(deleteOnClose)` targeted a file whose refcount is
    /// still above zero.
    #[error("cannot delete: {reason}")]
    DeleteRefCount { reason: String },

    /// Any other invariant violation that should not be reachable from
    /// untrusted input; surfaced so call sites can log it, never silently
    /// swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Construct an [`Error::Internal`] from a `Display`-able value, the
    /// way `FrankenError::internal(..)` is used throughout the teacher
    /// codebase.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Translate this error into the SQLite result code that should be
    /// returned across the VFS or WAL-hook FFI boundary.
    #[must_use]
    pub fn to_sqlite_extended_rc(&self) -> c_int {
        match self {
            Self::ResourceExhausted => sqlite_rc::NOMEM,
            Self::FormatInvalid { .. } => sqlite_rc::CORRUPT,
            Self::IoBoundary { .. } => sqlite_rc::IOERR,
            Self::Busy => sqlite_rc::BUSY,
            Self::NotLeader | Self::ConsensusFailed { .. } => sqlite_rc::IOERR,
            Self::ProtocolViolation { .. } => sqlite_rc::IOERR,
            Self::NotFound { .. } => sqlite_rc::NOTFOUND,
            Self::CantOpen { .. } => sqlite_rc::CANTOPEN,
            Self::DeleteRefCount { .. } => sqlite_rc::IOERR_DELETE,
            Self::Internal(_) => sqlite_rc::IOERR,
        }
    }
}
