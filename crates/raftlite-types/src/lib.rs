//! Newtypes and flag sets shared by every crate in the replicated storage
//! plane, so that a page number or a page size can never be silently
//! confused with a plain `u32`.

mod flags;
mod page;

pub use flags::{OpenFlags, ShmLockFlags, SyncFlags};
pub use page::{PageNumber, PageSize};

/// Tag identifying what role a [`crate::PageNumber`]-addressed file plays
/// in the SQLite storage model this crate replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileTag {
    /// The main database file.
    Database,
    /// A rollback journal. Always empty: only WAL mode is supported.
    Journal,
    /// A write-ahead log file, paired with exactly one `Database` file.
    Wal,
}

/// Size, in bytes, of a SQLite database header.
pub const DB_HEADER_SIZE: usize = 100;
/// Size, in bytes, of a WAL file header.
pub const WAL_HEADER_SIZE: usize = 32;
/// Size, in bytes, of a single WAL frame header.
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
/// Number of SHM lock slots SQLite's WAL engine expects (`SQLITE_SHM_NLOCK`).
pub const SQLITE_SHM_NLOCK: usize = 8;
/// Size, in bytes, of a single SHM region SQLite requests.
pub const SHM_REGION_SIZE: usize = 32 * 1024;
