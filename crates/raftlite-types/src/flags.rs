use bitflags::bitflags;

bitflags! {
    /// Mirrors the subset of `sqlite3_vfs::xOpen` flags this VFS interprets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READONLY     = 0x0000_0001;
        const READWRITE    = 0x0000_0002;
        const CREATE       = 0x0000_0004;
        const DELETEONCLOSE = 0x0000_0008;
        const EXCLUSIVE    = 0x0000_0010;
        const MAIN_DB      = 0x0000_0100;
        const MAIN_JOURNAL = 0x0000_0800;
        const WAL          = 0x0008_0000;
    }
}

bitflags! {
    /// Mirrors `sqlite3_file::xSync` flags; carried through unmodified since
    /// the in-memory VFS does not need to fsync anything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        const NORMAL   = 0x0000_0002;
        const FULL     = 0x0000_0003;
        const DATAONLY = 0x0000_0010;
    }
}

bitflags! {
    /// `xShmLock` flags: exactly one of `SHARED`/`EXCLUSIVE` is set together
    /// with exactly one of `LOCK`/`UNLOCK`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShmLockFlags: u32 {
        const UNLOCK    = 0x0000_0001;
        const LOCK      = 0x0000_0002;
        const SHARED    = 0x0000_0004;
        const EXCLUSIVE = 0x0000_0008;
    }
}
