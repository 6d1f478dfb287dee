//! Keeps every open in-memory file and its paired SHM segment addressable
//! by name, so a database file and its `-wal` companion (opened as
//! separate `sqlite3_file` handles by SQLite) share the same bytes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use raftlite_error::{Error, Result};
use raftlite_types::{FileTag, OpenFlags};

use crate::file::File;
use crate::shm::SharedMemory;

#[derive(Default)]
pub struct Registry {
    files: Mutex<HashMap<String, Arc<Mutex<File>>>>,
    shm: Mutex<HashMap<String, Arc<Mutex<SharedMemory>>>>,
    /// Open-handle counts, keyed by name. Only touched by
    /// [`Registry::open_with_flags`]/[`Registry::close`] — the plain
    /// [`Registry::open`] used by non-FFI callers (the database registry,
    /// the replication apply path) doesn't hold a `sqlite3_file` handle and
    /// so never needs to participate in this bookkeeping.
    refcounts: Mutex<HashMap<String, u32>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (creating if absent) the file named `name` with the given tag,
    /// with no flag validation or refcount bookkeeping.
    #[must_use]
    pub fn open(&self, name: &str, tag: FileTag) -> Arc<Mutex<File>> {
        self.files
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(File::new(tag))))
            .clone()
    }

    /// Open `name` the way SQLite's `xOpen` must (spec §4.3's file
    /// lifecycle): `EXCLUSIVE|CREATE` against an existing file and a
    /// missing file opened without `CREATE` both fail with
    /// [`Error::CantOpen`]; a WAL opened before its paired database exists
    /// fails with [`Error::FormatInvalid`]. On success the name's refcount
    /// is incremented; pair every call with [`Registry::close`].
    pub fn open_with_flags(
        &self,
        name: &str,
        tag: FileTag,
        flags: OpenFlags,
    ) -> Result<Arc<Mutex<File>>> {
        let existed = self.exists(name);
        if flags.contains(OpenFlags::EXCLUSIVE | OpenFlags::CREATE) && existed {
            return Err(Error::CantOpen {
                reason: format!("{name} already exists and EXCLUSIVE|CREATE was requested"),
            });
        }
        if !existed && !flags.contains(OpenFlags::CREATE) {
            return Err(Error::CantOpen {
                reason: format!("{name} does not exist and CREATE was not requested"),
            });
        }
        if tag == FileTag::Wal {
            let db_name = name.strip_suffix("-wal").unwrap_or(name);
            if !self.exists(db_name) {
                return Err(Error::FormatInvalid {
                    reason: format!(
                        "WAL file {name} opened without its paired database {db_name}"
                    ),
                });
            }
        }
        let file = self.open(name, tag);
        *self.refcounts.lock().entry(name.to_string()).or_insert(0) += 1;
        Ok(file)
    }

    /// Release one reference acquired by [`Registry::open_with_flags`].
    pub fn close(&self, name: &str) {
        let mut refcounts = self.refcounts.lock();
        if let Some(count) = refcounts.get_mut(name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                refcounts.remove(name);
            }
        }
    }

    #[must_use]
    fn refcount(&self, name: &str) -> u32 {
        self.refcounts.lock().get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    /// Remove `name` and its SHM segment. Rejects with
    /// [`Error::DeleteRefCount`] while any `sqlite3_file` handle opened via
    /// [`Registry::open_with_flags`] still references it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let refs = self.refcount(name);
        if refs > 0 {
            return Err(Error::DeleteRefCount {
                reason: format!("{name} has {refs} open reference(s)"),
            });
        }
        self.files.lock().remove(name);
        self.shm.lock().remove(name);
        Ok(())
    }

    /// The SHM segment associated with a database's WAL-index, keyed by the
    /// database's own name (not the WAL file's name) so every connection to
    /// the same database shares one segment.
    #[must_use]
    pub fn shm_for(&self, db_name: &str) -> Arc<Mutex<SharedMemory>> {
        self.shm
            .lock()
            .entry(db_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SharedMemory::new())))
            .clone()
    }

    /// Bulk snapshot API (spec §4.3): the full byte image of `name` — raw
    /// bytes for a DATABASE/JOURNAL file, header-then-frames for a WAL —
    /// for a Raft snapshot to carry across the wire. Empty if `name` isn't
    /// open.
    #[must_use]
    pub fn file_read(&self, name: &str) -> Vec<u8> {
        self.files
            .lock()
            .get(name)
            .map(|f| f.lock().snapshot())
            .unwrap_or_default()
    }

    /// Install a snapshot produced by [`Registry::file_read`] onto `name`,
    /// creating the file (with `tag`) if it isn't already open. Replaces
    /// the file's contents outright rather than replaying `xWrite` calls,
    /// since a snapshot installs an already-consistent image.
    pub fn file_write(&self, name: &str, tag: FileTag, bytes: &[u8]) -> Result<()> {
        let file = self.open(name, tag);
        file.lock().restore(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_by_name() {
        let reg = Registry::new();
        let a = reg.open("test.db", FileTag::Database);
        let b = reg.open("test.db", FileTag::Database);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn delete_removes_file_and_shm() {
        let reg = Registry::new();
        reg.open("test.db", FileTag::Database);
        reg.shm_for("test.db");
        assert!(reg.exists("test.db"));

        reg.delete("test.db").unwrap();
        assert!(!reg.exists("test.db"));

        let fresh = reg.shm_for("test.db");
        assert_eq!(Arc::strong_count(&fresh), 2);
    }

    #[test]
    fn distinct_names_get_distinct_files() {
        let reg = Registry::new();
        let db = reg.open("a.db", FileTag::Database);
        let wal = reg.open("a.db-wal", FileTag::Wal);
        assert!(!Arc::ptr_eq(&db, &wal));
    }

    #[test]
    fn open_with_flags_rejects_exclusive_create_on_existing_file() {
        let reg = Registry::new();
        reg.open("a.db", FileTag::Database);
        let flags = OpenFlags::CREATE | OpenFlags::EXCLUSIVE | OpenFlags::MAIN_DB;
        assert!(matches!(
            reg.open_with_flags("a.db", FileTag::Database, flags),
            Err(Error::CantOpen { .. })
        ));
    }

    #[test]
    fn open_with_flags_rejects_missing_file_without_create() {
        let reg = Registry::new();
        assert!(matches!(
            reg.open_with_flags("a.db", FileTag::Database, OpenFlags::MAIN_DB),
            Err(Error::CantOpen { .. })
        ));
    }

    #[test]
    fn open_with_flags_rejects_unpaired_wal() {
        let reg = Registry::new();
        let flags = OpenFlags::CREATE | OpenFlags::WAL;
        assert!(matches!(
            reg.open_with_flags("a.db-wal", FileTag::Wal, flags),
            Err(Error::FormatInvalid { .. })
        ));
    }

    #[test]
    fn open_with_flags_tracks_refcount_and_gates_delete() {
        let reg = Registry::new();
        let create = OpenFlags::CREATE | OpenFlags::MAIN_DB;
        reg.open_with_flags("a.db", FileTag::Database, create).unwrap();
        reg.open_with_flags("a.db", FileTag::Database, OpenFlags::MAIN_DB)
            .unwrap();

        assert!(matches!(
            reg.delete("a.db"),
            Err(Error::DeleteRefCount { .. })
        ));

        reg.close("a.db");
        assert!(matches!(
            reg.delete("a.db"),
            Err(Error::DeleteRefCount { .. })
        ));

        reg.close("a.db");
        reg.delete("a.db").unwrap();
        assert!(!reg.exists("a.db"));
    }

    #[test]
    fn bulk_snapshot_round_trips_a_database_file() {
        let reg = Registry::new();
        let data = vec![7u8; 4096];
        reg.file_write("a.db", FileTag::Database, &data).unwrap();
        assert_eq!(reg.file_read("a.db"), data);
    }

    #[test]
    fn bulk_snapshot_round_trips_a_wal_file() {
        let reg = Registry::new();
        let wal = reg.open("a.db-wal", FileTag::Wal);
        {
            let mut wal = wal.lock();
            let mut header = [0u8; raftlite_types::WAL_HEADER_SIZE];
            header[8..12].copy_from_slice(&512u32.to_be_bytes());
            wal.write(0, &header).unwrap();
            wal.write(
                raftlite_types::WAL_HEADER_SIZE as u64,
                &vec![0xAB; raftlite_types::WAL_FRAME_HEADER_SIZE + 512],
            )
            .unwrap();
        }
        let snapshot = reg.file_read("a.db-wal");

        let other = Registry::new();
        other
            .file_write("b.db-wal", FileTag::Wal, &snapshot)
            .unwrap();
        assert_eq!(other.file_read("b.db-wal"), snapshot);
    }
}
