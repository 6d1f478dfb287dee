//! Database registry & gateway interface (C6), grounded on
//! `examples/original_source/test/unit/lib/test_registry.c` (the dqlite
//! registry's id/name dual lookup and open/close refcounting) and spec
//! §4.6.
//!
//! For each logical database name, tracks its VFS files (owned by
//! `raftlite_vfs::Registry`, not duplicated here), its leader-connection
//! list, and — via the shared [`WalHook`] — its single outstanding-writer
//! slot. Exposes lookup by numeric connection id (for the gateway) and by
//! filename (for the VFS/replication path).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use raftlite_error::{Error, Result};
use raftlite_replication::WalHook;
use raftlite_types::FileTag;
use raftlite_vfs::Registry as VfsRegistry;

use crate::leader::Leader;

/// Tuning knobs for [`DatabaseRegistry::open`]; every field has a sensible
/// default so callers only override what they care about.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Stack size, in bytes, for each connection's loop fiber.
    pub fiber_stack_size: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            fiber_stack_size: 256 * 1024,
        }
    }
}

/// One request slot on a connection. The gateway above this registry
/// submits at most two concurrent requests per connection: slot 0 for data
/// operations, slot 1 for control operations (spec §4.6). A control
/// request may run concurrently with a data request; a second data
/// request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSlot {
    Data,
    Control,
}

#[derive(Default)]
struct SlotState {
    data_busy: bool,
}

struct Entry {
    leaders: Mutex<HashMap<u64, Leader>>,
    slots: Mutex<SlotState>,
}

/// The database registry: every logical database this node has open, keyed
/// both by filename and by the numeric connection ids the gateway hands
/// out.
pub struct DatabaseRegistry {
    vfs: Arc<VfsRegistry>,
    hook: Arc<WalHook>,
    options: RegistryOptions,
    databases: Mutex<HashMap<String, Arc<Entry>>>,
    next_conn_id: Mutex<u64>,
}

impl DatabaseRegistry {
    #[must_use]
    pub fn new(vfs: Arc<VfsRegistry>, options: RegistryOptions) -> Self {
        Self {
            hook: Arc::new(WalHook::new(Arc::clone(&vfs))),
            vfs,
            options,
            databases: Mutex::new(HashMap::new()),
            next_conn_id: Mutex::new(1),
        }
    }

    #[must_use]
    pub fn vfs(&self) -> &Arc<VfsRegistry> {
        &self.vfs
    }

    #[must_use]
    pub fn hook(&self) -> &Arc<WalHook> {
        &self.hook
    }

    /// Ensure `name`'s paired files exist and open a new leader connection
    /// against it, returning the connection id the gateway should key its
    /// requests on.
    pub fn open(&self, name: &str, page_size: u32) -> Result<u64> {
        let _ = page_size; // carried for parity with spec §4.6's signature; the VFS derives page size from the first WAL write.
        let _ = self.vfs.open(name, FileTag::Database);
        let _ = self.vfs.open(&format!("{name}-wal"), FileTag::Wal);

        let entry = {
            let mut databases = self.databases.lock();
            Arc::clone(databases.entry(name.to_string()).or_insert_with(|| {
                Arc::new(Entry {
                    leaders: Mutex::new(HashMap::new()),
                    slots: Mutex::new(SlotState::default()),
                })
            }))
        };

        let conn_id = {
            let mut next = self.next_conn_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let leader = Leader::init(
            name.to_string(),
            conn_id,
            Arc::clone(&self.hook),
            self.options.fiber_stack_size,
        )?;
        entry.leaders.lock().insert(conn_id, leader);
        tracing::info!(database = name, conn_id, "leader connection opened");
        Ok(conn_id)
    }

    /// Detach a connection. If it was the last one open against `name`, the
    /// SQLite-side state is torn down (each `Leader` closes its fiber on
    /// drop); the underlying VFS file persists until explicitly deleted.
    pub fn close(&self, name: &str, conn_id: u64) -> Result<()> {
        let entry = self.lookup(name)?;
        let leader = entry
            .leaders
            .lock()
            .remove(&conn_id)
            .ok_or_else(|| Error::NotFound {
                what: format!("connection {conn_id} on database {name}"),
            })?;
        leader.close();

        let now_empty = entry.leaders.lock().is_empty();
        if now_empty {
            self.databases.lock().remove(name);
            tracing::info!(database = name, "last connection closed, database detached");
        }
        Ok(())
    }

    /// Look up a database's registry entry by filename (used by the VFS
    /// and replication path).
    fn lookup(&self, name: &str) -> Result<Arc<Entry>> {
        self.databases
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                what: format!("database {name}"),
            })
    }

    /// Claim a request slot on behalf of `conn_id`. A second concurrent
    /// `Data` claim is rejected with [`Error::ProtocolViolation`]; `Control`
    /// claims never conflict (spec §4.6).
    pub fn claim_slot(&self, name: &str, conn_id: u64, slot: RequestSlot) -> Result<()> {
        let entry = self.lookup(name)?;
        if !entry.leaders.lock().contains_key(&conn_id) {
            return Err(Error::NotFound {
                what: format!("connection {conn_id} on database {name}"),
            });
        }
        if slot == RequestSlot::Data {
            let mut slots = entry.slots.lock();
            if slots.data_busy {
                return Err(Error::ProtocolViolation {
                    reason: format!("connection {conn_id} already has a data request in flight"),
                });
            }
            slots.data_busy = true;
        }
        Ok(())
    }

    /// Release a previously claimed request slot.
    pub fn release_slot(&self, name: &str, slot: RequestSlot) -> Result<()> {
        let entry = self.lookup(name)?;
        if slot == RequestSlot::Data {
            entry.slots.lock().data_busy = false;
        }
        Ok(())
    }

    /// Run `f` against the leader connection `conn_id` on database `name`.
    pub fn with_leader<T>(
        &self,
        name: &str,
        conn_id: u64,
        f: impl FnOnce(&mut Leader) -> Result<T>,
    ) -> Result<T> {
        let entry = self.lookup(name)?;
        let mut leaders = entry.leaders.lock();
        let leader = leaders.get_mut(&conn_id).ok_or_else(|| Error::NotFound {
            what: format!("connection {conn_id} on database {name}"),
        })?;
        f(leader)
    }

    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.databases.lock().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DatabaseRegistry {
        DatabaseRegistry::new(Arc::new(VfsRegistry::new()), RegistryOptions::default())
    }

    #[test]
    fn open_creates_paired_database_and_wal_files() {
        let vfs = Arc::new(VfsRegistry::new());
        let reg = DatabaseRegistry::new(Arc::clone(&vfs), RegistryOptions::default());
        reg.open("a.db", 4096).unwrap();
        assert!(vfs.exists("a.db"));
        assert!(vfs.exists("a.db-wal"));
        assert_eq!(vfs.open("a.db", FileTag::Database).lock().file_size(), 0);
        assert_eq!(vfs.open("a.db-wal", FileTag::Wal).lock().file_size(), 0);
    }

    #[test]
    fn open_then_close_detaches_database() {
        let reg = registry();
        let conn = reg.open("a.db", 4096).unwrap();
        assert!(reg.is_open("a.db"));
        reg.close("a.db", conn).unwrap();
        assert!(!reg.is_open("a.db"));
    }

    #[test]
    fn second_data_slot_claim_is_protocol_violation() {
        let reg = registry();
        let conn = reg.open("a.db", 4096).unwrap();
        reg.claim_slot("a.db", conn, RequestSlot::Data).unwrap();
        assert!(matches!(
            reg.claim_slot("a.db", conn, RequestSlot::Data),
            Err(Error::ProtocolViolation { .. })
        ));
        reg.claim_slot("a.db", conn, RequestSlot::Control).unwrap();
    }

    #[test]
    fn closing_unknown_connection_is_not_found() {
        let reg = registry();
        reg.open("a.db", 4096).unwrap();
        assert!(matches!(reg.close("a.db", 9999), Err(Error::NotFound { .. })));
    }

    #[test]
    fn database_stays_open_while_any_connection_remains() {
        let reg = registry();
        let c1 = reg.open("a.db", 4096).unwrap();
        let c2 = reg.open("a.db", 4096).unwrap();
        reg.close("a.db", c1).unwrap();
        assert!(reg.is_open("a.db"));
        reg.close("a.db", c2).unwrap();
        assert!(!reg.is_open("a.db"));
    }
}
