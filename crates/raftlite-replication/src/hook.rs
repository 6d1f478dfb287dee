//! The WAL replication hook (C4): SQLite's begin/frames/undo/end/checkpoint
//! callbacks, turned into Raft log entries.
//!
//! `ClusterHandle` is the out-of-scope Raft implementation's collaborator
//! interface (spec §6's "cluster callback surface"). `submit` and `barrier`
//! are synchronous from the hook's point of view — spec §4.5 requires the
//! *caller* (the leader execution loop, `raftlite-core::leader`) to be the
//! one that actually suspends a fiber while a concrete `ClusterHandle`
//! impl's Raft append is outstanding. Defining the trait here rather than
//! in `raftlite-core` (as first sketched) avoids a dependency cycle: the
//! hook needs the trait, and `raftlite-core`'s fiber-aware implementation
//! of it needs the hook's `LogEntry` type — putting both in one crate
//! breaks the cycle cleanly.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::RngCore;

use raftlite_error::{Error, Result};
use raftlite_vfs::Registry;

use crate::entry::{self, FrameRecord, LogEntry};

/// The collaborator interface the hook drives. A production implementation
/// wraps a real Raft instance and suspends the calling fiber inside
/// `submit`/`barrier` until the entry is durably committed or the barrier
/// target is reached; `raftlite-harness` ships a synchronous fake for
/// tests.
pub trait ClusterHandle {
    /// Address of the current Raft leader, if known.
    fn leader(&self) -> Option<String>;
    /// Addresses of every server in the configuration.
    fn servers(&self) -> Vec<String>;
    /// Record that `database` now has an open connection on this node.
    fn register(&self, database: &str);
    /// Record that `database` no longer has an open connection on this node.
    fn unregister(&self, database: &str);
    /// Append `entry` and block until the cluster has committed it (or
    /// failed to, in which case an error is returned). This is the single
    /// suspension point spec §5 describes for the `frames` path.
    fn submit(&self, entry: LogEntry) -> Result<()>;
    /// Block until this node's applied index has caught up with the
    /// cluster's last-known log index.
    fn barrier(&self) -> Result<()>;
}

/// Per-database writer-slot bookkeeping: at most one connection may be
/// mid-transaction against a given database at a time (spec §4.4, §8
/// invariant 6).
#[derive(Default)]
struct WriterSlots {
    holders: HashMap<String, u64>,
}

/// The WAL replication hook. One instance is shared by every connection on
/// a node; `conn_id` distinguishes callers.
///
/// Unlike `begin`/`end`/`undo`, which only touch local writer-slot
/// bookkeeping, `frames` and `checkpoint` take the [`ClusterHandle`] as a
/// per-call argument rather than storing it. `raftlite-core`'s leader loop
/// needs to hand in a fiber-aware handle that borrows the currently
/// suspended coroutine's `Yielder` for the duration of a single `step()`
/// call — a borrow that cannot outlive that call, so it cannot live inside
/// a field of this long-lived struct. Passing it per call also keeps tests
/// free to swap in a fixed fake without threading a generic parameter
/// through every other method.
pub struct WalHook {
    registry: std::sync::Arc<Registry>,
    writers: Mutex<WriterSlots>,
}

impl WalHook {
    #[must_use]
    pub fn new(registry: std::sync::Arc<Registry>) -> Self {
        Self {
            registry,
            writers: Mutex::new(WriterSlots::default()),
        }
    }

    /// Acquire the single writer slot for `database` on behalf of
    /// `conn_id`. Fails `Busy` if another connection already holds it.
    pub fn begin(&self, conn_id: u64, database: &str) -> Result<()> {
        let mut writers = self.writers.lock();
        if let Some(&holder) = writers.holders.get(database) {
            if holder != conn_id {
                return Err(Error::Busy);
            }
            return Ok(());
        }
        writers.holders.insert(database.to_string(), conn_id);
        tracing::debug!(conn_id, database, "writer slot acquired");
        Ok(())
    }

    /// Submit one batch of dirty WAL frames as a Raft entry, wait for
    /// commit, and apply it locally (the leader applies its own commits
    /// exactly like a follower, per spec §4.4).
    pub fn frames(
        &self,
        conn_id: u64,
        database: &str,
        page_size: u32,
        truncate: u32,
        is_commit: bool,
        frames: Vec<FrameRecord>,
        cluster: &dyn ClusterHandle,
        rng: &mut impl RngCore,
    ) -> Result<()> {
        {
            let writers = self.writers.lock();
            if writers.holders.get(database) != Some(&conn_id) {
                return Err(Error::ProtocolViolation {
                    reason: "frames() called without holding the writer slot".into(),
                });
            }
        }

        let entry = LogEntry::Frames {
            filename: database.to_string(),
            page_size,
            truncate,
            is_commit,
            frames,
        };
        cluster.submit(entry.clone())?;
        entry::apply(&entry, &self.registry, rng)
    }

    /// Revert dirty pages after a failed apply or aborted statement.
    pub fn undo(&self, database: &str, rng: &mut impl RngCore) -> Result<()> {
        entry::apply(&LogEntry::Undo { filename: database.to_string() }, &self.registry, rng)
    }

    /// Release the writer slot and wake anyone waiting on `begin`.
    pub fn end(&self, conn_id: u64, database: &str) {
        let mut writers = self.writers.lock();
        if writers.holders.get(database) == Some(&conn_id) {
            writers.holders.remove(database);
            tracing::debug!(conn_id, database, "writer slot released");
        }
    }

    /// Submit a cluster-wide checkpoint entry and apply it locally.
    pub fn checkpoint(
        &self,
        database: &str,
        cluster: &dyn ClusterHandle,
        rng: &mut impl RngCore,
    ) -> Result<()> {
        let entry = LogEntry::Checkpoint {
            filename: database.to_string(),
        };
        cluster.submit(entry.clone())?;
        entry::apply(&entry, &self.registry, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCluster {
        submitted: AtomicUsize,
    }

    impl ClusterHandle for CountingCluster {
        fn leader(&self) -> Option<String> {
            Some("self".into())
        }
        fn servers(&self) -> Vec<String> {
            vec!["self".into()]
        }
        fn register(&self, _database: &str) {}
        fn unregister(&self, _database: &str) {}
        fn submit(&self, _entry: LogEntry) -> Result<()> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn barrier(&self) -> Result<()> {
            Ok(())
        }
    }

    fn hook() -> WalHook {
        WalHook::new(Arc::new(Registry::new()))
    }

    #[test]
    fn second_begin_from_other_connection_is_busy() {
        let hook = hook();
        hook.begin(1, "a.db").unwrap();
        assert!(matches!(hook.begin(2, "a.db"), Err(Error::Busy)));
        hook.end(1, "a.db");
        hook.begin(2, "a.db").unwrap();
    }

    #[test]
    fn frames_without_begin_is_protocol_violation() {
        let hook = hook();
        let cluster = CountingCluster {
            submitted: AtomicUsize::new(0),
        };
        let mut rng = StepRng::new(1, 1);
        let result = hook.frames(1, "a.db", 512, 1, true, vec![], &cluster, &mut rng);
        assert!(matches!(result, Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn frames_submits_exactly_one_entry_per_call() {
        let hook = hook();
        let cluster = CountingCluster {
            submitted: AtomicUsize::new(0),
        };
        let mut rng = StepRng::new(1, 1);
        hook.begin(1, "a.db").unwrap();
        hook.frames(
            1,
            "a.db",
            512,
            1,
            true,
            vec![FrameRecord {
                pgno: 1,
                data: vec![0u8; 512],
            }],
            &cluster,
            &mut rng,
        )
        .unwrap();
        assert_eq!(cluster.submitted.load(Ordering::SeqCst), 1);
    }
}
