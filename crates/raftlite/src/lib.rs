//! Public facade: a replicated SQLite storage plane driven by an abstract
//! Raft collaborator ([`raftlite_replication::ClusterHandle`]).
//!
//! A [`Node`] owns the in-memory VFS, the database registry (C6), and the
//! checkpoint coordinator (C7); callers drive statement execution through
//! [`Node::exec`], which resumes a connection's leader loop fiber (C5) and
//! runs every Raft append the resulting WAL frames need through whatever
//! [`ClusterHandle`] the node was built with.

use std::sync::Arc;

use raftlite_core::{
    CheckpointCoordinator, CheckpointOptions, DatabaseRegistry, ExecOutcome, ExecRequest,
    RegistryOptions, RequestSlot,
};
use raftlite_error::Result;
use raftlite_replication::ClusterHandle;
use raftlite_vfs::Registry as VfsRegistry;

pub use raftlite_core::ConsensusWork;
pub use raftlite_error::Error;
pub use raftlite_replication::{FrameRecord, LogEntry};

/// Construction options for a [`Node`].
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub registry: RegistryOptions,
    pub checkpoint: CheckpointOptions,
}

/// One node of the replicated storage plane. Generic over the concrete
/// [`ClusterHandle`] so a caller can wire in a real Raft implementation
/// without this crate depending on one.
pub struct Node<C: ClusterHandle> {
    vfs: Arc<VfsRegistry>,
    registry: Arc<DatabaseRegistry>,
    checkpoint: CheckpointCoordinator,
    cluster: C,
}

impl<C: ClusterHandle> Node<C> {
    #[must_use]
    pub fn new(cluster: C, options: NodeOptions) -> Self {
        raftlite_observability::init();
        let vfs = Arc::new(VfsRegistry::new());
        let registry = Arc::new(DatabaseRegistry::new(Arc::clone(&vfs), options.registry));
        let checkpoint = CheckpointCoordinator::new(Arc::clone(&vfs), options.checkpoint);
        Self {
            vfs,
            registry,
            checkpoint,
            cluster,
        }
    }

    #[must_use]
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Open a connection against `name` (spec S1). Ensures the paired
    /// database/WAL files exist in the VFS and starts a leader loop fiber
    /// for the new connection; returns the connection id the caller
    /// addresses subsequent requests with.
    pub fn open(&self, name: &str, page_size: u32) -> Result<u64> {
        self.cluster.register(name);
        self.registry.open(name, page_size)
    }

    /// Close a connection (spec §4.6's `close`).
    pub fn close(&self, name: &str, conn_id: u64) -> Result<()> {
        self.registry.close(name, conn_id)?;
        if !self.registry.is_open(name) {
            self.cluster.unregister(name);
        }
        Ok(())
    }

    /// Run one statement-execution request on `conn_id`'s leader loop
    /// (spec §4.5). Claims the data request slot for the duration of the
    /// call (spec §4.6) and, on a commit, runs the checkpoint coordinator
    /// (spec §4.7) against the database's new WAL frame count.
    pub fn exec(&self, name: &str, conn_id: u64, req: ExecRequest, wal_frame_count_after: u32) -> Result<ExecOutcome> {
        self.registry.claim_slot(name, conn_id, RequestSlot::Data)?;
        let result = self
            .registry
            .with_leader(name, conn_id, |leader| leader.exec(req, &self.cluster));
        self.registry.release_slot(name, RequestSlot::Data)?;

        if let Ok(ExecOutcome::Committed) = result {
            self.checkpoint.maybe_checkpoint(
                name,
                wal_frame_count_after,
                self.registry.hook(),
                &self.cluster,
            );
        }
        result
    }

    /// Spec S6: interrupt the in-flight data request on `conn_id`. Queries
    /// submit no Raft entries, so this only needs to clear the request
    /// slot; no cleanup-state tracking lives in this facade because no
    /// statement object crosses the boundary (callers own their own
    /// `rusqlite::Statement`, if any, and finalize it themselves).
    pub fn interrupt(&self, name: &str) -> Result<()> {
        self.registry.release_slot(name, RequestSlot::Data)
    }

    #[must_use]
    pub fn vfs(&self) -> &Arc<VfsRegistry> {
        &self.vfs
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }
}
