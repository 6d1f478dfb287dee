//! Checkpoint coordinator (C7), grounded on
//! `examples/original_source/src/gateway.c`'s `maybe_checkpoint`: invoked
//! after every successful commit on the leader with the WAL's current
//! frame count, it probes every SHM lock slot with a non-blocking
//! exclusive try-lock-then-release and only submits a cluster-wide
//! checkpoint if every slot was free.

use std::sync::Arc;

use raftlite_error::Result;
use raftlite_replication::{ClusterHandle, WalHook};
use raftlite_types::SQLITE_SHM_NLOCK;
use raftlite_vfs::Registry;

/// Tuning knobs for the checkpoint coordinator.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointOptions {
    /// Minimum WAL frame count before a checkpoint is even considered.
    pub threshold_frames: u32,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        // dqlite's default `checkpoint_threshold` (in WAL pages).
        Self { threshold_frames: 1000 }
    }
}

/// Drives checkpoint decisions for every database on this node.
pub struct CheckpointCoordinator {
    vfs: Arc<Registry>,
    options: CheckpointOptions,
}

impl CheckpointCoordinator {
    #[must_use]
    pub fn new(vfs: Arc<Registry>, options: CheckpointOptions) -> Self {
        Self { vfs, options }
    }

    /// Called after every successful commit on the leader. `frame_count` is
    /// the WAL's frame count right after that commit. Below threshold: a
    /// no-op. Otherwise probes every SHM lock slot; if any is held, returns
    /// without checkpointing (it will be retried on the next commit).
    /// Errors from the cluster submission are intentionally swallowed —
    /// the checkpoint is retried on the next qualifying commit regardless.
    pub fn maybe_checkpoint(&self, database: &str, frame_count: u32, hook: &WalHook, cluster: &dyn ClusterHandle) {
        let _span = tracing::info_span!(
            target: "raftlite_core::checkpoint",
            "checkpoint_probe",
            database,
            frame_count
        )
        .entered();

        if frame_count < self.options.threshold_frames {
            return;
        }

        if !self.all_slots_free(database) {
            tracing::debug!(database, "checkpoint postponed, a lock slot is held");
            return;
        }

        let mut rng = rand::thread_rng();
        if let Err(err) = hook.checkpoint(database, cluster, &mut rng) {
            tracing::warn!(database, error = %err, "checkpoint attempt failed, will retry");
        } else {
            tracing::info!(database, "distributed checkpoint submitted");
        }
    }

    /// Probe every SHM lock slot with a non-blocking exclusive try-lock,
    /// releasing immediately; `true` only if every slot was free. Mirrors
    /// `maybe_checkpoint`'s `for (i = 0; i < SQLITE_SHM_NLOCK; i++)` loop
    /// over `xShmLock`.
    fn all_slots_free(&self, database: &str) -> bool {
        let shm = self.vfs.shm_for(database);
        let shm = shm.lock();
        (0..SQLITE_SHM_NLOCK).all(|i| shm.probe_slot_free(i))
    }
}
