//! Test-only fixtures: a deterministic, single-node [`ClusterHandle`] fake
//! and a handful of scenario builders shared across this workspace's
//! integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use raftlite_error::Result;
use raftlite_replication::{ClusterHandle, LogEntry};

/// A single-node "cluster" that is always its own leader and commits every
/// entry it's handed immediately, in submission order. Good enough to
/// exercise the full begin/frames/undo/end/checkpoint protocol and the
/// leader loop's fiber-suspend boundary without a real Raft dependency.
pub struct FakeCluster {
    address: String,
    committed: Mutex<Vec<LogEntry>>,
    applied_index: AtomicU64,
    /// When set, the next `submit` call fails instead of committing —
    /// lets tests exercise `Error::ConsensusFailed` without a real
    /// cluster ever losing quorum.
    fail_next: Mutex<bool>,
}

impl FakeCluster {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            committed: Mutex::new(Vec::new()),
            applied_index: AtomicU64::new(0),
            fail_next: Mutex::new(false),
        }
    }

    /// Arrange for the next `submit` to fail with `ConsensusFailed`.
    pub fn fail_next_submit(&self) {
        *self.fail_next.lock() = true;
    }

    #[must_use]
    pub fn applied_index(&self) -> u64 {
        self.applied_index.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn committed_entries(&self) -> Vec<LogEntry> {
        // `LogEntry` doesn't implement `Clone`-free copying cheaply here,
        // so tests that need the log should count entries via
        // `committed_count` instead of cloning payloads.
        self.committed.lock().drain(..).collect()
    }

    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }
}

impl ClusterHandle for FakeCluster {
    fn leader(&self) -> Option<String> {
        Some(self.address.clone())
    }

    fn servers(&self) -> Vec<String> {
        vec![self.address.clone()]
    }

    fn register(&self, database: &str) {
        tracing::debug!(database, node = %self.address, "database registered with fake cluster");
    }

    fn unregister(&self, database: &str) {
        tracing::debug!(database, node = %self.address, "database unregistered from fake cluster");
    }

    fn submit(&self, entry: LogEntry) -> Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(raftlite_error::Error::ConsensusFailed {
                reason: "fake cluster configured to fail the next submission".into(),
            });
        }
        self.committed.lock().push(entry);
        self.applied_index.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

/// Convenience wiring for tests: a fresh in-memory VFS registry, a
/// `DatabaseRegistry` over it, and a `FakeCluster` to drive it with.
pub struct TestNode {
    pub vfs: Arc<raftlite_vfs::Registry>,
    pub registry: Arc<raftlite_core::DatabaseRegistry>,
    pub cluster: Arc<FakeCluster>,
}

impl TestNode {
    #[must_use]
    pub fn new() -> Self {
        let vfs = Arc::new(raftlite_vfs::Registry::new());
        let registry = Arc::new(raftlite_core::DatabaseRegistry::new(
            Arc::clone(&vfs),
            raftlite_core::RegistryOptions::default(),
        ));
        let cluster = Arc::new(FakeCluster::new("node-1"));
        Self {
            vfs,
            registry,
            cluster,
        }
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_cluster_commits_in_submission_order() {
        let cluster = FakeCluster::new("n1");
        cluster
            .submit(LogEntry::Open {
                filename: "a.db".into(),
                page_size: 4096,
            })
            .unwrap();
        cluster
            .submit(LogEntry::Undo {
                filename: "a.db".into(),
            })
            .unwrap();
        assert_eq!(cluster.committed_count(), 2);
        assert_eq!(cluster.applied_index(), 2);
    }

    #[test]
    fn fail_next_submit_is_one_shot() {
        let cluster = FakeCluster::new("n1");
        cluster.fail_next_submit();
        assert!(
            cluster
                .submit(LogEntry::Undo {
                    filename: "a.db".into(),
                })
                .is_err()
        );
        assert!(
            cluster
                .submit(LogEntry::Undo {
                    filename: "a.db".into(),
                })
                .is_ok()
        );
    }
}
