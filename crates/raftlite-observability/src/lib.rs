//! Shared tracing conventions for the replicated storage plane.
//!
//! Every crate logs through `tracing` directly; this crate only pins the
//! span names that cross a crate boundary (so a log pipeline can filter on
//! them reliably) and a single `init()` entry point for binaries/tests that
//! want a sane default subscriber.

use tracing_subscriber::EnvFilter;

/// Span covering one call to the replication hook's `frames` path, from
/// writer-slot check through local apply.
pub const SPAN_WAL_FRAMES_APPLY: &str = "wal_frames_apply";
/// Span covering one checkpoint-threshold probe in the checkpoint
/// coordinator, successful or not.
pub const SPAN_CHECKPOINT_PROBE: &str = "checkpoint_probe";
/// Span covering one `leader.exec` round trip through the loop fiber.
pub const SPAN_LEADER_EXEC: &str = "leader_exec";

/// Install a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`,
/// falling back to `info`. Idempotent: a second call is a harmless no-op if
/// a global subscriber is already set (matches the teacher's
/// `tracing_subscriber::fmt().try_init()` pattern used in its own test
/// harnesses).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
