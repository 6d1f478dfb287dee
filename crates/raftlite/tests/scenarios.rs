//! End-to-end scenarios (spec §8 S1–S6), driven entirely through the public
//! [`raftlite::Node`] API — the same convention the teacher's
//! `fsqlite-wal/tests/*.rs` integration suite follows for its own crate.

use raftlite::{Error, FrameRecord, Node, NodeOptions};
use raftlite_core::{ExecOutcome, ExecRequest, RequestSlot};
use raftlite_harness::FakeCluster;
use raftlite_types::FileTag;

fn node() -> Node<FakeCluster> {
    Node::new(FakeCluster::new("node-1"), NodeOptions::default())
}

#[test]
fn s1_open_creates_paired_files_with_zero_size() {
    let node = node();
    let conn = node.open("test.db", 4096).unwrap();
    assert_eq!(conn, 1);
    assert!(node.registry().is_open("test.db"));

    assert!(node.vfs().exists("test.db"));
    assert!(node.vfs().exists("test.db-wal"));
    assert_eq!(node.vfs().open("test.db", FileTag::Database).lock().file_size(), 0);
    assert_eq!(node.vfs().open("test.db-wal", FileTag::Wal).lock().file_size(), 0);
}

#[test]
fn s2_single_commit_produces_exactly_one_frames_entry() {
    let node = node();
    let conn = node.open("test.db", 512).unwrap();
    let outcome = node
        .exec(
            "test.db",
            conn,
            ExecRequest {
                database: "test.db".into(),
                page_size: 512,
                truncate: 1,
                is_commit: true,
                frames: vec![FrameRecord {
                    pgno: 1,
                    data: vec![0u8; 512],
                }],
            },
            1,
        )
        .unwrap();
    assert!(matches!(outcome, ExecOutcome::Committed));
    assert_eq!(node.cluster().committed_count(), 1);
}

#[test]
fn s3_second_concurrent_data_request_is_busy() {
    let node = node();
    let conn_a = node.open("test.db", 512).unwrap();
    let conn_b = node.open("test.db", 512).unwrap();
    node.registry()
        .claim_slot("test.db", conn_a, RequestSlot::Data)
        .unwrap();
    let err = node.registry().claim_slot("test.db", conn_a, RequestSlot::Data);
    assert!(matches!(err, Err(Error::ProtocolViolation { .. })));
    let _ = conn_b;
}

#[test]
fn s4_checkpoint_is_gated_by_held_shm_lock() {
    let node = node();
    let conn = node.open("test.db", 512).unwrap();
    let shm = node.vfs().shm_for("test.db");
    let mut reader = raftlite_vfs::ShmLockState::default();
    shm.lock().lock(&mut reader, 0, 1, true, false).unwrap();

    node.exec(
        "test.db",
        conn,
        ExecRequest {
            database: "test.db".into(),
            page_size: 512,
            truncate: 1,
            is_commit: true,
            frames: vec![FrameRecord {
                pgno: 1,
                data: vec![1u8; 512],
            }],
        },
        2000,
    )
    .unwrap();
    // Only the Frames entry, no Checkpoint, while the reader holds slot 0.
    assert_eq!(node.cluster().committed_count(), 1);

    shm.lock().lock(&mut reader, 0, 1, false, false).unwrap();
    node.exec(
        "test.db",
        conn,
        ExecRequest {
            database: "test.db".into(),
            page_size: 512,
            truncate: 0,
            is_commit: true,
            frames: vec![FrameRecord {
                pgno: 1,
                data: vec![2u8; 512],
            }],
        },
        2000,
    )
    .unwrap();
    assert_eq!(node.cluster().committed_count(), 3, "Frames + Frames + Checkpoint");
}

#[test]
fn s5_leader_loss_mid_statement_fails_the_commit() {
    let node = node();
    let conn = node.open("test.db", 512).unwrap();
    node.cluster().fail_next_submit();

    let result = node.exec(
        "test.db",
        conn,
        ExecRequest {
            database: "test.db".into(),
            page_size: 512,
            truncate: 1,
            is_commit: true,
            frames: vec![FrameRecord {
                pgno: 1,
                data: vec![0u8; 512],
            }],
        },
        1,
    );
    assert!(matches!(result, Err(Error::ConsensusFailed { .. })));

    let wal = node.vfs().open("test.db-wal", FileTag::Wal);
    assert_eq!(wal.lock().wal_frame_count(), 0, "no frames visible to readers after a failed commit");
}

#[test]
fn s6_interrupt_frees_the_data_slot_without_submitting_anything() {
    let node = node();
    let conn = node.open("test.db", 512).unwrap();
    node.registry()
        .claim_slot("test.db", conn, RequestSlot::Data)
        .unwrap();
    node.interrupt("test.db").unwrap();
    node.registry()
        .claim_slot("test.db", conn, RequestSlot::Data)
        .unwrap();
    assert_eq!(node.cluster().committed_count(), 0);
}
