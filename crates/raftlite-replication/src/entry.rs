//! Raft log entry kinds produced by the replication hook (spec §6), and the
//! apply path every node — leader included — runs to turn a committed
//! entry into bytes inside the in-memory VFS.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use raftlite_error::{Error, Result};
use raftlite_format::{WAL_MAGIC, wal_checksum, wal_restart_header};
use raftlite_types::{FileTag, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE};
use raftlite_vfs::Registry;

/// One dirty page SQLite's `xFrames` callback reported, paired with the
/// page number it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub pgno: u32,
    pub data: Vec<u8>,
}

/// A single Raft log entry as produced by the WAL replication hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
    /// Creates the paired database/WAL files on followers.
    Open { filename: String, page_size: u32 },
    /// One `xFrames` callback's worth of dirty pages.
    Frames {
        filename: String,
        page_size: u32,
        truncate: u32,
        is_commit: bool,
        frames: Vec<FrameRecord>,
    },
    /// Rolls back the in-memory WAL to the previous commit frame.
    Undo { filename: String },
    /// Truncates the WAL to zero frames and rotates its header.
    Checkpoint { filename: String },
}

fn wal_name(database_filename: &str) -> String {
    format!("{database_filename}-wal")
}

/// Apply a committed [`LogEntry`] to this node's in-memory VFS. Applies are
/// strictly serial per database (spec §4.4): callers must not invoke this
/// concurrently for the same `filename`.
pub fn apply(entry: &LogEntry, registry: &Registry, rng: &mut impl RngCore) -> Result<()> {
    match entry {
        LogEntry::Open { filename, .. } => {
            registry.open(filename, FileTag::Database);
            registry.open(&wal_name(filename), FileTag::Wal);
            Ok(())
        }
        LogEntry::Frames {
            filename,
            page_size,
            truncate,
            is_commit,
            frames,
        } => apply_frames(registry, filename, *page_size, *truncate, *is_commit, frames, rng),
        LogEntry::Undo { filename } => {
            let handle = registry.open(&wal_name(filename), FileTag::Wal);
            handle.lock().wal_undo()
        }
        LogEntry::Checkpoint { filename } => apply_checkpoint(registry, filename, rng),
    }
}

fn fresh_wal_header(page_size: u32, rng: &mut impl RngCore) -> Result<[u8; WAL_HEADER_SIZE]> {
    let mut header = [0u8; WAL_HEADER_SIZE];
    header[0..4].copy_from_slice(&WAL_MAGIC.to_be_bytes());
    header[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
    header[8..12].copy_from_slice(&page_size.to_be_bytes());
    header[12..16].copy_from_slice(&0u32.to_be_bytes());
    let mut salt1 = [0u8; 4];
    let mut salt2 = [0u8; 4];
    rng.fill_bytes(&mut salt1);
    rng.fill_bytes(&mut salt2);
    header[16..20].copy_from_slice(&salt1);
    header[20..24].copy_from_slice(&salt2);
    let checksum = wal_checksum(true, &header[0..24], None)?;
    header[24..28].copy_from_slice(&checksum[0].to_be_bytes());
    header[28..32].copy_from_slice(&checksum[1].to_be_bytes());
    Ok(header)
}

fn apply_frames(
    registry: &Registry,
    filename: &str,
    page_size: u32,
    truncate: u32,
    is_commit: bool,
    frames: &[FrameRecord],
    rng: &mut impl RngCore,
) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }
    let handle = registry.open(&wal_name(filename), FileTag::Wal);
    let mut file = handle.lock();

    if file.wal_frame_count() == 0 {
        file.wal_set_header(fresh_wal_header(page_size, rng)?)?;
    }

    let header_bytes = *file.wal_header()?;
    let (salt1, salt2) = (
        u32::from_be_bytes(header_bytes[16..20].try_into().unwrap()),
        u32::from_be_bytes(header_bytes[20..24].try_into().unwrap()),
    );

    let mut running = [
        u32::from_be_bytes(header_bytes[24..28].try_into().unwrap()),
        u32::from_be_bytes(header_bytes[28..32].try_into().unwrap()),
    ];
    if let Some(last) = file.wal_frame_count().checked_sub(1) {
        running = last_frame_checksum(&file, last)?.unwrap_or(running);
    }

    for (i, record) in frames.iter().enumerate() {
        if record.data.len() != page_size as usize {
            return Err(Error::FormatInvalid {
                reason: format!(
                    "frame for page {} carried {} bytes, expected page_size {page_size}",
                    record.pgno,
                    record.data.len()
                ),
            });
        }
        let commit_marker = if is_commit && i + 1 == frames.len() {
            truncate
        } else {
            0
        };

        let mut frame_prefix = [0u8; 8];
        frame_prefix[0..4].copy_from_slice(&record.pgno.to_be_bytes());
        frame_prefix[4..8].copy_from_slice(&commit_marker.to_be_bytes());
        running = wal_checksum(true, &frame_prefix, Some(running))?;
        running = wal_checksum(true, &record.data, Some(running))?;

        let mut frame_header = [0u8; WAL_FRAME_HEADER_SIZE];
        frame_header[0..4].copy_from_slice(&record.pgno.to_be_bytes());
        frame_header[4..8].copy_from_slice(&commit_marker.to_be_bytes());
        frame_header[8..12].copy_from_slice(&salt1.to_be_bytes());
        frame_header[12..16].copy_from_slice(&salt2.to_be_bytes());
        frame_header[16..20].copy_from_slice(&running[0].to_be_bytes());
        frame_header[20..24].copy_from_slice(&running[1].to_be_bytes());

        file.wal_append_frame(frame_header, record.data.clone())?;
    }

    if is_commit {
        file.wal_mark_committed()?;
        registry.shm_for(filename).lock().invalidate();
        tracing::debug!(filename, frames = frames.len(), "applied committed WAL frames");
    } else {
        tracing::trace!(filename, frames = frames.len(), "applied uncommitted WAL frames");
    }
    Ok(())
}

/// The running checksum stored in the header of the frame at `index`, used
/// to continue the chain when more frames are appended to an existing WAL.
fn last_frame_checksum(
    file: &raftlite_vfs::File,
    index: usize,
) -> Result<Option<[u32; 2]>> {
    let page_size = file
        .page_size()
        .ok_or_else(|| Error::internal("page size unknown while chaining WAL checksum"))?;
    let mut header = [0u8; WAL_FRAME_HEADER_SIZE];
    let frame_offset =
        WAL_HEADER_SIZE as u64 + (index * (WAL_FRAME_HEADER_SIZE + page_size.as_usize())) as u64;
    let n = file.read(frame_offset, &mut header)?;
    if n < WAL_FRAME_HEADER_SIZE {
        return Ok(None);
    }
    Ok(Some([
        u32::from_be_bytes(header[16..20].try_into().unwrap()),
        u32::from_be_bytes(header[20..24].try_into().unwrap()),
    ]))
}

fn apply_checkpoint(registry: &Registry, filename: &str, rng: &mut impl RngCore) -> Result<()> {
    let handle = registry.open(&wal_name(filename), FileTag::Wal);
    let mut file = handle.lock();
    if file.wal_frame_count() == 0 {
        return Ok(());
    }
    let mut header = *file.wal_header()?;
    wal_restart_header(&mut header, rng)?;
    file.truncate(WAL_HEADER_SIZE as u64)?;
    file.wal_set_header(header)?;
    registry.shm_for(filename).lock().invalidate();
    tracing::info!(filename, "checkpoint applied, WAL truncated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn rng() -> StepRng {
        StepRng::new(0x1234_5678, 1)
    }

    #[test]
    fn open_creates_paired_files() {
        let registry = Registry::new();
        apply(
            &LogEntry::Open {
                filename: "a.db".into(),
                page_size: 4096,
            },
            &registry,
            &mut rng(),
        )
        .unwrap();
        assert!(registry.exists("a.db"));
        assert!(registry.exists("a.db-wal"));
    }

    #[test]
    fn frames_then_checkpoint_truncates_wal() {
        let registry = Registry::new();
        let mut r = rng();
        apply(
            &LogEntry::Open {
                filename: "a.db".into(),
                page_size: 512,
            },
            &registry,
            &mut r,
        )
        .unwrap();

        apply(
            &LogEntry::Frames {
                filename: "a.db".into(),
                page_size: 512,
                truncate: 1,
                is_commit: true,
                frames: vec![FrameRecord {
                    pgno: 1,
                    data: vec![7u8; 512],
                }],
            },
            &registry,
            &mut r,
        )
        .unwrap();

        let wal = registry.open("a.db-wal", FileTag::Wal);
        assert_eq!(wal.lock().wal_frame_count(), 1);

        apply(
            &LogEntry::Checkpoint {
                filename: "a.db".into(),
            },
            &registry,
            &mut r,
        )
        .unwrap();
        assert_eq!(wal.lock().wal_frame_count(), 0);
        assert_eq!(wal.lock().file_size(), WAL_HEADER_SIZE as u64);
    }

    #[test]
    fn undo_reverts_to_last_commit() {
        let registry = Registry::new();
        let mut r = rng();
        apply(
            &LogEntry::Open {
                filename: "a.db".into(),
                page_size: 512,
            },
            &registry,
            &mut r,
        )
        .unwrap();
        apply(
            &LogEntry::Frames {
                filename: "a.db".into(),
                page_size: 512,
                truncate: 1,
                is_commit: true,
                frames: vec![FrameRecord {
                    pgno: 1,
                    data: vec![1u8; 512],
                }],
            },
            &registry,
            &mut r,
        )
        .unwrap();
        apply(
            &LogEntry::Frames {
                filename: "a.db".into(),
                page_size: 512,
                truncate: 0,
                is_commit: false,
                frames: vec![FrameRecord {
                    pgno: 2,
                    data: vec![2u8; 512],
                }],
            },
            &registry,
            &mut r,
        )
        .unwrap();

        let wal = registry.open("a.db-wal", FileTag::Wal);
        assert_eq!(wal.lock().wal_frame_count(), 2);

        apply(
            &LogEntry::Undo {
                filename: "a.db".into(),
            },
            &registry,
            &mut r,
        )
        .unwrap();
        assert_eq!(wal.lock().wal_frame_count(), 1);
    }

    #[test]
    fn rejects_mismatched_page_size() {
        let registry = Registry::new();
        let mut r = rng();
        apply(
            &LogEntry::Open {
                filename: "a.db".into(),
                page_size: 512,
            },
            &registry,
            &mut r,
        )
        .unwrap();
        let result = apply(
            &LogEntry::Frames {
                filename: "a.db".into(),
                page_size: 512,
                truncate: 1,
                is_commit: true,
                frames: vec![FrameRecord {
                    pgno: 1,
                    data: vec![0u8; 128],
                }],
            },
            &registry,
            &mut r,
        );
        assert!(result.is_err());
    }
}
