//! A single in-memory file: a database, a (never-used) rollback journal, or
//! a WAL, keyed by name in the [`crate::registry::Registry`].
//!
//! WAL files keep their 32-byte header separate from their frames, and
//! frames keep their 24-byte header separate from their page payload
//! (`examples/original_source/src/vfs.c`'s `vfsPage` split) — this lets the
//! replication hook inspect a frame's commit marker by slicing the header
//! alone. Database and journal files are one flat byte buffer, since
//! nothing needs to address them a page at a time.

use raftlite_error::{Error, Result};
use raftlite_format::{db_page_size, wal_frame_calc_pgno, wal_page_size};
use raftlite_types::{DB_HEADER_SIZE, FileTag, PageSize, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE};

use crate::page::Page;

#[derive(Debug)]
enum Storage {
    Flat(Vec<u8>),
    Wal {
        header: [u8; WAL_HEADER_SIZE],
        frames: Vec<Page>,
        /// Frame count as of the last entry with `is_commit = true`; `Undo`
        /// rolls `frames` back to this length.
        committed_frame_count: usize,
    },
}

/// An open in-memory file. Cheap to clone the handle (see
/// [`crate::registry::Registry`]); the bytes live behind a lock shared by
/// every connection with the file open.
#[derive(Debug)]
pub struct File {
    pub tag: FileTag,
    page_size: Option<PageSize>,
    storage: Storage,
    pub delete_on_close: bool,
}

impl File {
    #[must_use]
    pub fn new(tag: FileTag) -> Self {
        let storage = match tag {
            FileTag::Wal => Storage::Wal {
                header: [0u8; WAL_HEADER_SIZE],
                frames: Vec::new(),
                committed_frame_count: 0,
            },
            FileTag::Database | FileTag::Journal => Storage::Flat(Vec::new()),
        };
        Self {
            tag,
            page_size: None,
            storage,
            delete_on_close: false,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> Option<PageSize> {
        self.page_size
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        match &self.storage {
            Storage::Flat(buf) => buf.len() as u64,
            Storage::Wal { header, frames, .. } => {
                if frames.is_empty() && header.iter().all(|&b| b == 0) {
                    return 0;
                }
                let page_size = self.page_size.map_or(0, PageSize::as_usize);
                header.len() as u64 + (frames.len() * (WAL_FRAME_HEADER_SIZE + page_size)) as u64
            }
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.tag == FileTag::Journal {
            return Err(Error::IoBoundary {
                reason: "journal files are never read back; only WAL mode is supported".into(),
            });
        }
        match &self.storage {
            Storage::Flat(data) => {
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(0);
                }
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                Ok(n)
            }
            Storage::Wal { header, frames, .. } => {
                if (offset as usize) < header.len() {
                    let avail = header.len() - offset as usize;
                    let n = buf.len().min(avail);
                    buf[..n].copy_from_slice(&header[offset as usize..offset as usize + n]);
                    return Ok(n);
                }
                let page_size = self.page_size.ok_or_else(|| {
                    Error::IoBoundary {
                        reason: "read from WAL frame region before page size is known".into(),
                    }
                })?;
                let index = wal_frame_calc_pgno(page_size, offset)? as usize - 1;
                let Some(frame) = frames.get(index) else {
                    return Ok(0);
                };
                let stride = WAL_FRAME_HEADER_SIZE + page_size.as_usize();
                let frame_start = header.len() as u64 + (index * stride) as u64;
                let within = (offset - frame_start) as usize;
                Ok(frame.read_at(within, buf))
            }
        }
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        match (&mut self.storage, self.tag) {
            (Storage::Flat(buf), FileTag::Journal) => {
                // Rollback journals are never replayed (WAL mode only), so
                // their contents don't matter; accept any write silently.
                let offset = offset as usize;
                let needed = offset + data.len();
                if needed > buf.len() {
                    buf.resize(needed, 0);
                }
                buf[offset..needed].copy_from_slice(data);
                Ok(())
            }
            (Storage::Flat(buf), _) => {
                let offset = offset as usize;
                match self.page_size {
                    None => {
                        if offset != 0 || data.len() < DB_HEADER_SIZE {
                            return Err(Error::IoBoundary {
                                reason: "first database write must cover the header at offset 0"
                                    .into(),
                            });
                        }
                        self.page_size = Some(db_page_size(data)?);
                    }
                    Some(page_size) => {
                        let page_size_bytes = page_size.as_usize();
                        if offset % page_size_bytes != 0 {
                            return Err(Error::IoBoundary {
                                reason: "database write offset is not page-aligned".into(),
                            });
                        }
                        if data.len() != page_size_bytes {
                            return Err(Error::IoBoundary {
                                reason: "database write must cover exactly one page".into(),
                            });
                        }
                        let page_no = (offset / page_size_bytes) as u32 + 1;
                        let current_count = (buf.len() / page_size_bytes) as u32;
                        if page_no > current_count + 1 {
                            return Err(Error::IoBoundary {
                                reason: format!(
                                    "database pages must be written in ascending order (got page {page_no}, have {current_count})"
                                ),
                            });
                        }
                    }
                }
                let needed = offset + data.len();
                if needed > buf.len() {
                    buf.resize(needed, 0);
                }
                buf[offset..needed].copy_from_slice(data);
                Ok(())
            }
            (Storage::Wal { header, frames, .. }, _) => {
                if (offset as usize) < header.len() {
                    if offset as usize + data.len() > header.len() {
                        return Err(Error::IoBoundary {
                            reason: "write straddles the WAL header boundary".into(),
                        });
                    }
                    header[offset as usize..offset as usize + data.len()].copy_from_slice(data);
                    if self.page_size.is_none() {
                        if let Ok(ps) = wal_page_size(header) {
                            self.page_size = Some(ps);
                        }
                    }
                    return Ok(());
                }
                let page_size = self.page_size.ok_or_else(|| Error::IoBoundary {
                    reason: "write to WAL frame region before page size is known".into(),
                })?;
                let index = wal_frame_calc_pgno(page_size, offset)? as usize - 1;
                let stride = WAL_FRAME_HEADER_SIZE + page_size.as_usize();
                let frame_start = header.len() as u64 + (index * stride) as u64;
                let within = (offset - frame_start) as usize;
                if frames.len() <= index {
                    frames.resize_with(index + 1, || Page::new_frame(page_size.as_usize()));
                }
                frames[index].write_at(within, data);
                Ok(())
            }
        }
    }

    /// Shrinks a file, per spec §4.3's Truncate rules: DATABASE truncation
    /// must land on a page boundary, WAL truncation is only ever accepted
    /// at `size == 0`, and journals reject truncation outright (they are
    /// never read back, so there is nothing meaningful to shrink).
    /// Truncation never grows a file.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        match (&mut self.storage, self.tag) {
            (Storage::Flat(_), FileTag::Journal) => Err(Error::IoBoundary {
                reason: "journal files reject truncation".into(),
            }),
            (Storage::Flat(buf), _) => {
                let size = size as usize;
                if size > buf.len() {
                    return Err(Error::IoBoundary {
                        reason: "truncate may only shrink a file".into(),
                    });
                }
                if size == 0 {
                    self.page_size = None;
                } else {
                    let page_size_bytes = self
                        .page_size
                        .ok_or_else(|| Error::IoBoundary {
                            reason: "database truncate before page size is known".into(),
                        })?
                        .as_usize();
                    if size % page_size_bytes != 0 {
                        return Err(Error::IoBoundary {
                            reason: "database truncate size is not a whole number of pages".into(),
                        });
                    }
                }
                buf.resize(size, 0);
                Ok(())
            }
            (Storage::Wal { header, frames, committed_frame_count }, _) => {
                if size != 0 {
                    return Err(Error::IoBoundary {
                        reason: "WAL truncation is only permitted to zero pages".into(),
                    });
                }
                frames.clear();
                *committed_frame_count = 0;
                *header = [0u8; WAL_HEADER_SIZE];
                Ok(())
            }
        }
    }

    /// Number of committed frames currently stored (`Wal` files only).
    #[must_use]
    pub fn wal_frame_count(&self) -> usize {
        match &self.storage {
            Storage::Wal { frames, .. } => frames.len(),
            Storage::Flat(_) => 0,
        }
    }

    /// Raw header bytes (`Wal` files only).
    pub fn wal_header(&self) -> Result<&[u8; WAL_HEADER_SIZE]> {
        match &self.storage {
            Storage::Wal { header, .. } => Ok(header),
            Storage::Flat(_) => Err(Error::internal("wal_header called on a non-WAL file")),
        }
    }

    /// Mark every frame currently stored as committed; used by the
    /// replication apply path once a `Frames` entry with `is_commit = true`
    /// has been fully written.
    pub fn wal_mark_committed(&mut self) -> Result<()> {
        match &mut self.storage {
            Storage::Wal {
                frames,
                committed_frame_count,
                ..
            } => {
                *committed_frame_count = frames.len();
                Ok(())
            }
            Storage::Flat(_) => Err(Error::internal("wal_mark_committed called on a non-WAL file")),
        }
    }

    /// Roll back to the last committed frame count, discarding any frames
    /// written by an aborted or undone transaction.
    pub fn wal_undo(&mut self) -> Result<()> {
        match &mut self.storage {
            Storage::Wal {
                frames,
                committed_frame_count,
                ..
            } => {
                frames.truncate(*committed_frame_count);
                Ok(())
            }
            Storage::Flat(_) => Err(Error::internal("wal_undo called on a non-WAL file")),
        }
    }

    /// Append one frame (header + page payload) after the last frame
    /// currently stored, used by the replication apply path instead of
    /// going through SQLite's own `xWrite` offsets.
    pub fn wal_append_frame(
        &mut self,
        header: [u8; WAL_FRAME_HEADER_SIZE],
        data: Vec<u8>,
    ) -> Result<()> {
        match &mut self.storage {
            Storage::Wal { frames, .. } => {
                frames.push(Page::Frame { header, data });
                Ok(())
            }
            Storage::Flat(_) => Err(Error::internal("wal_append_frame called on a non-WAL file")),
        }
    }

    /// Bulk snapshot API (spec §4.3): the file's full byte image, for a
    /// Raft snapshot to carry across the wire. A WAL file serializes as its
    /// header followed by each frame's header+page, back to back — the
    /// same layout an unbroken ascending run of `xWrite` calls would
    /// produce.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        match &self.storage {
            Storage::Flat(buf) => buf.clone(),
            Storage::Wal { header, frames, .. } => {
                let mut out = Vec::with_capacity(
                    header.len() + frames.iter().map(Page::byte_len).sum::<usize>(),
                );
                out.extend_from_slice(header);
                for frame in frames {
                    out.extend_from_slice(&frame.as_contiguous());
                }
                out
            }
        }
    }

    /// Install a snapshot produced by [`File::snapshot`], replacing this
    /// file's contents outright. Unlike [`File::write`], a restore doesn't
    /// validate page alignment or ascending page order — the bytes are
    /// already a consistent image, not an incremental `xWrite` stream.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        match self.tag {
            FileTag::Database | FileTag::Journal => {
                self.page_size = db_page_size(bytes).ok();
                self.storage = Storage::Flat(bytes.to_vec());
                Ok(())
            }
            FileTag::Wal => {
                if bytes.is_empty() {
                    self.page_size = None;
                    self.storage = Storage::Wal {
                        header: [0u8; WAL_HEADER_SIZE],
                        frames: Vec::new(),
                        committed_frame_count: 0,
                    };
                    return Ok(());
                }
                if bytes.len() < WAL_HEADER_SIZE {
                    return Err(Error::FormatInvalid {
                        reason: "WAL snapshot is shorter than the header".into(),
                    });
                }
                let mut header = [0u8; WAL_HEADER_SIZE];
                header.copy_from_slice(&bytes[..WAL_HEADER_SIZE]);
                let page_size = wal_page_size(&header)?;
                let stride = WAL_FRAME_HEADER_SIZE + page_size.as_usize();
                let rest = &bytes[WAL_HEADER_SIZE..];
                if rest.len() % stride != 0 {
                    return Err(Error::FormatInvalid {
                        reason: "WAL snapshot frame region is not a whole number of frames".into(),
                    });
                }
                let frames = rest
                    .chunks_exact(stride)
                    .map(|chunk| {
                        let mut frame_header = [0u8; WAL_FRAME_HEADER_SIZE];
                        frame_header.copy_from_slice(&chunk[..WAL_FRAME_HEADER_SIZE]);
                        Page::Frame {
                            header: frame_header,
                            data: chunk[WAL_FRAME_HEADER_SIZE..].to_vec(),
                        }
                    })
                    .collect::<Vec<_>>();
                let committed_frame_count = frames.len();
                self.page_size = Some(page_size);
                self.storage = Storage::Wal {
                    header,
                    frames,
                    committed_frame_count,
                };
                Ok(())
            }
        }
    }

    /// Overwrite the 32-byte WAL header in place (used when a fresh
    /// checkpoint epoch begins, or by `wal_restart_header`).
    pub fn wal_set_header(&mut self, bytes: [u8; WAL_HEADER_SIZE]) -> Result<()> {
        match &mut self.storage {
            Storage::Wal { header, .. } => {
                *header = bytes;
                if let Ok(ps) = wal_page_size(header) {
                    self.page_size = Some(ps);
                }
                Ok(())
            }
            Storage::Flat(_) => Err(Error::internal("wal_set_header called on a non-WAL file")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_writes_are_accepted_and_grow_the_file() {
        let mut f = File::new(FileTag::Journal);
        f.write(10, &[1, 2, 3]).unwrap();
        assert_eq!(f.file_size(), 13);
    }

    #[test]
    fn journal_reads_always_fail() {
        let f = File::new(FileTag::Journal);
        let mut out = [0u8; 4];
        assert!(f.read(0, &mut out).is_err());
    }

    #[test]
    fn flat_read_past_end_returns_zero_bytes() {
        let f = File::new(FileTag::Database);
        let mut out = [0u8; 4];
        assert_eq!(f.read(0, &mut out).unwrap(), 0);
    }

    #[test]
    fn database_first_write_locks_page_size_from_header() {
        let mut f = File::new(FileTag::Database);
        let mut page1 = vec![0u8; 512];
        page1[16..18].copy_from_slice(&512u16.to_be_bytes());
        f.write(0, &page1).unwrap();
        assert_eq!(f.page_size().unwrap().get(), 512);
    }

    #[test]
    fn database_write_rejects_misaligned_offset() {
        let mut f = File::new(FileTag::Database);
        let mut page1 = vec![0u8; 512];
        page1[16..18].copy_from_slice(&512u16.to_be_bytes());
        f.write(0, &page1).unwrap();
        assert!(f.write(100, &vec![0u8; 512]).is_err());
    }

    #[test]
    fn database_write_rejects_out_of_order_page() {
        let mut f = File::new(FileTag::Database);
        let mut page1 = vec![0u8; 512];
        page1[16..18].copy_from_slice(&512u16.to_be_bytes());
        f.write(0, &page1).unwrap();
        // Page 3 before page 2 has ever been written.
        assert!(f.write(1024, &vec![0u8; 512]).is_err());
        f.write(512, &vec![0u8; 512]).unwrap();
    }

    #[test]
    fn wal_header_write_establishes_page_size() {
        let mut f = File::new(FileTag::Wal);
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&4096u32.to_be_bytes());
        f.write(0, &header).unwrap();
        assert_eq!(f.page_size().unwrap().get(), 4096);
    }

    #[test]
    fn wal_frame_round_trips_after_header() {
        let mut f = File::new(FileTag::Wal);
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&512u32.to_be_bytes());
        f.write(0, &header).unwrap();

        let frame_offset = WAL_HEADER_SIZE as u64;
        let mut frame_bytes = vec![0u8; WAL_FRAME_HEADER_SIZE + 512];
        frame_bytes[0..4].copy_from_slice(&1u32.to_be_bytes());
        frame_bytes[WAL_FRAME_HEADER_SIZE..].fill(0xAB);
        f.write(frame_offset, &frame_bytes).unwrap();

        assert_eq!(f.wal_frame_count(), 1);
        let mut out = vec![0u8; frame_bytes.len()];
        assert_eq!(f.read(frame_offset, &mut out).unwrap(), out.len());
        assert_eq!(out, frame_bytes);
    }

    #[test]
    fn wal_truncate_to_zero_clears_frames_and_header() {
        let mut f = File::new(FileTag::Wal);
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&512u32.to_be_bytes());
        f.write(0, &header).unwrap();
        f.write(
            WAL_HEADER_SIZE as u64,
            &vec![0u8; WAL_FRAME_HEADER_SIZE + 512],
        )
        .unwrap();
        assert_eq!(f.wal_frame_count(), 1);

        f.truncate(0).unwrap();
        assert_eq!(f.wal_frame_count(), 0);
        assert!(f.wal_header().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn wal_truncate_rejects_nonzero_size() {
        let mut f = File::new(FileTag::Wal);
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&512u32.to_be_bytes());
        f.write(0, &header).unwrap();
        assert!(f.truncate(WAL_HEADER_SIZE as u64).is_err());
    }

    #[test]
    fn database_truncate_requires_page_aligned_size() {
        let mut f = File::new(FileTag::Database);
        let mut page1 = vec![0u8; 512];
        page1[16..18].copy_from_slice(&512u16.to_be_bytes());
        f.write(0, &page1).unwrap();
        f.write(512, &vec![0u8; 512]).unwrap();

        assert!(f.truncate(700).is_err());
        f.truncate(512).unwrap();
        assert_eq!(f.file_size(), 512);
    }

    #[test]
    fn database_snapshot_round_trips() {
        let mut f = File::new(FileTag::Database);
        let mut page1 = vec![0u8; 512];
        page1[16..18].copy_from_slice(&512u16.to_be_bytes());
        f.write(0, &page1).unwrap();
        f.write(512, &vec![9u8; 512]).unwrap();

        let snapshot = f.snapshot();
        let mut restored = File::new(FileTag::Database);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.page_size().unwrap().get(), 512);
    }

    #[test]
    fn wal_snapshot_round_trips() {
        let mut f = File::new(FileTag::Wal);
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&512u32.to_be_bytes());
        f.write(0, &header).unwrap();
        f.write(
            WAL_HEADER_SIZE as u64,
            &vec![0xCDu8; WAL_FRAME_HEADER_SIZE + 512],
        )
        .unwrap();

        let snapshot = f.snapshot();
        let mut restored = File::new(FileTag::Wal);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.wal_frame_count(), 1);
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn wal_restore_rejects_partial_frame_region() {
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&512u32.to_be_bytes());
        let mut bytes = header.to_vec();
        bytes.extend(vec![0u8; WAL_FRAME_HEADER_SIZE + 511]);

        let mut f = File::new(FileTag::Wal);
        assert!(f.restore(&bytes).is_err());
    }
}
