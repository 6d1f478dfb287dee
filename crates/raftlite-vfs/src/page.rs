//! Page storage for an in-memory file (spec §3, C3).
//!
//! A database file's pages are plain bytes. A WAL file's pages are split
//! into a 24-byte frame header and the page payload, mirroring
//! `examples/original_source/src/vfs.c`'s `struct vfsPage` (`buf`/`hdr`
//! kept separate rather than concatenated) — the replication hook reads the
//! header alone to learn the commit marker without touching the payload.
#[derive(Debug, Clone)]
pub enum Page {
    /// A database-file page: raw bytes, `page_size` long once the page size
    /// is known.
    Plain(Vec<u8>),
    /// A WAL frame: a fixed 24-byte header plus a `page_size`-long payload.
    Frame {
        header: [u8; raftlite_types::WAL_FRAME_HEADER_SIZE],
        data: Vec<u8>,
    },
}

impl Page {
    #[must_use]
    pub fn new_plain(page_size: usize) -> Self {
        Self::Plain(vec![0u8; page_size])
    }

    #[must_use]
    pub fn new_frame(page_size: usize) -> Self {
        Self::Frame {
            header: [0u8; raftlite_types::WAL_FRAME_HEADER_SIZE],
            data: vec![0u8; page_size],
        }
    }

    /// Total length in bytes: the payload alone for a plain page, header +
    /// payload for a WAL frame.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Plain(data) => data.len(),
            Self::Frame { header, data } => header.len() + data.len(),
        }
    }

    /// Copy `len` bytes starting at `within_offset` (relative to the start
    /// of this page/frame) into `dst`. Returns the number of bytes copied.
    #[must_use]
    pub fn read_at(&self, within_offset: usize, dst: &mut [u8]) -> usize {
        let bytes = self.as_contiguous();
        copy_overlap(&bytes, within_offset, dst)
    }

    /// Copy `src` into this page/frame starting at `within_offset`,
    /// growing the payload if the write extends past its current length.
    pub fn write_at(&mut self, within_offset: usize, src: &[u8]) {
        match self {
            Self::Plain(data) => write_overlap(data, within_offset, src),
            Self::Frame { header, data } => {
                let header_len = header.len();
                if within_offset < header_len {
                    let head_src_len = src.len().min(header_len - within_offset);
                    header[within_offset..within_offset + head_src_len]
                        .copy_from_slice(&src[..head_src_len]);
                    if src.len() > head_src_len {
                        write_overlap(data, 0, &src[head_src_len..]);
                    }
                } else {
                    write_overlap(data, within_offset - header_len, src);
                }
            }
        }
    }

    pub(crate) fn as_contiguous(&self) -> Vec<u8> {
        match self {
            Self::Plain(data) => data.clone(),
            Self::Frame { header, data } => {
                let mut out = Vec::with_capacity(header.len() + data.len());
                out.extend_from_slice(header);
                out.extend_from_slice(data);
                out
            }
        }
    }
}

fn copy_overlap(src: &[u8], within_offset: usize, dst: &mut [u8]) -> usize {
    if within_offset >= src.len() {
        return 0;
    }
    let n = dst.len().min(src.len() - within_offset);
    dst[..n].copy_from_slice(&src[within_offset..within_offset + n]);
    n
}

fn write_overlap(buf: &mut Vec<u8>, within_offset: usize, src: &[u8]) {
    let needed = within_offset + src.len();
    if needed > buf.len() {
        buf.resize(needed, 0);
    }
    buf[within_offset..needed].copy_from_slice(src);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_page_round_trips() {
        let mut page = Page::new_plain(16);
        page.write_at(4, &[1, 2, 3]);
        let mut out = [0u8; 3];
        assert_eq!(page.read_at(4, &mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn frame_write_spanning_header_and_payload() {
        let mut frame = Page::new_frame(8);
        let payload = [9u8; 30];
        frame.write_at(20, &payload);
        let mut out = [0u8; 30];
        assert_eq!(frame.read_at(20, &mut out), 30);
        assert_eq!(out, payload);
        if let Page::Frame { header, .. } = &frame {
            assert_eq!(header[20..24], [9, 9, 9, 9]);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn read_past_end_returns_zero() {
        let page = Page::new_plain(4);
        let mut out = [0u8; 4];
        assert_eq!(page.read_at(10, &mut out), 0);
    }
}
