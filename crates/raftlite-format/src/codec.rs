//! Pure functions over SQLite database/WAL header and frame bytes.
//!
//! Every multi-byte integer in a SQLite header is big-endian (spec §4.1,
//! §6). These functions never allocate and never panic on untrusted bytes —
//! malformed input produces [`Error::FormatInvalid`], never a `panic!`.

use raftlite_error::{Error, Result};
use raftlite_types::{PageSize, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE};

/// WAL magic constant (`dqlite`/SQLite's `FORMAT__WAL_MAGIC`). The low bit is
/// overlaid with the checksum byte-order flag.
pub const WAL_MAGIC: u32 = 0x377f_0682;

fn get_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn put_u32(v: u32, buf: &mut [u8]) {
    buf[..4].copy_from_slice(&v.to_be_bytes());
}

/// Decode a raw 4-byte page-size field. The value `1` denotes `65536`;
/// anything else must already be a valid [`PageSize`].
#[must_use]
pub fn decode_page_size(field: [u8; 4]) -> Option<PageSize> {
    let raw = u32::from_be_bytes(field);
    if raw == 1 {
        return PageSize::new(PageSize::MAX);
    }
    PageSize::new(raw)
}

/// Page size recorded in a database header (bytes 16–17, big-endian,
/// zero-padded to 4 bytes).
pub fn db_page_size(header: &[u8]) -> Result<PageSize> {
    if header.len() < 18 {
        return Err(Error::FormatInvalid {
            reason: "database header shorter than 18 bytes".into(),
        });
    }
    decode_page_size([0, 0, header[16], header[17]]).ok_or_else(|| Error::FormatInvalid {
        reason: "invalid database page size field".into(),
    })
}

/// Page size recorded in a WAL header (bytes 8–11, big-endian).
pub fn wal_page_size(header: &[u8]) -> Result<PageSize> {
    if header.len() < WAL_HEADER_SIZE {
        return Err(Error::FormatInvalid {
            reason: "WAL header shorter than 32 bytes".into(),
        });
    }
    decode_page_size([header[8], header[9], header[10], header[11]]).ok_or_else(|| {
        Error::FormatInvalid {
            reason: "invalid WAL page size field".into(),
        }
    })
}

/// Magic value recorded at the start of a WAL header.
pub fn wal_magic(header: &[u8]) -> Result<u32> {
    if header.len() < 4 {
        return Err(Error::FormatInvalid {
            reason: "WAL header too short for magic".into(),
        });
    }
    Ok(get_u32(&header[0..4]))
}

/// Whether the recorded magic says per-frame checksums use big-endian
/// 32-bit words (the low bit of the magic, spec §6).
#[must_use]
pub const fn wal_checksum_is_bigendian(magic: u32) -> bool {
    magic & 1 != 0
}

/// Checkpoint sequence number recorded in a WAL header (bytes 12–15).
pub fn wal_checkpoint_seq(header: &[u8]) -> Result<u32> {
    if header.len() < WAL_HEADER_SIZE {
        return Err(Error::FormatInvalid {
            reason: "WAL header shorter than 32 bytes".into(),
        });
    }
    Ok(get_u32(&header[12..16]))
}

/// Salts recorded in a WAL header (bytes 16–19 and 20–23).
pub fn wal_salts(header: &[u8]) -> Result<(u32, u32)> {
    if header.len() < WAL_HEADER_SIZE {
        return Err(Error::FormatInvalid {
            reason: "WAL header shorter than 32 bytes".into(),
        });
    }
    Ok((get_u32(&header[16..20]), get_u32(&header[20..24])))
}

/// Page number recorded at the start of a 24-byte WAL frame header.
pub fn wal_frame_page_number(frame_header: &[u8]) -> Result<u32> {
    if frame_header.len() < 4 {
        return Err(Error::FormatInvalid {
            reason: "WAL frame header too short".into(),
        });
    }
    Ok(get_u32(&frame_header[0..4]))
}

/// Commit marker recorded in a WAL frame header: the database size in pages
/// after the transaction commits, or `0` if this frame is not a commit
/// record.
pub fn wal_frame_commit_marker(frame_header: &[u8]) -> Result<u32> {
    if frame_header.len() < 8 {
        return Err(Error::FormatInvalid {
            reason: "WAL frame header too short".into(),
        });
    }
    Ok(get_u32(&frame_header[4..8]))
}

/// Given a byte offset into a WAL file, compute the 1-based frame index
/// that offset falls within.
pub fn wal_frame_calc_pgno(page_size: PageSize, file_offset: u64) -> Result<u32> {
    if file_offset < WAL_HEADER_SIZE as u64 {
        return Err(Error::IoBoundary {
            reason: "offset precedes the WAL header".into(),
        });
    }
    let stride = (WAL_FRAME_HEADER_SIZE + page_size.as_usize()) as u64;
    let rel = file_offset - WAL_HEADER_SIZE as u64;
    let frame_index = rel / stride + 1;
    u32::try_from(frame_index).map_err(|_| Error::internal("frame index overflowed u32"))
}

/// The SQLite WAL rolling checksum (a Fletcher-like sum over 32-bit words).
///
/// `native` selects whether each 4-byte word is read via the host's native
/// byte order or its byte-swapped counterpart — this mirrors SQLite's own
/// checksum routine, which is intentionally endianness-sensitive: a WAL
/// written on a big-endian host and read on a little-endian one needs the
/// caller to flip `native` to get matching checksums. `data.len()` must be a
/// positive multiple of 8, no greater than 65536.
pub fn wal_checksum(native: bool, data: &[u8], prev: Option<[u32; 2]>) -> Result<[u32; 2]> {
    let n = data.len();
    if n == 0 || n % 8 != 0 || n > 65536 {
        return Err(Error::internal(format!(
            "wal_checksum: length {n} is not a positive multiple of 8 no greater than 65536"
        )));
    }

    let [mut s1, mut s2] = prev.unwrap_or([0, 0]);
    for chunk in data.chunks_exact(8) {
        let w0 = read_word(native, [chunk[0], chunk[1], chunk[2], chunk[3]]);
        let w1 = read_word(native, [chunk[4], chunk[5], chunk[6], chunk[7]]);
        s1 = s1.wrapping_add(w0).wrapping_add(s2);
        s2 = s2.wrapping_add(w1).wrapping_add(s1);
    }
    Ok([s1, s2])
}

fn read_word(native: bool, bytes: [u8; 4]) -> u32 {
    let v = u32::from_ne_bytes(bytes);
    if native { v } else { v.swap_bytes() }
}

/// Rotate a WAL header for a new checkpoint epoch: bump the checkpoint
/// sequence, bump `salt1`, replace `salt2` with fresh randomness, and
/// recompute the header checksum over the first 24 bytes.
///
/// Only `salt2` is randomized; `salt1` is merely incremented. The header
/// checksum is always computed in the native-word convention, independent
/// of the file's own recorded checksum byte order (resolved from
/// `examples/original_source/src/format.c`'s `formatWalRestartHeader`).
pub fn wal_restart_header(header: &mut [u8], rng: &mut impl rand::RngCore) -> Result<()> {
    if header.len() < WAL_HEADER_SIZE {
        return Err(Error::FormatInvalid {
            reason: "WAL header shorter than 32 bytes".into(),
        });
    }

    let checkpoint = get_u32(&header[12..16]).wrapping_add(1);
    put_u32(checkpoint, &mut header[12..16]);

    let salt1 = get_u32(&header[16..20]).wrapping_add(1);
    put_u32(salt1, &mut header[16..20]);

    let mut salt2 = [0u8; 4];
    rng.fill_bytes(&mut salt2);
    header[20..24].copy_from_slice(&salt2);

    let checksum = wal_checksum(true, &header[0..24], None)?;
    put_u32(checksum[0], &mut header[24..28]);
    put_u32(checksum[1], &mut header[28..32]);

    tracing::trace!(checkpoint, salt1, "wal_restart_header rotated");
    Ok(())
}
