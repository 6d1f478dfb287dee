//! SQLite on-disk header/frame codec (C1) and the WAL marshalling page
//! buffer (C2).

mod buffer;
mod codec;

pub use buffer::PageBuffer;
pub use codec::{
    WAL_MAGIC, db_page_size, decode_page_size, wal_checkpoint_seq, wal_checksum,
    wal_checksum_is_bigendian, wal_frame_calc_pgno, wal_frame_commit_marker,
    wal_frame_page_number, wal_magic, wal_page_size, wal_restart_header, wal_salts,
};
