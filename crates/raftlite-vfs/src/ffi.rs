//! Registers the in-memory VFS with SQLite's C layer.
//!
//! Structurally modeled on `orbitinghail-sqlsync`'s `sqlite-vfs` crate (see
//! `examples/orbitinghail-sqlsync/lib/sqlite-vfs/src/lib.rs`): a
//! `sqlite3_io_methods` table of `extern "C" fn`s that recover a Rust
//! `&mut FileHandle` from the leading `sqlite3_file` pointer SQLite hands
//! back on every call. Unlike that crate we don't expose a generic `Vfs`
//! trait — there is exactly one VFS implementation, so the callbacks talk
//! to [`crate::registry::Registry`] directly.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use raftlite_error::sqlite_rc;
use raftlite_types::{FileTag, OpenFlags, SHM_REGION_SIZE, ShmLockFlags, SyncFlags};
use rusqlite::ffi;

use crate::file::File;
use crate::registry::Registry;
use crate::shm::{ShmLockState, SharedMemory};

/// Bytes SQLite reserves at the front of every `sqlite3_file` it hands a
/// VFS; our handle is allocated with room for the C header plus this
/// struct immediately after it.
#[repr(C)]
struct FileHandle {
    base: ffi::sqlite3_file,
    name: String,
    tag: FileTag,
    file: Arc<Mutex<File>>,
    shm: Option<Arc<Mutex<SharedMemory>>>,
    shm_lock_state: ShmLockState,
    delete_on_close: bool,
    registry: Arc<Registry>,
}

unsafe fn handle_mut<'a>(file: *mut ffi::sqlite3_file) -> &'a mut FileHandle {
    &mut *file.cast::<FileHandle>()
}

extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    unsafe {
        let handle = handle_mut(file);
        if let Some(shm) = &handle.shm {
            shm.lock().release_all(&mut handle.shm_lock_state);
        }
        handle.registry.close(&handle.name);
        if handle.delete_on_close {
            // Deletion is best-effort on close: a still-referenced file
            // (another connection has it open) simply stays around until
            // its last reference drops.
            let _ = handle.registry.delete(&handle.name);
        }
        ptr::drop_in_place(file.cast::<FileHandle>());
    }
    sqlite_rc::OK
}

extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let handle = unsafe { handle_mut(file) };
    let out = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), amt as usize) };
    match handle.file.lock().read(offset as u64, out) {
        Ok(n) if n == out.len() => sqlite_rc::OK,
        Ok(n) => {
            out[n..].fill(0);
            sqlite_rc::IOERR_SHORT_READ
        }
        Err(_) => sqlite_rc::IOERR_READ,
    }
}

extern "C" fn x_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let handle = unsafe { handle_mut(file) };
    let data = unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), amt as usize) };
    match handle.file.lock().write(offset as u64, data) {
        Ok(()) => sqlite_rc::OK,
        Err(_) => sqlite_rc::IOERR_WRITE,
    }
}

extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    let handle = unsafe { handle_mut(file) };
    match handle.file.lock().truncate(size as u64) {
        Ok(()) => sqlite_rc::OK,
        Err(_) => sqlite_rc::IOERR_TRUNCATE,
    }
}

extern "C" fn x_sync(_file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    // Nothing to flush: every file lives in process memory already. The
    // flags still get decoded so a future real-disk VFS swap only has to
    // fill in the match arms, not reinvent the bitflags.
    let _ = SyncFlags::from_bits_truncate(flags as u32);
    sqlite_rc::OK
}

extern "C" fn x_file_size(file: *mut ffi::sqlite3_file, size_out: *mut ffi::sqlite3_int64) -> c_int {
    let handle = unsafe { handle_mut(file) };
    unsafe { *size_out = handle.file.lock().file_size() as ffi::sqlite3_int64 };
    sqlite_rc::OK
}

extern "C" fn x_lock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    sqlite_rc::OK
}

extern "C" fn x_unlock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    sqlite_rc::OK
}

extern "C" fn x_check_reserved_lock(_file: *mut ffi::sqlite3_file, res_out: *mut c_int) -> c_int {
    unsafe { *res_out = 0 };
    sqlite_rc::OK
}

/// Write an error message back through a `SQLITE_FCNTL_PRAGMA` argument
/// array, the way real SQLite VFS file-control handlers do: allocated with
/// `sqlite3_mprintf` so SQLite's own `sqlite3_free` on the result is the
/// correct deallocator.
unsafe fn set_pragma_error(args: *mut *mut c_char, msg: &str) {
    let (Ok(fmt), Ok(c_msg)) = (CString::new("%s"), CString::new(msg)) else {
        return;
    };
    unsafe {
        *args = ffi::sqlite3_mprintf(fmt.as_ptr(), c_msg.as_ptr());
    }
}

/// Handles the two pragmas spec §4.3's File control section names;
/// anything else returns `SQLITE_NOTFOUND` so SQLite falls back to its own
/// handling. Modeled on `orbitinghail-sqlsync`'s `sqlite-vfs` crate's
/// `x_file_control` (see `examples/other_examples/1385204d_orbitinghail-sqlite-plugin__src-vfs.rs.rs`):
/// the `arg` pointer is SQLite's 3-element `char**` — `[0]` an error
/// message we may fill in, `[1]` the pragma name, `[2]` its value or null.
extern "C" fn x_file_control(file: *mut ffi::sqlite3_file, op: c_int, arg: *mut c_void) -> c_int {
    if op != ffi::SQLITE_FCNTL_PRAGMA {
        return sqlite_rc::NOTFOUND;
    }
    let handle = unsafe { handle_mut(file) };
    let args = arg.cast::<*mut c_char>();
    let name = unsafe { CStr::from_ptr(*args.add(1)) }
        .to_string_lossy()
        .to_ascii_lowercase();
    let value_ptr = unsafe { *args.add(2) };
    let value = (!value_ptr.is_null())
        .then(|| unsafe { CStr::from_ptr(value_ptr) }.to_string_lossy().into_owned());

    match name.as_str() {
        "page_size" => {
            let Some(value) = value else {
                return sqlite_rc::NOTFOUND;
            };
            let Some(requested) = value.parse::<u32>().ok().and_then(raftlite_types::PageSize::new)
            else {
                unsafe { set_pragma_error(args, "invalid page_size value") };
                return sqlite_rc::ERROR;
            };
            if let Some(locked) = handle.file.lock().page_size() {
                if locked != requested {
                    unsafe {
                        set_pragma_error(
                            args,
                            "page size is already locked by the first database write",
                        );
                    }
                    return sqlite_rc::ERROR;
                }
            }
            sqlite_rc::NOTFOUND
        }
        "journal_mode" => match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("wal") => sqlite_rc::NOTFOUND,
            Some(_) => {
                unsafe { set_pragma_error(args, "only WAL journal mode is supported") };
                sqlite_rc::ERROR
            }
        },
        _ => sqlite_rc::NOTFOUND,
    }
}

extern "C" fn x_sector_size(_file: *mut ffi::sqlite3_file) -> c_int {
    512
}

extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    ffi::SQLITE_IOCAP_ATOMIC | ffi::SQLITE_IOCAP_SAFE_APPEND | ffi::SQLITE_IOCAP_SEQUENTIAL
}

extern "C" fn x_shm_map(
    file: *mut ffi::sqlite3_file,
    region_index: c_int,
    region_size: c_int,
    extend: c_int,
    out: *mut *mut c_void,
) -> c_int {
    let handle = unsafe { handle_mut(file) };
    debug_assert_eq!(region_size as usize, SHM_REGION_SIZE);
    let Some(shm) = &handle.shm else {
        return sqlite_rc::IOERR;
    };
    let mut shm = shm.lock();
    match shm.map_region(region_index as usize, extend != 0) {
        Some(region) => {
            unsafe { *out = region.as_mut_ptr().cast::<c_void>() };
            sqlite_rc::OK
        }
        None => {
            unsafe { *out = ptr::null_mut() };
            sqlite_rc::OK
        }
    }
}

extern "C" fn x_shm_lock(
    file: *mut ffi::sqlite3_file,
    offset: c_int,
    n: c_int,
    flags: c_int,
) -> c_int {
    let handle = unsafe { handle_mut(file) };
    let Some(shm) = &handle.shm else {
        return sqlite_rc::IOERR;
    };
    let flags = ShmLockFlags::from_bits_truncate(flags as u32);
    let locking = flags.contains(ShmLockFlags::LOCK);
    let exclusive = flags.contains(ShmLockFlags::EXCLUSIVE);
    match shm
        .lock()
        .lock(&mut handle.shm_lock_state, offset as usize, n as usize, locking, exclusive)
    {
        Ok(()) => sqlite_rc::OK,
        Err(_) => sqlite_rc::BUSY,
    }
}

extern "C" fn x_shm_barrier(_file: *mut ffi::sqlite3_file) {}

extern "C" fn x_shm_unmap(file: *mut ffi::sqlite3_file, _delete_flag: c_int) -> c_int {
    let handle = unsafe { handle_mut(file) };
    if let Some(shm) = &handle.shm {
        shm.lock().release_all(&mut handle.shm_lock_state);
    }
    sqlite_rc::OK
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 2,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: Some(x_shm_map),
    xShmLock: Some(x_shm_lock),
    xShmBarrier: Some(x_shm_barrier),
    xShmUnmap: Some(x_shm_unmap),
    xFetch: None,
    xUnfetch: None,
};

/// Recover an owning `Arc<Registry>` handle from `pAppData` without
/// disturbing the permanent reference [`register`] leaked there.
unsafe fn registry_from_app_data(vfs: *mut ffi::sqlite3_vfs) -> Arc<Registry> {
    unsafe {
        let raw = (*vfs).pAppData.cast::<Registry>();
        let leaked = Arc::from_raw(raw);
        let owned = Arc::clone(&leaked);
        std::mem::forget(leaked);
        owned
    }
}

fn tag_for_open(flags: OpenFlags) -> FileTag {
    if flags.contains(OpenFlags::WAL) {
        FileTag::Wal
    } else if flags.contains(OpenFlags::MAIN_JOURNAL) {
        FileTag::Journal
    } else {
        FileTag::Database
    }
}

extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    let registry = unsafe { registry_from_app_data(vfs) };

    let name = if z_name.is_null() {
        format!("<temp-{:p}>", file)
    } else {
        unsafe { CStr::from_ptr(z_name) }.to_string_lossy().into_owned()
    };

    let open_flags = OpenFlags::from_bits_truncate(flags as u32);
    let tag = tag_for_open(open_flags);
    let backing = match registry.open_with_flags(&name, tag, open_flags) {
        Ok(backing) => backing,
        Err(e) => return e.to_sqlite_extended_rc(),
    };
    let shm = if tag == FileTag::Database {
        Some(registry.shm_for(&name))
    } else {
        None
    };

    unsafe {
        let handle = file.cast::<FileHandle>();
        ptr::write(
            handle,
            FileHandle {
                base: ffi::sqlite3_file {
                    pMethods: &IO_METHODS,
                },
                name,
                tag,
                file: backing,
                shm,
                shm_lock_state: ShmLockState::default(),
                delete_on_close: open_flags.contains(OpenFlags::DELETEONCLOSE),
                registry,
            },
        );
        if !out_flags.is_null() {
            *out_flags = flags;
        }
    }
    sqlite_rc::OK
}

extern "C" fn x_delete(vfs: *mut ffi::sqlite3_vfs, z_name: *const c_char, _sync_dir: c_int) -> c_int {
    let registry = unsafe { registry_from_app_data(vfs) };
    let name = unsafe { CStr::from_ptr(z_name) }.to_string_lossy();
    match registry.delete(&name) {
        Ok(()) => sqlite_rc::OK,
        Err(e) => e.to_sqlite_extended_rc(),
    }
}

extern "C" fn x_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _flags: c_int,
    res_out: *mut c_int,
) -> c_int {
    let registry = unsafe { registry_from_app_data(vfs) };
    let name = unsafe { CStr::from_ptr(z_name) }.to_string_lossy();
    unsafe { *res_out = c_int::from(registry.exists(&name)) };
    sqlite_rc::OK
}

extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    unsafe {
        let name = CStr::from_ptr(z_name).to_bytes_with_nul();
        if name.len() > n_out as usize {
            return sqlite_rc::CANTOPEN;
        }
        ptr::copy_nonoverlapping(name.as_ptr().cast::<c_char>(), z_out, name.len());
    }
    sqlite_rc::OK
}

extern "C" fn x_randomness(_vfs: *mut ffi::sqlite3_vfs, n_byte: c_int, z_out: *mut c_char) -> c_int {
    use rand::RngCore;
    let buf = unsafe { std::slice::from_raw_parts_mut(z_out.cast::<u8>(), n_byte as usize) };
    rand::thread_rng().fill_bytes(buf);
    n_byte
}

extern "C" fn x_sleep(_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    std::thread::sleep(std::time::Duration::from_micros(microseconds as u64));
    microseconds
}

extern "C" fn x_current_time(_vfs: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    unsafe { *out = 2_440_587.5 + now / 86_400.0 };
    sqlite_rc::OK
}

/// Register the in-memory VFS under `name`. `registry` is leaked for the
/// process lifetime, matching SQLite's expectation that a registered VFS
/// outlives every connection that might use it.
pub fn register(name: &str, registry: Arc<Registry>, make_default: bool) -> raftlite_error::Result<()> {
    let c_name = CString::new(name)
        .map_err(|_| raftlite_error::Error::internal("VFS name contained an interior NUL"))?;
    let registry_ptr = Arc::into_raw(registry).cast_mut().cast::<c_void>();

    let vfs = Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: std::mem::size_of::<FileHandle>() as c_int,
        mxPathname: 512,
        pNext: ptr::null_mut(),
        zName: c_name.into_raw(),
        pAppData: registry_ptr,
        xOpen: Some(x_open),
        xDelete: Some(x_delete),
        xAccess: Some(x_access),
        xFullPathname: Some(x_full_pathname),
        xDlOpen: None,
        xDlError: None,
        xDlSym: None,
        xDlClose: None,
        xRandomness: Some(x_randomness),
        xSleep: Some(x_sleep),
        xCurrentTime: Some(x_current_time),
        xGetLastError: None,
        xCurrentTimeInt64: None,
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    });

    let rc = unsafe { ffi::sqlite3_vfs_register(Box::into_raw(vfs), c_int::from(make_default)) };
    if rc != sqlite_rc::OK {
        return Err(raftlite_error::Error::internal(format!(
            "sqlite3_vfs_register failed with code {rc}"
        )));
    }
    tracing::info!(name, make_default, "registered in-memory VFS");
    Ok(())
}
