//! Built-in file-backed MMIO device.
//!
//! Maps a host file into the process and serves guest accesses straight out
//! of the mapping. The plugin argument string is `["w:"]filename`; the `w`
//! flag opens the file read-write, otherwise every store is refused.

use std::ffi::{CStr, c_char, c_void};
use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::ptr;

use crate::plugin::MmioPlugin;

/// Name the registry installs this plugin under.
pub const NAME: &str = "file";

struct FileMapping {
    addr: *mut u8,
    length: usize,
    writable: bool,
}

/// Split the argument string into `(writable, path)`.
///
/// Flag characters precede the first colon; anything other than `w` there
/// refuses the whole string. Without a colon the entire string is the path.
fn parse_args(args: &str) -> Option<(bool, &str)> {
    match args.split_once(':') {
        None => Some((false, args)),
        Some((flags, path)) => {
            let mut writable = false;
            for flag in flags.chars() {
                match flag {
                    'w' => writable = true,
                    _ => return None,
                }
            }
            Some((writable, path))
        }
    }
}

/// Open the file and map its full contents.
///
/// Fails when the file cannot be opened, is empty, cannot be mapped, or the
/// descriptor cannot be closed after mapping. Every failure path releases
/// whatever was acquired before it: the `File` closes the descriptor on
/// drop, and a mapping established before a late failure is unmapped.
fn open_and_map(args: &str) -> Option<FileMapping> {
    let (writable, path) = parse_args(args)?;

    let file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .ok()?;
    let length = usize::try_from(file.metadata().ok()?.len()).ok()?;
    if length == 0 {
        return None;
    }

    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    // SAFETY: the descriptor is open for the duration of the call and
    // `length` is the file's non-zero size.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            length,
            prot,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return None;
    }

    // The mapping outlives the descriptor; close it now and surface a close
    // failure as an init failure rather than carrying a bad fd forward.
    let fd = file.into_raw_fd();
    // SAFETY: `into_raw_fd` released ownership, so this is the sole close.
    if unsafe { libc::close(fd) } != 0 {
        // SAFETY: `addr`/`length` describe the mapping established above.
        unsafe { libc::munmap(addr, length) };
        return None;
    }

    Some(FileMapping {
        addr: addr.cast(),
        length,
        writable,
    })
}

unsafe extern "C" fn file_alloc(args: *const c_char) -> *mut c_void {
    if args.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: a non-null `args` is a NUL-terminated string per the ABI.
    let args = unsafe { CStr::from_ptr(args) };
    let Ok(args) = args.to_str() else {
        return ptr::null_mut();
    };
    match open_and_map(args) {
        Some(mapping) => Box::into_raw(Box::new(mapping)).cast(),
        None => {
            log::warn!("[file] could not map \"{}\"", args);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn file_load(data: *mut c_void, offset: u64, len: usize, bytes: *mut u8) -> bool {
    // SAFETY: `data` is the handle `file_alloc` returned.
    let mapping = unsafe { &*(data as *const FileMapping) };
    if offset >= mapping.length as u64 {
        return false;
    }
    // SAFETY: the mapping covers `offset`, and the caller guarantees `bytes`
    // holds `len` writable bytes.
    unsafe { ptr::copy(mapping.addr.add(offset as usize), bytes, len) };
    true
}

unsafe extern "C" fn file_store(
    data: *mut c_void,
    offset: u64,
    len: usize,
    bytes: *const u8,
) -> bool {
    // SAFETY: `data` is the handle `file_alloc` returned.
    let mapping = unsafe { &*(data as *const FileMapping) };
    if !mapping.writable || offset >= mapping.length as u64 {
        return false;
    }
    // SAFETY: the mapping is writable and covers `offset`; `bytes` holds
    // `len` readable bytes.
    unsafe { ptr::copy(bytes, mapping.addr.add(offset as usize), len) };
    true
}

unsafe extern "C" fn file_dealloc(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    // SAFETY: `data` was produced by `Box::into_raw` in `file_alloc`.
    let mapping = unsafe { Box::from_raw(data as *mut FileMapping) };
    // SAFETY: the mapping was established by `file_alloc`; an unmap failure
    // at teardown is ignored.
    unsafe { libc::munmap(mapping.addr.cast(), mapping.length) };
}

/// Descriptor for registering this plugin.
pub fn plugin() -> MmioPlugin {
    MmioPlugin {
        alloc: file_alloc,
        load: file_load,
        store: file_store,
        dealloc: file_dealloc,
    }
}
