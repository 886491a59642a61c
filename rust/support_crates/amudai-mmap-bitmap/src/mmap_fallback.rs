//! Placeholder platform layer for targets without POSIX memory mapping.
//!
//! Every mapping request fails with `Unsupported`; the remaining functions are
//! never reached because no mapping can exist.

use crate::{bitmap::RawFd, options::AccessAdvice};

fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "memory-mapped bitmaps are not supported on this platform",
    )
}

pub fn map_anonymous(_len: usize) -> std::io::Result<*mut std::ffi::c_void> {
    Err(unsupported())
}

pub fn map_shared(_fd: RawFd, _len: usize) -> std::io::Result<*mut std::ffi::c_void> {
    Err(unsupported())
}

pub unsafe fn unmap(_ptr: *mut std::ffi::c_void, _len: usize) -> std::io::Result<()> {
    Err(unsupported())
}

pub unsafe fn sync(_ptr: *mut std::ffi::c_void, _len: usize) -> std::io::Result<()> {
    Err(unsupported())
}

pub fn sync_descriptor(_fd: RawFd) -> std::io::Result<()> {
    Err(unsupported())
}

pub unsafe fn advise(
    _ptr: *mut std::ffi::c_void,
    _len: usize,
    _advice: AccessAdvice,
) -> std::io::Result<()> {
    Err(unsupported())
}

pub fn descriptor_size(_fd: RawFd) -> std::io::Result<u64> {
    Err(unsupported())
}

pub fn is_bad_descriptor(_e: &std::io::Error) -> bool {
    false
}

/// Returns the "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}
