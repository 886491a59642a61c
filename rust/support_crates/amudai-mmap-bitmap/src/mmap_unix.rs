use std::{os::fd::RawFd, sync::OnceLock};

use crate::options::AccessAdvice;

/// Maps `len` bytes of private, zero-initialized anonymous memory.
///
/// The region is readable and writable and is not associated with any file.
///
/// # Returns
///
/// A pointer to the start of the mapping, or the OS error reported by `mmap`.
/// A zero `len` fails with `InvalidInput` without calling into the OS.
///
/// # Safety
///
/// The returned pointer must be released with [`unmap`] using the same `len`.
pub fn map_anonymous(len: usize) -> std::io::Result<*mut std::ffi::c_void> {
    check_len(len)?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    log::trace!("mmap anonymous: len={len} ptr={ptr:?}");
    Ok(ptr)
}

/// Maps the first `len` bytes of the file behind `fd` as a shared, writable
/// region.
///
/// Writes to the region are carried through to the file (at the OS's
/// discretion, or explicitly with [`sync`]) and are visible to other shared
/// mappings of the same file.
///
/// # Errors
///
/// `InvalidInput` for a zero `len`, otherwise the OS error reported by `mmap`.
/// Notable cases are `EBADF` for a closed descriptor, `EACCES` for a
/// descriptor that was not opened for both reading and writing and `ENODEV`
/// for descriptors that do not support mapping.
///
/// # Safety
///
/// The returned pointer must be released with [`unmap`] using the same `len`.
/// Touching pages that lie entirely past the end of the file raises `SIGBUS`.
pub fn map_shared(fd: RawFd, len: usize) -> std::io::Result<*mut std::ffi::c_void> {
    check_len(len)?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    log::trace!("mmap shared: fd={fd} len={len} ptr={ptr:?}");
    Ok(ptr)
}

fn check_len(len: usize) -> std::io::Result<()> {
    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cannot map an empty region",
        ));
    }
    Ok(())
}

/// Releases a mapping created by [`map_anonymous`] or [`map_shared`].
///
/// # Safety
///
/// - `ptr` and `len` must describe a mapping returned by this module
/// - the mapping must not have been released already
/// - no references into the mapping may outlive this call
pub unsafe fn unmap(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, len) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    log::trace!("munmap: len={len} ptr={ptr:?}");
    Ok(())
}

/// Synchronously writes the dirty pages of a shared mapping back to its file.
///
/// # Safety
///
/// `ptr` and `len` must describe a live mapping returned by this module.
pub unsafe fn sync(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    let res = unsafe { libc::msync(ptr, len, libc::MS_SYNC) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Flushes the file behind `fd` (data and metadata) to stable storage.
pub fn sync_descriptor(fd: RawFd) -> std::io::Result<()> {
    let res = unsafe { libc::fsync(fd) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Applies an access-pattern hint to a live mapping.
///
/// # Safety
///
/// `ptr` and `len` must describe a live mapping returned by this module.
pub unsafe fn advise(
    ptr: *mut std::ffi::c_void,
    len: usize,
    advice: AccessAdvice,
) -> std::io::Result<()> {
    let advice = match advice {
        AccessAdvice::Normal => libc::MADV_NORMAL,
        AccessAdvice::Random => libc::MADV_RANDOM,
        AccessAdvice::Sequential => libc::MADV_SEQUENTIAL,
        AccessAdvice::WillNeed => libc::MADV_WILLNEED,
    };
    let res = unsafe { libc::madvise(ptr, len, advice) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Returns the current size in bytes of the file behind `fd`.
///
/// This doubles as a validity check for the descriptor: a closed or otherwise
/// invalid descriptor fails with `EBADF`.
pub fn descriptor_size(fd: RawFd) -> std::io::Result<u64> {
    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    let res = unsafe { libc::fstat(fd, stat.as_mut_ptr()) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.st_size.max(0) as u64)
}

/// Whether `e` means the descriptor itself cannot back a read/write mapping:
/// closed or invalid (`EBADF`), opened without read and write access
/// (`EACCES`), or of a kind that does not support mapping (`ENODEV`).
pub fn is_bad_descriptor(e: &std::io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF) | Some(libc::EACCES) | Some(libc::ENODEV)
    )
}

/// Gets the system's standard page size in bytes.
///
/// The value is cached after the first call. If the page size cannot be
/// determined, a default of 4KB is returned.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
