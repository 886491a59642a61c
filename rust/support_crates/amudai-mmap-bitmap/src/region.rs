//! Owned memory-mapped region.
//!
//! `MappedRegion` wraps a single `mmap` result: a pointer and the exact length
//! that was requested. The region is unmapped exactly once, either explicitly
//! through [`MappedRegion::release`] or implicitly on drop.

use crate::{bitmap::RawFd, mmap, options::AccessAdvice};

/// A live memory mapping of exactly `len` bytes.
pub struct MappedRegion {
    /// Start of the mapping. Null only transiently inside `release`.
    ptr: *mut u8,
    /// Length of the mapping in bytes, always greater than zero.
    len: usize,
}

impl MappedRegion {
    /// Maps `len` bytes of private, zero-filled anonymous memory.
    pub fn anonymous(len: usize) -> std::io::Result<MappedRegion> {
        let ptr = mmap::map_anonymous(len)?;
        Ok(MappedRegion {
            ptr: ptr as _,
            len,
        })
    }

    /// Maps the first `len` bytes of the file behind `fd` as a shared,
    /// writable region.
    ///
    /// # Safety
    ///
    /// The byte views of the region alias the file. While a view is alive the
    /// file must not be written through any other mapping, descriptor or
    /// process, and it must not be truncated below `len` while the region is
    /// mapped. Pages past the end of the file must not be accessed.
    pub unsafe fn shared(fd: RawFd, len: usize) -> std::io::Result<MappedRegion> {
        let ptr = mmap::map_shared(fd, len)?;
        Ok(MappedRegion {
            ptr: ptr as _,
            len,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Writes dirty pages back to the backing file and waits for completion.
    ///
    /// Only meaningful for shared file mappings.
    pub fn sync(&self) -> std::io::Result<()> {
        unsafe { mmap::sync(self.ptr as _, self.len) }
    }

    pub fn advise(&self, advice: AccessAdvice) -> std::io::Result<()> {
        unsafe { mmap::advise(self.ptr as _, self.len, advice) }
    }

    /// Unmaps the region, reporting the OS result.
    ///
    /// The region is consumed either way: if `munmap` fails the pages stay
    /// mapped but are never touched again.
    pub fn release(mut self) -> std::io::Result<()> {
        let ptr = std::mem::replace(&mut self.ptr, std::ptr::null_mut());
        unsafe { mmap::unmap(ptr as _, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            let _ = unsafe { mmap::unmap(self.ptr as _, self.len) };
        }
    }
}

// SAFETY: MappedRegion exclusively owns its mapping and unmaps it at most once.
unsafe impl Send for MappedRegion {}

// SAFETY: shared access only hands out `&[u8]`; mutation requires `&mut self`.
unsafe impl Sync for MappedRegion {}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
