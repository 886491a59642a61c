//! The memory-mapped bitmap and its lifecycle.
//!
//! A [`Bitmap`] is either anonymous (private memory, gone with the process) or
//! file-backed (a shared mapping of a file whose bytes are the bit array
//! verbatim). Both are created explicitly, accessed through [`Bitmap::get_bit`]
//! and [`Bitmap::set_bit`], made durable with [`Bitmap::flush`] and torn down
//! with [`Bitmap::close`]. Close is terminal: every later operation fails with
//! [`ErrorKind::InvalidState`](crate::ErrorKind::InvalidState).
//!
//! Creating a file-backed bitmap is `unsafe`: the mapping is shared with the
//! file, so the caller has to rule out writers outside this bitmap while its
//! bytes are borrowed.

use std::{fs::File, path::Path};

use crate::{
    bits,
    error::{Error, Result},
    mmap,
    options::{AccessAdvice, BitmapOptions},
    region::MappedRegion,
};

#[cfg(unix)]
pub use std::os::fd::RawFd;

/// Raw descriptor type on targets without POSIX descriptors.
#[cfg(not(unix))]
pub type RawFd = i32;

/// Source of the memory behind a bitmap created with [`Bitmap::from_descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// No backing file; the bitmap lives in private anonymous memory.
    Anonymous,
    /// An open file descriptor owned by the caller. It must stay open for as
    /// long as the bitmap is live and must be readable and writable.
    Raw(RawFd),
}

impl Descriptor {
    /// The raw descriptor value that stands for "no backing file".
    pub const ANONYMOUS_FD: RawFd = -1;

    /// Interprets a raw descriptor, treating [`Self::ANONYMOUS_FD`] as
    /// [`Descriptor::Anonymous`].
    pub fn from_raw(fd: RawFd) -> Descriptor {
        if fd == Self::ANONYMOUS_FD {
            Descriptor::Anonymous
        } else {
            Descriptor::Raw(fd)
        }
    }
}

/// The file behind a file-backed bitmap.
#[derive(Debug)]
enum BackingFile {
    /// Opened by the bitmap itself; closed when the bitmap is closed.
    Owned(File),
    /// Supplied by the caller, who remains responsible for closing it.
    Borrowed(RawFd),
}

impl BackingFile {
    fn raw_fd(&self) -> RawFd {
        match self {
            BackingFile::Owned(file) => raw_fd(file),
            BackingFile::Borrowed(fd) => *fd,
        }
    }

    fn sync(&self) -> std::io::Result<()> {
        match self {
            BackingFile::Owned(file) => file.sync_all(),
            BackingFile::Borrowed(fd) => mmap::sync_descriptor(*fd),
        }
    }
}

#[derive(Debug)]
enum State {
    Anonymous {
        region: MappedRegion,
    },
    FileBacked {
        region: MappedRegion,
        file: BackingFile,
    },
    Closed,
}

/// A fixed-size bit array living in a memory mapping.
///
/// Bits are addressed most-significant-bit first within each byte (see
/// [`crate::bits`]); for file-backed bitmaps this is also the on-disk layout.
/// The file carries no header, so callers must reopen a file with the same
/// length it was created with.
///
/// A file-backed bitmap may map more bytes than its file holds (opened
/// without resize over a short file). Only the first [`Bitmap::backed_len`]
/// bytes are accessible then: byte views fail with `InvalidState` and bit
/// access past the backed bytes panics, so the unbacked pages are never touched.
///
/// Dropping a live bitmap closes it; errors during that implicit close are
/// logged and otherwise ignored. Call [`Bitmap::close`] to observe them.
#[derive(Debug)]
pub struct Bitmap {
    state: State,
    len: usize,
    /// Leading bytes of the mapping backed by memory or by the file, as of open.
    backed: usize,
}

impl Bitmap {
    /// Creates a private, zero-filled, in-memory bitmap of `len` bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` when `len` is zero or `len * 8` overflows
    /// - `Fatal` when the OS runs out of memory for the mapping
    pub fn anonymous(len: usize) -> Result<Bitmap> {
        check_len(len)?;
        let region =
            MappedRegion::anonymous(len).map_err(|e| Error::from_os("anonymous mapping", e))?;
        log::debug!("created anonymous bitmap: len={len}");
        Ok(Bitmap {
            state: State::Anonymous { region },
            len,
            backed: len,
        })
    }

    /// Creates a bitmap of `len` bytes over an existing descriptor.
    ///
    /// [`Descriptor::Anonymous`] yields a private, zero-filled mapping, exactly
    /// like [`Bitmap::anonymous`]. A raw descriptor is mapped shared and
    /// writable from offset zero; the caller keeps ownership of it and must
    /// close it after the bitmap is closed.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` when `len` is zero or `len * 8` overflows
    /// - `BadDescriptor` when the descriptor is closed, invalid, or cannot be
    ///   mapped for reading and writing
    /// - `Fatal` when the OS runs out of memory for the mapping
    ///
    /// # Safety
    ///
    /// Nothing is required for [`Descriptor::Anonymous`]. For
    /// [`Descriptor::Raw`]:
    ///
    /// - the descriptor must refer to an open file and must stay open, and not
    ///   be reused for another file, until the bitmap is closed or dropped
    /// - the file must not be written through any other mapping, descriptor or
    ///   process while a byte view or bit access of this bitmap is in progress
    /// - the file must not be truncated while the bitmap is live
    pub unsafe fn from_descriptor(descriptor: Descriptor, len: usize) -> Result<Bitmap> {
        match descriptor {
            Descriptor::Anonymous => Self::anonymous(len),
            Descriptor::Raw(fd) => {
                check_len(len)?;
                // SAFETY: forwarded from this function's contract.
                let (region, backed) = unsafe { map_descriptor(fd, len)? };
                log::debug!(
                    "created bitmap over borrowed descriptor: fd={fd} len={len} backed={backed}"
                );
                Ok(Bitmap {
                    state: State::FileBacked {
                        region,
                        file: BackingFile::Borrowed(fd),
                    },
                    len,
                    backed,
                })
            }
        }
    }

    /// Opens (and optionally creates and grows) the file at `path` and maps
    /// its first `len` bytes.
    ///
    /// Equivalent to [`Bitmap::open`] with [`BitmapOptions::new`]`(create, resize)`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Bitmap::open`].
    pub unsafe fn from_path(
        path: impl AsRef<Path>,
        len: usize,
        create: bool,
        resize: bool,
    ) -> Result<Bitmap> {
        // SAFETY: forwarded from this function's contract.
        unsafe { Self::open(path, len, &BitmapOptions::new(create, resize)) }
    }

    /// Opens the file at `path` according to `options` and maps its first
    /// `len` bytes as a shared, writable region.
    ///
    /// With `options.resize` the file is grown sparsely to at least `len`
    /// bytes; it is never shrunk. Without it a shorter file is still mapped
    /// at the full `len`, but only its existing bytes are accessible (see
    /// [`Bitmap::backed_len`]).
    ///
    /// The bitmap owns the descriptor it opens and closes it on
    /// [`Bitmap::close`]. The file itself is never deleted.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` when `len` is zero or the options are invalid
    /// - `FileNotFound` when the file does not exist and `options.create` is
    ///   not set
    /// - `Fatal` on memory or storage exhaustion while growing or mapping
    /// - `Io` for any other failure to open, grow or map the file
    ///
    /// No descriptor or mapping outlives a failed call.
    ///
    /// # Safety
    ///
    /// The mapping is shared with the file. While the bitmap is live:
    ///
    /// - the file must not be written through any other mapping (including
    ///   another `Bitmap` over the same path), descriptor or process while a
    ///   byte view or bit access of this bitmap is in progress
    /// - the file must not be truncated
    pub unsafe fn open(
        path: impl AsRef<Path>,
        len: usize,
        options: &BitmapOptions,
    ) -> Result<Bitmap> {
        check_len(len)?;
        options.validate()?;
        let path = path.as_ref();

        let file = open_file(path, options)?;
        if options.resize {
            grow_file(&file, path, len)?;
        }
        // SAFETY: forwarded from this function's contract; `file` moves into
        // the bitmap together with the region, so it outlives the mapping.
        let (region, backed) = unsafe { map_descriptor(raw_fd(&file), len)? };
        apply_advice(&region, options.advice);

        log::debug!(
            "opened file-backed bitmap: path='{}' len={len} backed={backed} create={} resize={}",
            path.display(),
            options.create,
            options.resize
        );
        Ok(Bitmap {
            state: State::FileBacked {
                region,
                file: BackingFile::Owned(file),
            },
            len,
            backed,
        })
    }

    /// Length of the bitmap in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a bitmap is never created with zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of addressable bits (`len() * 8`).
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.len * 8
    }

    /// Number of leading bytes that can be accessed.
    ///
    /// Equal to [`Bitmap::len`] except for a file-backed bitmap whose file was
    /// shorter than `len` when it was opened; then it is the file size.
    #[inline]
    pub fn backed_len(&self) -> usize {
        self.backed
    }

    /// Whether every mapped byte is backed, which byte views require.
    #[inline]
    pub fn is_fully_backed(&self) -> bool {
        self.backed == self.len
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.state, State::Anonymous { .. })
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.state, State::FileBacked { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Whether closing this bitmap also closes its descriptor.
    pub fn owns_descriptor(&self) -> bool {
        matches!(
            self.state,
            State::FileBacked {
                file: BackingFile::Owned(_),
                ..
            }
        )
    }

    /// The descriptor backing a live file-backed bitmap.
    pub fn raw_descriptor(&self) -> Option<RawFd> {
        match &self.state {
            State::FileBacked { file, .. } => Some(file.raw_fd()),
            _ => None,
        }
    }

    /// Start of the mapping, or null once the bitmap is closed.
    pub fn as_ptr(&self) -> *const u8 {
        self.region()
            .map_or(std::ptr::null(), |region| region.ptr() as *const u8)
    }

    /// The mapped bytes.
    ///
    /// # Errors
    ///
    /// `InvalidState` once the bitmap is closed, or while the backing file is
    /// shorter than the mapping.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.checked_region("as_bytes").map(MappedRegion::as_bytes)
    }

    /// The mapped bytes, writable.
    ///
    /// # Errors
    ///
    /// Same as [`Bitmap::as_bytes`].
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        self.checked_region("as_bytes_mut")?;
        self.region_mut()
            .map(MappedRegion::as_bytes_mut)
            .ok_or_else(|| Error::invalid_state("as_bytes_mut"))
    }

    /// Copies the mapped bytes into a new vector.
    ///
    /// # Errors
    ///
    /// Same as [`Bitmap::as_bytes`].
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.checked_region("to_vec")
            .map(|region| region.as_bytes().to_vec())
    }

    /// Returns bit `index` as 0 or 1.
    ///
    /// # Panics
    ///
    /// Panics if the bitmap is closed, `index >= bit_len()`, or `index` lies
    /// past the bytes held by a short backing file.
    #[inline]
    pub fn get_bit(&self, index: usize) -> u8 {
        match self.region() {
            Some(region) => {
                check_index(index, self.backed, self.len);
                bits::get_bit(region.as_bytes(), index)
            }
            None => closed_access("get_bit"),
        }
    }

    /// Sets bit `index` when `value` is nonzero and clears it otherwise.
    ///
    /// This only touches memory; see [`Bitmap::flush`] for durability.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Bitmap::get_bit`].
    #[inline]
    pub fn set_bit(&mut self, index: usize, value: u8) {
        let (backed, len) = (self.backed, self.len);
        match self.region_mut() {
            Some(region) => {
                check_index(index, backed, len);
                bits::set_bit(region.as_bytes_mut(), index, value)
            }
            None => closed_access("set_bit"),
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> Result<usize> {
        self.checked_region("count_ones")
            .map(|region| bits::count_ones(region.as_bytes()))
    }

    /// Sets every byte of the bitmap to `value`.
    pub fn fill(&mut self, value: u8) -> Result<()> {
        self.checked_region("fill")?;
        if let Some(region) = self.region_mut() {
            region.as_bytes_mut().fill(value);
        }
        Ok(())
    }

    /// Re-applies an access-pattern hint to the mapping.
    pub fn advise(&self, advice: AccessAdvice) -> Result<()> {
        let region = self.region().ok_or_else(|| Error::invalid_state("advise"))?;
        region
            .advise(advice)
            .map_err(|e| Error::io("madvise", e))
    }

    /// Writes pending modifications back to the backing file and waits until
    /// they are on stable storage.
    ///
    /// A no-op for anonymous bitmaps. May be called any number of times.
    ///
    /// # Errors
    ///
    /// - `InvalidState` once the bitmap is closed
    /// - `Io` (or `Fatal`) when `msync` or `fsync` fails; the bitmap stays usable
    pub fn flush(&self) -> Result<()> {
        match &self.state {
            State::Anonymous { .. } => Ok(()),
            State::FileBacked { region, file } => {
                region.sync().map_err(|e| Error::from_os("msync", e))?;
                file.sync().map_err(|e| Error::from_os("fsync", e))?;
                log::debug!("flushed bitmap: fd={} len={}", file.raw_fd(), self.len);
                Ok(())
            }
            State::Closed => Err(Error::invalid_state("flush")),
        }
    }

    /// Flushes, unmaps and, when owned, closes the descriptor.
    ///
    /// Close is terminal on success. If the initial flush fails, the error is
    /// returned and the bitmap stays live.
    ///
    /// # Errors
    ///
    /// - `InvalidState` when the bitmap is already closed
    /// - whatever [`Bitmap::flush`] reports
    /// - `Io` when `munmap` fails (the bitmap is closed regardless)
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::invalid_state("close"));
        }
        self.flush()?;

        match std::mem::replace(&mut self.state, State::Closed) {
            State::Anonymous { region } => {
                region.release().map_err(|e| Error::io("munmap", e))?;
                log::debug!("closed anonymous bitmap: len={}", self.len);
            }
            State::FileBacked { region, file } => {
                let fd = file.raw_fd();
                let unmapped = region.release();
                // Dropping an owned file closes it; a borrowed descriptor is left alone.
                drop(file);
                unmapped.map_err(|e| Error::io("munmap", e))?;
                log::debug!("closed file-backed bitmap: fd={fd} len={}", self.len);
            }
            State::Closed => {}
        }
        Ok(())
    }

    /// The live region, provided every mapped byte is backed.
    fn checked_region(&self, operation: &str) -> Result<&MappedRegion> {
        let region = self
            .region()
            .ok_or_else(|| Error::invalid_state(operation))?;
        if !self.is_fully_backed() {
            return Err(Error::short_file(operation, self.backed, self.len));
        }
        Ok(region)
    }

    fn region(&self) -> Option<&MappedRegion> {
        match &self.state {
            State::Anonymous { region } | State::FileBacked { region, .. } => Some(region),
            State::Closed => None,
        }
    }

    fn region_mut(&mut self) -> Option<&mut MappedRegion> {
        match &mut self.state {
            State::Anonymous { region } | State::FileBacked { region, .. } => Some(region),
            State::Closed => None,
        }
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                log::warn!("failed to close bitmap on drop: {e}");
            }
        }
    }
}

/// Flushes `bitmap`, rejecting a missing handle with `InvalidArgument`.
pub fn flush_bitmap(bitmap: Option<&Bitmap>) -> Result<()> {
    match bitmap {
        Some(bitmap) => bitmap.flush(),
        None => Err(Error::invalid_arg("bitmap", "no bitmap to flush")),
    }
}

/// Closes `bitmap`, rejecting a missing handle with `InvalidArgument`.
pub fn close_bitmap(bitmap: Option<&mut Bitmap>) -> Result<()> {
    match bitmap {
        Some(bitmap) => bitmap.close(),
        None => Err(Error::invalid_arg("bitmap", "no bitmap to close")),
    }
}

fn check_len(len: usize) -> Result<()> {
    crate::verify_arg!(len, len > 0);
    crate::verify_arg!(len, len.checked_mul(8).is_some());
    Ok(())
}

#[cold]
#[track_caller]
fn closed_access(operation: &str) -> ! {
    panic!("{operation} on a closed bitmap")
}

#[inline]
#[track_caller]
fn check_index(index: usize, backed: usize, len: usize) {
    if bits::byte_index(index) >= backed {
        index_out_of_range(index, backed, len)
    }
}

#[cold]
#[track_caller]
fn index_out_of_range(index: usize, backed: usize, len: usize) -> ! {
    if bits::byte_index(index) < len {
        panic!(
            "bit index {index} lies past the end of the backing file \
             ({backed} of {len} bytes backed)"
        )
    }
    panic!("bit index {index} out of range for a bitmap of {} bits", len * 8)
}

/// Maps `len` bytes of the file behind `fd`, returning the region and the
/// number of leading bytes the file currently holds.
///
/// # Safety
///
/// See [`MappedRegion::shared`].
unsafe fn map_descriptor(fd: RawFd, len: usize) -> Result<(MappedRegion, usize)> {
    let size = mmap::descriptor_size(fd).map_err(|e| descriptor_error(fd, e))?;
    if size < len as u64 {
        log::warn!(
            "mapping {len} bytes over descriptor {fd} holding only {size} bytes; \
             only the first {size} bytes are accessible"
        );
    }
    let backed = size.min(len as u64) as usize;
    let region = unsafe { MappedRegion::shared(fd, len) }.map_err(|e| descriptor_error(fd, e))?;
    Ok((region, backed))
}

fn descriptor_error(fd: RawFd, e: std::io::Error) -> Error {
    if mmap::is_bad_descriptor(&e) {
        Error::bad_descriptor(fd, e)
    } else {
        Error::from_os("shared mapping", e)
    }
}

fn open_file(path: &Path, options: &BitmapOptions) -> Result<File> {
    let mut open_options = std::fs::OpenOptions::new();
    open_options.read(true).write(true).create(options.create);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open_options.mode(options.file_mode);
    }
    open_options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::file_not_found(path, e)
        } else {
            Error::io(format!("open '{}'", path.display()), e)
        }
    })
}

fn grow_file(file: &File, path: &Path, len: usize) -> Result<()> {
    let context = || format!("resize '{}'", path.display());
    let current = file
        .metadata()
        .map_err(|e| Error::io(context(), e))?
        .len();
    if current < len as u64 {
        file.set_len(len as u64)
            .map_err(|e| Error::from_os(context(), e))?;
        log::debug!(
            "grew bitmap file '{}' from {current} to {len} bytes",
            path.display()
        );
    }
    Ok(())
}

fn apply_advice(region: &MappedRegion, advice: AccessAdvice) {
    if advice == AccessAdvice::Normal {
        return;
    }
    if let Err(e) = region.advise(advice) {
        log::warn!("ignoring failed madvise({advice:?}): {e}");
    }
}

#[cfg(unix)]
fn raw_fd(file: &File) -> RawFd {
    use std::os::fd::AsRawFd;
    file.as_raw_fd()
}

#[cfg(not(unix))]
fn raw_fd(_file: &File) -> RawFd {
    Descriptor::ANONYMOUS_FD
}
