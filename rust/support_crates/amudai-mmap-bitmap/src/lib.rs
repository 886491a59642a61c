//! Memory-mapped bitmap used as the bit store of Amudai bloom filters.
//!
//! A [`Bitmap`] is a fixed-size bit array held in one memory mapping, either
//! anonymous (process memory only) or backed by a file whose bytes are the bit
//! array verbatim, most-significant bit first. The crate covers:
//!
//! - creation in memory ([`Bitmap::anonymous`]), from a descriptor
//!   ([`Bitmap::from_descriptor`]) or from a path ([`Bitmap::from_path`],
//!   [`Bitmap::open`]), including sparse growth of the backing file
//! - bit access ([`Bitmap::get_bit`], [`Bitmap::set_bit`]) and the pure
//!   addressing primitives in [`bits`]
//! - durability ([`Bitmap::flush`]) and terminal teardown ([`Bitmap::close`])
//!
//! Hashing, probe strategies and filter sizing belong to the filter built on
//! top of this crate.

pub mod bitmap;
pub mod bits;
pub mod error;
pub mod options;
pub mod region;

#[cfg_attr(unix, path = "mmap_unix.rs")]
#[cfg_attr(not(unix), path = "mmap_fallback.rs")]
pub mod mmap;


pub use bitmap::{Bitmap, Descriptor, RawFd, close_bitmap, flush_bitmap};
pub use error::{Error, ErrorKind, Result};
pub use options::{AccessAdvice, BitmapOptions};

/// Size of a regular memory page; mappings always start on a page boundary.
pub fn page_size() -> usize {
    mmap::get_page_size()
}
