//! Options for opening file-backed bitmaps.

use crate::error::{Error, Result};

/// Permission bits applied to bitmap files created by [`crate::Bitmap::open`].
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Access-pattern hint passed to the OS for a mapped bitmap.
///
/// Bloom filter probes touch pages at random, so [`AccessAdvice::Random`] is
/// usually the right choice for large filters: it stops the kernel from
/// reading ahead pages that are never going to be probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessAdvice {
    /// No special treatment.
    #[default]
    Normal,
    /// Expect page references in random order.
    Random,
    /// Expect page references in sequential order.
    Sequential,
    /// Expect access in the near future; start reading pages in.
    WillNeed,
}

/// Configuration for opening a file-backed bitmap.
#[derive(Debug, Clone)]
pub struct BitmapOptions {
    /// Create the file when it does not exist.
    pub create: bool,
    /// Grow the file (sparsely) to at least the requested length. Never shrinks.
    pub resize: bool,
    /// Permission bits for a newly created file.
    pub file_mode: u32,
    /// Access-pattern hint applied right after mapping.
    pub advice: AccessAdvice,
}

impl Default for BitmapOptions {
    fn default() -> Self {
        Self {
            create: false,
            resize: false,
            file_mode: DEFAULT_FILE_MODE,
            advice: AccessAdvice::Normal,
        }
    }
}

impl BitmapOptions {
    /// Options equivalent to the `create`/`resize` flag pair of
    /// [`crate::Bitmap::from_path`].
    pub fn new(create: bool, resize: bool) -> Self {
        Self {
            create,
            resize,
            ..Default::default()
        }
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_resize(mut self, resize: bool) -> Self {
        self.resize = resize;
        self
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    pub fn with_advice(mut self, advice: AccessAdvice) -> Self {
        self.advice = advice;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.file_mode > 0o7777 {
            return Err(Error::invalid_arg(
                "file_mode",
                format!("{:#o} is not a valid permission mask", self.file_mode),
            ));
        }
        Ok(())
    }
}
