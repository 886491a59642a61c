use std::path::PathBuf;

use thiserror::Error;

use crate::bitmap::RawFd;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_state(operation: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidState {
                operation: operation.into(),
                reason: "bitmap is closed".into(),
            }
            .into(),
        )
    }

    /// The mapping extends past the end of its backing file, so the bytes beyond
    /// `backed` cannot be touched.
    pub fn short_file(operation: impl Into<String>, backed: usize, len: usize) -> Error {
        Error(
            ErrorKind::InvalidState {
                operation: operation.into(),
                reason: format!("backing file holds only {backed} of {len} mapped bytes"),
            }
            .into(),
        )
    }

    pub fn file_not_found(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::FileNotFound {
                path: path.into(),
                source,
            }
            .into(),
        )
    }

    pub fn bad_descriptor(fd: RawFd, source: std::io::Error) -> Error {
        Error(ErrorKind::BadDescriptor { fd, source }.into())
    }

    pub fn fatal(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Fatal {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// Classifies an OS error raised while establishing or releasing a mapping.
    ///
    /// Memory or storage exhaustion is reported as [`ErrorKind::Fatal`], everything else
    /// stays a plain [`ErrorKind::Io`].
    pub(crate) fn from_os(context: impl Into<String>, source: std::io::Error) -> Error {
        if is_exhaustion(&source) {
            Error::fatal(context, source)
        } else {
            Error::io(context, source)
        }
    }

    /// Returns the conventional `errno` value for this error.
    ///
    /// Callers that used to branch on negative error codes can keep doing so:
    /// `-err.errno()` is what the classic C interface would have returned.
    pub fn errno(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidArgument { .. } | ErrorKind::InvalidState { .. } => EINVAL,
            ErrorKind::FileNotFound { .. } => ENOENT,
            ErrorKind::BadDescriptor { .. } => EBADF,
            ErrorKind::Fatal { source, .. } => source.raw_os_error().unwrap_or(ENOMEM),
            ErrorKind::Io { source, .. } => source.raw_os_error().unwrap_or(EIO),
        }
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("file not found: '{}'", path.display())]
    FileNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad file descriptor {fd}: {source}")]
    BadDescriptor { fd: RawFd, source: std::io::Error },

    #[error("invalid state: {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    #[error("fatal error for '{context}': {source}")]
    Fatal {
        context: String,
        source: std::io::Error,
    },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

fn is_exhaustion(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::OutOfMemory | std::io::ErrorKind::StorageFull
    ) || e.raw_os_error() == Some(ENOMEM)
}

// Stable across the platforms we build for; kept local so the error type does
// not depend on `libc` on targets without it.
const EIO: i32 = 5;
const EBADF: i32 = 9;
const ENOENT: i32 = 2;
const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::error::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(Error::invalid_arg(name, condition))
}
