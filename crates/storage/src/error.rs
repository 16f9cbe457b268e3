//! Storage errors, shared by every backend.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Why a storage operation failed, as seen by the caller.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no such file: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("access denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("local I/O failed: {_0}")]
    Io(IoError),
    /// The object store could not be reached or answered with an error.
    #[display("object store unavailable: {_0}")]
    Network(#[error(not(source))] String),
    /// Absolute, empty or escaping the backend's root.
    #[display("not a storage path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("storage backend failed: {_0}")]
    BackendError(#[error(not(source))] String),
}

impl ErrorKind {
    /// Classify an I/O error raised while touching `path`.
    pub(crate) fn from_io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Transient failures; asking again later may give a different answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}
