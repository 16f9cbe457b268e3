//! Pipeline Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors from the codec, storage and
//! database crates are raised into one of these kinds, keeping the original
//! error as a child in the tree.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a pipeline failure.
///
/// ### Fatal
/// - [`ErrorKind::Config`]
/// - [`ErrorKind::Cursor`]
///
/// ### Item-level (the attachment is skipped or reported as failed)
/// - [`ErrorKind::Parse`]
/// - [`ErrorKind::Encode`]
/// - [`ErrorKind::Transfer`]
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::Backup`] - also prevents the metadata from being overwritten.
///
/// ### Dependency Errors
/// - [`ErrorKind::Database`]
/// - [`ErrorKind::Rollback`]
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The pipeline was set up with unusable settings.
    #[display("invalid configuration")]
    Config,
    /// Stored metadata could not be decoded.
    #[display("cannot parse attachment metadata")]
    Parse,
    /// Updated metadata could not be serialized.
    #[display("cannot encode attachment metadata")]
    Encode,
    /// Fetching from the origin or uploading to object storage failed.
    #[display("file transfer failed")]
    Transfer,
    /// The requested file or record does not exist.
    #[display("not found")]
    NotFound,
    /// A backup could not be written or read back intact.
    #[display("backup failed")]
    Backup,
    /// A backed-up value could not be written back into the database.
    #[display("rollback failed")]
    Rollback,
    /// The attachment cursor broke mid-run.
    #[display("attachment cursor failed")]
    Cursor,
    /// A query outside the attachment cursor failed.
    #[display("database operation failed")]
    Database,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer | Self::Database)
    }

    /// Returns `true` if the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config | Self::Cursor)
    }
}
