//! Database Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A database error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Connecting to the database failed.
    #[display("cannot connect to database")]
    Connect,
    #[display("database error")]
    Database,
    /// The configured table prefix could end up injected into SQL.
    #[display("invalid table prefix: {_0:?}")]
    InvalidPrefix(#[error(not(source))] String),
    /// A value read from or bound to the database is out of range.
    #[display("invalid data in column '{_0}'")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect)
    }
}
