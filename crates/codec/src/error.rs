//! Codec Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The serialized data is syntactically broken.
    #[display("malformed serialized data at byte {offset}: {reason}")]
    Syntax { offset: usize, reason: &'static str },
    /// A complete value was read but more (non-whitespace) data follows it.
    #[display("unexpected trailing data at byte {_0}")]
    TrailingData(#[error(not(source))] usize),
    /// The serialized value is valid, but it is not a keyed structure.
    #[display("serialized value is not a keyed structure")]
    NotKeyed,
    /// A required field could not be found.
    #[display("missing required field: {_0}")]
    MissingField(#[error(not(source))] &'static str),
    /// A field was found but holds an unusable value.
    #[display("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: &'static str },
    /// The in-memory metadata breaks an invariant and cannot be serialized.
    #[display("cannot encode metadata: {_0}")]
    Unencodable(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if the error happened while encoding (as opposed to
    /// decoding) metadata.
    pub fn is_encode(&self) -> bool {
        matches!(self, Self::Unencodable(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Serialized data is either valid or it isn't.
        false
    }
}
