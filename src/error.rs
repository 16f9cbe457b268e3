//! Command Error Types
//!
//! Errors from the library crates are raised into one of these kinds by the
//! command that hit them; the whole tree is printed on exit.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    /// A service (database, storage backend, HTTP client) could not be set up.
    #[display("cannot set up {_0}")]
    Setup(#[error(not(source))] &'static str),
    /// The command started but could not finish.
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
    #[display("cannot read from the terminal")]
    Prompt,
}
