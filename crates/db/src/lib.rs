//! Access to the WordPress tables holding attachment metadata.
//!
//! WordPress stays the source of truth: rows are streamed in primary key
//! order and the only writes are in-place updates of existing postmeta values.
//! Production runs against MySQL/MariaDB, tests against in-memory SQLite, both
//! through sqlx's `Any` driver.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::{DEFAULT_TABLE_PREFIX, Database};
pub use crate::models::{AttachmentRow, PostmetaRow};
pub use crate::repo::{ATTACHMENT_METADATA_KEY, Repository};
