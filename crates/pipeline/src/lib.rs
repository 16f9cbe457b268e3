//! The pipelines behind every offload command.
//!
//! - [`migrate`] copies attachments (and their size variants) to object
//!   storage and rewrites their metadata, in resumable batches.
//! - [`audit`] reconciles the database, the uploads directory and object
//!   storage, and finds local files that are safe to delete.
//! - [`rollback()`] puts a backed-up metadata value back.
//! - [`inventory`] and [`rewrite`] are reporting and clean-up helpers around
//!   the same tables.

pub mod audit;
pub mod backup;
pub mod error;
pub mod inventory;
pub mod migrate;
pub mod origin;
pub mod remote;
pub mod rewrite;
mod rollback;

use crate::backup::BackupStore;
use crate::origin::OriginSource;
use crate::remote::RemoteStore;
use offload_db::Repository;
use std::sync::Arc;

pub use crate::rollback::{rollback, rollback_meta};

/// Everything a migration needs, built once per run.
#[derive(Clone)]
pub struct Context {
    pub origin: Arc<dyn OriginSource>,
    pub remote: RemoteStore,
    pub backups: BackupStore,
    pub repo: Repository,
}
