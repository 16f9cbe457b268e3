//! Layered configuration for offload.
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. built-in defaults,
//! 2. `offload.toml` in the platform configuration directory,
//! 3. `offload.toml` in the working directory,
//! 4. an explicitly requested file (`--config`),
//! 5. `OFFLOAD_` environment variables, with `__` separating nested keys
//!    (`OFFLOAD_REMOTE__BUCKET=media`).

pub mod error;
mod models;

pub use crate::models::{Config, DatabaseConfig, OriginConfig, RemoteConfig};
pub use crate::models::{DEFAULT_AUDIT_CONCURRENCY, DEFAULT_BATCH_SIZE};
