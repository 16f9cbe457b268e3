//! Async helpers that don't belong to any single pipeline.

mod pool;

pub use crate::pool::{DEFAULT_WORKERS, WorkerPool};
