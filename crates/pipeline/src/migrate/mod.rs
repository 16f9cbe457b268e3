//! Attachment migration.
//!
//! [`migrate()`] and [`process()`] handle one attachment; [`run()`] streams
//! every attachment through them in batches, resumable from an offset.

mod attachment;
mod batch;

pub use self::attachment::{Outcome, SkipReason, migrate, process};
pub use self::batch::{BatchEvent, DRY_RUN_LIMIT, RunOptions, RunSummary, run, run_to_completion};
