use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "offload", version, about = "Move WordPress media attachments to S3-compatible object storage")]
pub struct Cli {
    /// Configuration file, merged over `offload.toml` and under `OFFLOAD_*`
    /// environment variables.
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Read everything, write nothing. Object storage credentials may be
    /// left out; the bucket is then checked anonymously.
    #[arg(long, global = true)]
    pub dry_run: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Copy attachments to object storage and point their metadata at it.
    Migrate(BatchArgs),
    /// Same as `migrate --dry-run`; stops after 500 attachments.
    DryRun(BatchArgs),
    /// Put an attachment's metadata back as it was before migrating.
    Rollback {
        /// Attachment (or, with `--elementor`, post) id.
        id: i64,
        /// Restore a page's Elementor document instead.
        #[arg(long)]
        elementor: bool,
    },
    /// Compare metadata, the uploads directory and object storage, then offer
    /// to delete local copies that are safely stored remotely.
    Audit {
        /// Delete without asking for confirmation.
        #[arg(long, short)]
        yes: bool,
    },
    /// Summarise the size variants of every attachment.
    List,
    /// Point Elementor page data at object storage.
    RewriteLinks {
        /// Write the changes; without it only reports what would change.
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Debug, Clone, Copy, Args)]
pub struct BatchArgs {
    /// Attachments buffered per batch (defaults to the configured value).
    #[arg(long, value_name = "ROWS")]
    pub batch_size: Option<usize>,
    /// Skip this many attachments, e.g. the offset reported by an interrupted
    /// run.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
}
