use crate::cli::BatchArgs;
use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use futures::StreamExt;
use offload_config::Config;
use offload_pipeline::migrate::{self, BatchEvent, Outcome, RunOptions};

pub async fn run(services: &Services, config: &Config, batch: BatchArgs) -> Result<()> {
    let options = RunOptions {
        batch_size: batch.batch_size.unwrap_or(config.batch_size),
        dry_run: services.dry_run,
        resume_offset: batch.offset,
    };
    let mut events = std::pin::pin!(migrate::run(&services.ctx, options));
    while let Some(event) = events.next().await {
        match event {
            Ok(BatchEvent::Processed { id, outcome: Outcome::Failed(kind) }) => {
                tracing::warn!(id, error = %kind, "Attachment not migrated");
            },
            Ok(BatchEvent::Complete(summary)) => {
                println!("Processed {} attachments:", summary.processed);
                println!("  migrated:         {}", summary.migrated);
                println!("  skipped:          {}", summary.skipped);
                println!("  failed:           {}", summary.failed);
                println!("  variant failures: {}", summary.variant_failures);
                println!("Next offset: {}", summary.next_offset);
            },
            Ok(_) => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Command("migration")),
        }
    }
    Ok(())
}
