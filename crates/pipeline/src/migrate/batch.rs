use super::attachment::{Outcome, process};
use crate::Context;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use offload_db::AttachmentRow;
use tokio::sync::mpsc;

/// Dry runs stop after this many attachments.
pub const DRY_RUN_LIMIT: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Rows buffered before they are processed; also the capacity of the
    /// channel between the database cursor and the workers.
    pub batch_size: usize,
    pub dry_run: bool,
    /// Number of attachments (in id order) to skip, as reported by an
    /// earlier run's [`RunSummary::next_offset`].
    pub resume_offset: u64,
}
impl Default for RunOptions {
    fn default() -> Self {
        Self { batch_size: 100, dry_run: false, resume_offset: 0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows read from the database.
    pub consumed: u64,
    /// Rows handed to the worker.
    pub processed: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Size variants that could not be migrated, across all attachments.
    pub variant_failures: u64,
    /// Offset to pass to the next run to carry on where this one stopped.
    pub next_offset: u64,
}
impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Migrated { variant_failures } => {
                self.migrated += 1;
                self.variant_failures += *variant_failures as u64;
            },
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Progress events emitted by [`run`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) - exactly once.
/// 2. [`Processed`](Self::Processed) - once per attachment, each batch
///    followed by one [`Flushed`](Self::Flushed) carrying the offset to
///    resume from.
/// 3. [`Complete`](Self::Complete) - exactly once, with the final counts.
///
/// A fatal error terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug)]
pub enum BatchEvent {
    Started { offset: u64 },
    Processed { id: i64, outcome: Outcome },
    Flushed { rows: usize, next_offset: u64 },
    Complete(RunSummary),
}

/// Streams every attachment, starting at `options.resume_offset`, through
/// the worker.
///
/// A producer task reads rows from a single forward-only cursor into a
/// bounded channel, so the database is never more than one batch ahead of
/// the worker. Rows are processed one at a time, a batch at a time. Per-row
/// failures are reported as [`Outcome`]s; only a broken cursor ends the
/// stream with an error (after the rows read so far have been processed, so
/// resuming from the reported position doesn't skip anything).
pub fn run<'a>(ctx: &'a Context, options: RunOptions) -> impl Stream<Item = Result<BatchEvent>> + 'a {
    let repo = ctx.repo.clone();
    let rows = stream! {
        for await row in repo.stream_attachments(options.resume_offset) {
            yield row;
        }
    };
    run_rows(ctx, options, rows)
}

/// [`run`] over any source of rows, read in a producer task.
fn run_rows<'a, S>(ctx: &'a Context, options: RunOptions, rows: S) -> impl Stream<Item = Result<BatchEvent>> + 'a
where
    S: Stream<Item = offload_db::error::Result<AttachmentRow>> + Send + 'static,
{
    stream!({
        let RunOptions { batch_size, dry_run, resume_offset } = options;
        if batch_size == 0 {
            yield Err(exn::Exn::from(ErrorKind::Config));
            return;
        }
        yield Ok(BatchEvent::Started { offset: resume_offset });
        tracing::info!(offset = resume_offset, batch_size, dry_run, "Migration started");

        let (tx, mut rx) = mpsc::channel::<offload_db::error::Result<AttachmentRow>>(batch_size);
        let producer = tokio::spawn(async move {
            let mut rows = std::pin::pin!(rows);
            while let Some(row) = rows.next().await {
                let failed = row.is_err();
                // Closed channel: the consumer stopped early.
                if tx.send(row).await.is_err() || failed {
                    break;
                }
            }
        });

        let limit = dry_run.then_some(DRY_RUN_LIMIT);
        let mut summary = RunSummary { next_offset: resume_offset, ..RunSummary::default() };
        let mut buffer: Vec<AttachmentRow> = Vec::with_capacity(batch_size);
        let mut cursor_error = None;
        let mut exhausted = false;
        loop {
            let mut capped = limit.is_some_and(|limit| summary.consumed >= limit);
            while !exhausted && !capped && buffer.len() < batch_size {
                match rx.recv().await {
                    Some(Ok(row)) => {
                        summary.consumed += 1;
                        buffer.push(row);
                        capped = limit.is_some_and(|limit| summary.consumed >= limit);
                    },
                    Some(Err(e)) => {
                        cursor_error = Some(e);
                        exhausted = true;
                    },
                    None => exhausted = true,
                }
            }

            if !buffer.is_empty() {
                let rows = buffer.len();
                for row in buffer.drain(..) {
                    let outcome = process(ctx, &row, dry_run).await;
                    summary.record(&outcome);
                    yield Ok(BatchEvent::Processed { id: row.id, outcome });
                }
                summary.next_offset = resume_offset + summary.consumed;
                tracing::info!(rows, processed = summary.processed, next_offset = summary.next_offset, "Batch flushed");
                yield Ok(BatchEvent::Flushed { rows, next_offset: summary.next_offset });
            }

            if capped {
                tracing::info!(limit = DRY_RUN_LIMIT, "Dry-run limit reached; stopping early");
                break;
            }
            if exhausted {
                break;
            }
        }
        // Dropping the receiver stops the producer, which closes the cursor.
        drop(rx);
        producer.abort();

        summary.next_offset = resume_offset + summary.consumed;
        if let Some(e) = cursor_error {
            tracing::error!(next_offset = summary.next_offset, "Attachment cursor failed");
            let failed: Result<BatchEvent> = Err(e).or_raise(|| ErrorKind::Cursor);
            yield failed;
            return;
        }
        tracing::info!(
            processed = summary.processed,
            migrated = summary.migrated,
            skipped = summary.skipped,
            failed = summary.failed,
            variant_failures = summary.variant_failures,
            next_offset = summary.next_offset,
            "Migration complete"
        );
        yield Ok(BatchEvent::Complete(summary));
    })
}

/// Drive [`run`] to the end, returning its summary.
pub async fn run_to_completion(ctx: &Context, options: RunOptions) -> Result<RunSummary> {
    let mut events = std::pin::pin!(run(ctx, options));
    while let Some(event) = events.next().await {
        if let BatchEvent::Complete(summary) = event? {
            return Ok(summary);
        }
    }
    exn::bail!(ErrorKind::Cursor)
}
