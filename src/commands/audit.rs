use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use futures::StreamExt;
use offload_pipeline::audit::{self, AuditEvent, AuditReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub async fn run(services: &Services, yes: bool) -> Result<()> {
    let ctx = &services.ctx;
    let mut report = None;
    let mut events = std::pin::pin!(audit::audit(&ctx.repo, &services.uploads, &ctx.remote, services.audit_pool));
    while let Some(event) = events.next().await {
        if let AuditEvent::Complete(complete) = event.or_raise(|| ErrorKind::Command("audit"))? {
            report = Some(complete);
        }
    }
    let Some(report) = report else {
        exn::bail!(ErrorKind::Command("audit"));
    };
    print_report(&report);

    if report.candidates.is_empty() {
        return Ok(());
    }
    if services.dry_run {
        println!("Dry run: not deleting anything.");
        return Ok(());
    }
    let question = format!("Delete {} local files that are stored remotely? (y/N) ", report.candidates.len());
    if !yes && !confirm(&question).await? {
        println!("Nothing deleted.");
        return Ok(());
    }
    let cleanup = audit::cleanup(&services.uploads, &report.candidates).await;
    println!("Deleted {} files.", cleanup.deleted.len());
    for (path, reason) in &cleanup.failed {
        println!("  could not delete {path}: {reason}");
    }
    Ok(())
}

fn print_report(report: &AuditReport) {
    let counts = &report.counts;
    println!("Audited {} attachments ({} files):", counts.attachments, counts.checks);
    println!("  safe to delete locally: {}", report.candidates.len());
    println!("  missing remotely:       {}", counts.missing_remotely);
    println!("  missing locally:        {}", counts.missing_locally);
    println!("  missing everywhere:     {}", counts.missing_both);
    println!("  could not check:        {}", counts.probe_failed);
    println!("  malformed metadata:     {}", counts.malformed);
}

/// Only an explicit `y` (or `yes`) counts as agreement.
async fn confirm(question: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await.or_raise(|| ErrorKind::Prompt)?;
    stdout.flush().await.or_raise(|| ErrorKind::Prompt)?;
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut answer).await.or_raise(|| ErrorKind::Prompt)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
