use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use futures::StreamExt;
use offload_pipeline::rewrite::{RewriteEvent, rewrite};

pub async fn run(services: &Services, apply: bool) -> Result<()> {
    let mut events = std::pin::pin!(rewrite(&services.ctx, apply));
    while let Some(event) = events.next().await {
        match event.or_raise(|| ErrorKind::Command("link rewrite"))? {
            RewriteEvent::Rewritten { post_id, urls, applied: false } => {
                println!("Would update {urls} links in post {post_id}");
            },
            RewriteEvent::Failed { post_id, kind } => println!("Could not update post {post_id}: {kind}"),
            RewriteEvent::Complete(summary) => {
                println!(
                    "{} documents, {} with links to rewrite ({} links), {} invalid, {} failed.",
                    summary.documents, summary.rewritten, summary.urls, summary.invalid, summary.failed
                );
                if !summary.applied && summary.rewritten > 0 {
                    println!("Run again with --apply to write the changes.");
                }
            },
            _ => {},
        }
    }
    Ok(())
}
