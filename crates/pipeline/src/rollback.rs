use crate::Context;
use crate::backup::BackupStore;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use offload_db::{ATTACHMENT_METADATA_KEY, Repository};
use tracing::instrument;

/// Put the backed-up metadata of attachment `id` back, then discard the
/// backup.
///
/// Fails with [`Rollback`](ErrorKind::Rollback) when there is no usable
/// backup, in which case the database is left untouched, or when the value
/// could not be put back, in which case the backup is kept.
pub async fn rollback(ctx: &Context, id: i64) -> Result<()> {
    rollback_meta(&ctx.repo, &ctx.backups, id, ATTACHMENT_METADATA_KEY).await
}

/// [`rollback()`] for any postmeta value backed up in `backups`.
#[instrument(skip(repo, backups))]
pub async fn rollback_meta(repo: &Repository, backups: &BackupStore, post_id: i64, meta_key: &str) -> Result<()> {
    let raw = backups.restore(post_id).await.or_raise(|| ErrorKind::Rollback)?;
    let rows = repo.update_postmeta(post_id, meta_key, &raw).await.or_raise(|| ErrorKind::Rollback)?;
    if repo.is_dry_run() {
        tracing::info!(post_id, "Keeping backup during dry run");
        return Ok(());
    }
    if rows == 0 {
        // MySQL also reports zero rows when the value was already in place.
        let stored = repo.get_postmeta(post_id, meta_key).await.or_raise(|| ErrorKind::Rollback)?;
        if stored.as_deref() != Some(raw.as_str()) {
            tracing::error!(post_id, meta_key, found = stored.is_some(), "Nothing to restore into; keeping the backup");
            exn::bail!(ErrorKind::Rollback);
        }
        tracing::info!(post_id, meta_key, "Value was already in place");
    }
    backups.discard(post_id).await.or_raise(|| ErrorKind::Rollback)?;
    tracing::info!(post_id, meta_key, "Restored from backup");
    Ok(())
}
