use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use offload_pipeline::rewrite::{ELEMENTOR_BACKUP_NAMESPACE, ELEMENTOR_DATA_KEY};
use offload_pipeline::{rollback, rollback_meta};

pub async fn run(services: &Services, id: i64, elementor: bool) -> Result<()> {
    let ctx = &services.ctx;
    if elementor {
        let backups = ctx.backups.namespaced(ELEMENTOR_BACKUP_NAMESPACE);
        rollback_meta(&ctx.repo, &backups, id, ELEMENTOR_DATA_KEY).await
    } else {
        rollback(ctx, id).await
    }
    .or_raise(|| ErrorKind::Command("rollback"))?;
    if services.dry_run {
        println!("Dry run: post {id} has a usable backup; nothing was restored.");
    } else {
        println!("Restored post {id} from backup.");
    }
    Ok(())
}
