use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::remote::Probe;
use exn::ResultExt;
use offload_codec::{Metadata, RemoteDescriptor};
use offload_db::AttachmentRow;
use tracing::instrument;

/// Why an attachment was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A valid descriptor exists and the object was confirmed present.
    AlreadyMigrated,
    /// The stored metadata can't be decoded or has no usable primary file.
    Malformed,
}

/// What happened to a single attachment. Migration never returns an error;
/// failures are an outcome like any other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// The primary file is in object storage and the metadata was rewritten
    /// (or would have been, during a dry run). Size variants that failed kept
    /// their previous state.
    Migrated { variant_failures: usize },
    Failed(ErrorKind),
}
impl Outcome {
    pub fn is_migrated(&self) -> bool {
        matches!(self, Self::Migrated { .. })
    }
}

/// Decode a row's metadata and [`migrate()`] it.
pub async fn process(ctx: &Context, row: &AttachmentRow, dry_run: bool) -> Outcome {
    match offload_codec::decode(&row.meta_value) {
        Ok(metadata) => migrate(ctx, row.id, metadata, &row.meta_value, dry_run).await,
        Err(e) => {
            tracing::warn!(id = row.id, error = ?e, "Skipping attachment with malformed metadata");
            Outcome::Skipped(SkipReason::Malformed)
        },
    }
}

/// Copy an attachment and its size variants to object storage, then store the
/// updated metadata.
///
/// In order:
///
/// 1. An attachment whose descriptor is valid and whose object is confirmed
///    present is skipped without any transfer. A valid descriptor pointing at
///    a missing object ("ghost" metadata) is migrated again.
/// 2. The primary file is fetched from the origin and uploaded.
/// 3. Each size variant is fetched and uploaded independently; failures are
///    logged and leave that variant as it was.
/// 4. The original value is backed up, and only then overwritten.
///
/// During a dry run nothing is fetched, uploaded, backed up or written:
/// descriptors get a placeholder URL instead.
#[instrument(skip(ctx, metadata, raw), fields(file = %metadata.primary_file))]
pub async fn migrate(ctx: &Context, id: i64, mut metadata: Metadata, raw: &str, dry_run: bool) -> Outcome {
    match migrate_inner(ctx, id, &mut metadata, raw, dry_run).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(id, error = ?e, "Failed to migrate attachment");
            Outcome::Failed(*e)
        },
    }
}

async fn migrate_inner(ctx: &Context, id: i64, metadata: &mut Metadata, raw: &str, dry_run: bool) -> Result<Outcome> {
    let mut ghost = false;
    if let Some(remote) = metadata.remote.as_ref().filter(|remote| remote.is_valid()) {
        if dry_run {
            tracing::info!(id, key = %remote.key, "Already migrated");
            return Ok(Outcome::Skipped(SkipReason::AlreadyMigrated));
        }
        match ctx.remote.probe(&remote.key).await {
            Probe::Present => {
                tracing::info!(id, key = %remote.key, "Already migrated");
                return Ok(Outcome::Skipped(SkipReason::AlreadyMigrated));
            },
            probe => {
                tracing::warn!(id, key = %remote.key, ?probe, "Metadata points at an object that can't be confirmed; migrating again");
                ghost = true;
            },
        }
    }

    let key = ctx.remote.key_for(&metadata.primary_file);
    metadata.remote = Some(transfer(ctx, &metadata.primary_file, &key, None, dry_run).await?);

    let variant_failures = migrate_variants(ctx, id, metadata, ghost, dry_run).await;

    let blob = offload_codec::encode(metadata).or_raise(|| ErrorKind::Encode)?;
    if dry_run {
        tracing::info!(id, variant_failures, "Would migrate attachment");
        return Ok(Outcome::Migrated { variant_failures });
    }

    ctx.backups.backup(id, raw).await?;
    let updated = ctx.repo.update_attachment_metadata(id, &blob).await.or_raise(|| ErrorKind::Database)?;
    if updated == 0 {
        tracing::warn!(id, "No metadata row was changed");
    }
    tracing::info!(id, variant_failures, "Migrated attachment");
    Ok(Outcome::Migrated { variant_failures })
}

/// Returns the number of variants that could not be migrated.
async fn migrate_variants(ctx: &Context, id: i64, metadata: &mut Metadata, ghost: bool, dry_run: bool) -> usize {
    // Resolve paths up front; variants are borrowed mutably below.
    let paths: Vec<String> = metadata.sizes.variants().map(|(_, variant)| metadata.variant_path(&variant.file_name)).collect();
    let mut failures = 0;
    for ((name, variant), path) in metadata.sizes.variants_mut().zip(paths) {
        if let Some(remote) = variant.remote.as_ref().filter(|remote| remote.is_valid()) {
            if !ghost || dry_run {
                tracing::debug!(id, size = %name, "Size already migrated");
                continue;
            }
            match ctx.remote.probe(&remote.key).await {
                Probe::Present => continue,
                Probe::Absent => variant.remote = None,
                Probe::Unknown => {},
            }
        }

        let key = ctx.remote.key_for(&path);
        match transfer(ctx, &path, &key, variant.mime_type.as_deref(), dry_run).await {
            Ok(descriptor) => variant.remote = Some(descriptor),
            Err(e) => {
                tracing::warn!(id, size = %name, path, error = ?e, "Skipping size");
                failures += 1;
            },
        }
    }
    failures
}

/// Fetch from the origin and upload, or pretend to during a dry run.
async fn transfer(ctx: &Context, path: &str, key: &str, mime_type: Option<&str>, dry_run: bool) -> Result<RemoteDescriptor> {
    if dry_run {
        return Ok(ctx.remote.placeholder(key, mime_type));
    }
    let scratch = ctx.origin.fetch(path).await?;
    let descriptor = ctx.remote.put(scratch.path(), key, mime_type).await?;
    if let Err(e) = scratch.close() {
        tracing::warn!(path, error = ?e, "Could not remove scratch file");
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::origin::BackendOrigin;
    use crate::remote::RemoteStore;
    use offload_db::{Database, Repository};
    use offload_storage::backend::{MockBackend, StorageBackend};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const RAW: &str = concat!(
        r#"a:3:{s:4:"file";s:13:"2024/01/a.jpg";s:5:"sizes";a:3:{"#,
        r#"s:9:"thumbnail";a:2:{s:4:"file";s:13:"a-150x150.jpg";s:9:"mime-type";s:10:"image/jpeg";}"#,
        r#"s:6:"medium";a:2:{s:4:"file";s:13:"a-300x200.jpg";s:9:"mime-type";s:10:"image/jpeg";}"#,
        r#"s:5:"large";a:2:{s:4:"file";s:14:"a-1024x683.jpg";s:9:"mime-type";s:10:"image/jpeg";}"#,
        r#"}s:10:"image_meta";a:0:{}}"#
    );

    struct Harness {
        ctx: Context,
        remote: Arc<MockBackend>,
        backups: Arc<MockBackend>,
        _scratch: TempDir,
    }

    async fn harness(origin: MockBackend, remote: MockBackend, dry_run: bool) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db).insert_attachment(42, "a", RAW).await.unwrap();
        let remote = Arc::new(remote);
        let backups = Arc::new(MockBackend::default());
        let ctx = Context {
            origin: Arc::new(BackendOrigin::new(Arc::new(origin), scratch.path())),
            remote: RemoteStore::new(remote.clone(), "media", "https://media.s3.eu-west-3.amazonaws.com"),
            backups: BackupStore::new(backups.clone()),
            repo: Repository::new(db, dry_run),
        };
        Harness { ctx, remote, backups, _scratch: scratch }
    }

    fn all_files() -> MockBackend {
        MockBackend::with_files([
            ("2024/01/a.jpg", b"main".to_vec()),
            ("2024/01/a-150x150.jpg", b"thumb".to_vec()),
            ("2024/01/a-300x200.jpg", b"medium".to_vec()),
            ("2024/01/a-1024x683.jpg", b"large".to_vec()),
        ])
    }

    async fn stored(h: &Harness) -> Metadata {
        let blob = h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap();
        offload_codec::decode(&blob).unwrap()
    }

    #[tokio::test]
    async fn test_migrates_primary_and_variants() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        let outcome = migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        assert_eq!(outcome, Outcome::Migrated { variant_failures: 0 });
        assert_eq!(h.remote.writes(), 4);
        assert_eq!(h.remote.contents("2024/01/a-150x150.jpg").await.as_deref(), Some(&b"thumb"[..]));

        let metadata = stored(&h).await;
        let primary = metadata.remote.as_ref().unwrap();
        assert_eq!(primary.url, "https://media.s3.eu-west-3.amazonaws.com/2024/01/a.jpg");
        assert_eq!(primary.key, "2024/01/a.jpg");
        assert_eq!(primary.bucket, "media");
        assert!(metadata.sizes.variants().all(|(_, v)| v.is_migrated()));
        assert_eq!(metadata.sizes.get("medium").unwrap().remote.as_ref().unwrap().key, "2024/01/a-300x200.jpg");
        // Pass-through entries survive.
        assert!(metadata.field("image_meta").is_some());
    }

    #[tokio::test]
    async fn test_confirmed_attachment_is_not_transferred_again() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        assert!(migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await.is_migrated());
        let writes = h.remote.writes();
        let migrated = h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap();

        let row = AttachmentRow { id: 42, meta_value: migrated.clone() };
        assert_eq!(process(&h.ctx, &row, false).await, Outcome::Skipped(SkipReason::AlreadyMigrated));
        assert_eq!(h.remote.writes(), writes);
        assert_eq!(h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap(), migrated);
    }

    #[tokio::test]
    async fn test_failing_variant_does_not_affect_others() {
        let origin = all_files().failing_on("2024/01/a-300x200.jpg");
        let h = harness(origin, MockBackend::default(), false).await;
        let outcome = migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        assert_eq!(outcome, Outcome::Migrated { variant_failures: 1 });

        let metadata = stored(&h).await;
        assert!(metadata.is_migrated());
        assert!(metadata.sizes.get("thumbnail").unwrap().is_migrated());
        assert!(!metadata.sizes.get("medium").unwrap().is_migrated());
        assert!(metadata.sizes.get("large").unwrap().is_migrated());
        assert_eq!(h.remote.writes(), 3);
    }

    #[tokio::test]
    async fn test_backup_holds_original_value() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        assert_eq!(h.ctx.backups.restore(42).await.unwrap(), RAW);
        assert_ne!(h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap(), RAW);
    }

    #[tokio::test]
    async fn test_backup_failure_prevents_write() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        let ctx = Context {
            backups: BackupStore::new(Arc::new(MockBackend::default().failing_on("42.json"))),
            ..h.ctx.clone()
        };
        let outcome = migrate(&ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        assert_eq!(outcome, Outcome::Failed(ErrorKind::Backup));
        assert_eq!(h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap(), RAW);
    }

    #[tokio::test]
    async fn test_primary_failure() {
        let h = harness(MockBackend::default(), MockBackend::default(), false).await;
        let outcome = migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        assert_eq!(outcome, Outcome::Failed(ErrorKind::NotFound));
        assert_eq!(h.remote.writes(), 0);
        assert_eq!(h.backups.writes(), 0);
        assert_eq!(h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap(), RAW);
    }

    #[tokio::test]
    async fn test_ghost_metadata_is_migrated_again() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        let migrated = h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap();

        // Objects vanished from the bucket; the metadata still claims them.
        let h2 = harness(all_files(), MockBackend::default(), false).await;
        let outcome = migrate(&h2.ctx, 42, offload_codec::decode(&migrated).unwrap(), &migrated, false).await;
        assert_eq!(outcome, Outcome::Migrated { variant_failures: 0 });
        assert_eq!(h2.remote.writes(), 4);
        assert!(h2.remote.exists(Path::new("2024/01/a-150x150.jpg")).await.unwrap());
    }

    #[tokio::test]
    async fn test_ghost_keeps_confirmed_variants() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, false).await;
        let migrated = h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap();

        // Only the thumbnail survived in the bucket.
        let remote = MockBackend::with_files([("2024/01/a-150x150.jpg", b"thumb")]);
        let h2 = harness(all_files(), remote, false).await;
        migrate(&h2.ctx, 42, offload_codec::decode(&migrated).unwrap(), &migrated, false).await;
        assert_eq!(h2.remote.writes(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let h = harness(all_files(), MockBackend::default(), true).await;
        let outcome = migrate(&h.ctx, 42, offload_codec::decode(RAW).unwrap(), RAW, true).await;
        assert_eq!(outcome, Outcome::Migrated { variant_failures: 0 });
        assert_eq!(h.remote.writes(), 0);
        assert_eq!(h.backups.writes(), 0);
        assert_eq!(h.ctx.repo.get_attachment_metadata(42).await.unwrap().unwrap(), RAW);
    }

    #[tokio::test]
    async fn test_dry_run_placeholders() {
        let h = harness(MockBackend::default(), MockBackend::default(), true).await;
        let mut metadata = offload_codec::decode(RAW).unwrap();
        migrate_inner(&h.ctx, 42, &mut metadata, RAW, true).await.unwrap();
        assert_eq!(metadata.remote.as_ref().unwrap().url, "DRY_RUN_S3_URL/2024/01/a.jpg");
        assert_eq!(metadata.sizes.get("large").unwrap().remote.as_ref().unwrap().url, "DRY_RUN_S3_URL/2024/01/a-1024x683.jpg");
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let h = harness(all_files(), MockBackend::default(), false).await;
        for blob in ["not serialized", r#"a:1:{s:5:"sizes";a:0:{}}"#, r#"a:1:{s:4:"file";s:0:"";}"#] {
            let row = AttachmentRow { id: 42, meta_value: blob.to_string() };
            assert_eq!(process(&h.ctx, &row, false).await, Outcome::Skipped(SkipReason::Malformed));
        }
        assert_eq!(h.remote.writes(), 0);
    }
}
