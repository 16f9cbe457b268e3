//! Every long-lived handle a command needs, built once from the configuration.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use offload_asyncutils::WorkerPool;
use offload_config::{Config, OriginConfig};
use offload_db::{Database, Repository};
use offload_pipeline::Context;
use offload_pipeline::backup::BackupStore;
use offload_pipeline::origin::{BackendOrigin, HttpOrigin, OriginSource};
use offload_pipeline::remote::RemoteStore;
use offload_storage::BackendHandle;
use offload_storage::backend::{LocalBackend, ReadOnlyBackend, S3Backend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct Services {
    db: Database,
    /// The WordPress uploads directory.
    pub uploads: BackendHandle,
    pub ctx: Context,
    pub audit_pool: WorkerPool,
    pub dry_run: bool,
}

impl Services {
    /// Connect to everything `config` describes.
    ///
    /// With `dry_run`, every backend that could be written to is wrapped in a
    /// [`ReadOnlyBackend`] and the repository skips its writes.
    pub async fn build(config: &Config, dry_run: bool) -> Result<Self> {
        let db = Database::connect(&config.database.url, &config.database.table_prefix, config.database.max_connections)
            .await
            .or_raise(|| ErrorKind::Setup("database"))?;

        let uploads = guard(local("uploads", &config.uploads_root)?, dry_run);
        let backups = guard(local("backups", &config.backup_dir)?, dry_run);
        let bucket = guard(s3(config, dry_run).await?, dry_run);

        let scratch_dir = absolute(&config.scratch_dir())?;
        tokio::fs::create_dir_all(&scratch_dir).await.or_raise(|| ErrorKind::Setup("scratch directory"))?;
        let origin: Arc<dyn OriginSource> = match &config.origin {
            OriginConfig::Local { root: None } => Arc::new(BackendOrigin::new(uploads.clone(), &scratch_dir)),
            OriginConfig::Local { root: Some(root) } => {
                // Only ever read from.
                Arc::new(BackendOrigin::new(Arc::new(local("origin", root)?), &scratch_dir))
            },
            OriginConfig::Http { base_url, timeout_secs } => Arc::new(
                HttpOrigin::new(base_url, Duration::from_secs(*timeout_secs), &scratch_dir)
                    .or_raise(|| ErrorKind::Setup("HTTP origin"))?,
            ),
        };

        let remote = RemoteStore::new(bucket, &config.remote.bucket, config.remote.public_base_url())
            .with_prefix(&config.remote.prefix)
            .with_access_policy(&config.remote.acl)
            .with_probe_timeout(Duration::from_secs(config.remote.timeout_secs));
        let ctx = Context { origin, remote, backups: BackupStore::new(backups), repo: Repository::new(db.clone(), dry_run) };
        tracing::debug!(origin = ctx.origin.name(), uploads = uploads.name(), dry_run, "Services ready");
        Ok(Self { db, uploads, ctx, audit_pool: WorkerPool::new(config.audit_concurrency), dry_run })
    }

    /// Close the database pool, waiting for connections to be returned.
    pub async fn shutdown(self) {
        self.db.close().await;
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).or_raise(|| ErrorKind::Setup("path"))
}

fn local(name: &'static str, root: &Path) -> Result<LocalBackend> {
    LocalBackend::new(name, absolute(root)?).or_raise(|| ErrorKind::Setup(name))
}

async fn s3(config: &Config, dry_run: bool) -> Result<S3Backend> {
    let remote = &config.remote;
    let backend = match (remote.key_id.as_deref(), remote.key_secret.as_deref()) {
        (Some(key_id), Some(key_secret)) => {
            S3Backend::new("s3", &remote.bucket, &remote.region, remote.endpoint.clone(), key_id, key_secret).await
        },
        // Dry runs write nothing; the bucket is only read, and anonymous
        // reads fail as unknown existence rather than aborting the run.
        _ if dry_run => {
            tracing::warn!(bucket = %remote.bucket, "No object storage credentials; checking the bucket anonymously");
            S3Backend::without_credentials("s3", &remote.bucket, &remote.region, remote.endpoint.clone())
        },
        _ => exn::bail!(ErrorKind::Config),
    }
    .or_raise(|| ErrorKind::Setup("object storage"))?;
    Ok(backend.with_acl(&remote.acl).with_timeout(Duration::from_secs(remote.timeout_secs)))
}

fn guard(backend: impl offload_storage::StorageBackend + 'static, dry_run: bool) -> BackendHandle {
    let backend: BackendHandle = Arc::new(backend);
    if dry_run { Arc::new(ReadOnlyBackend::new(backend)) } else { backend }
}
