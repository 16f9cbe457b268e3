//! Migrate, audit, clean up and roll back a small site, with the uploads
//! directory and backups on real disk and object storage in memory.

use offload_asyncutils::WorkerPool;
use offload_db::{Database, Repository};
use offload_pipeline::Context;
use offload_pipeline::audit::{audit_to_completion, cleanup};
use offload_pipeline::backup::BackupStore;
use offload_pipeline::migrate::{RunOptions, run_to_completion};
use offload_pipeline::origin::BackendOrigin;
use offload_pipeline::remote::RemoteStore;
use offload_pipeline::rollback;
use offload_storage::BackendHandle;
use offload_storage::backend::{LocalBackend, MockBackend};
use std::collections::BTreeSet;
use std::sync::Arc;

const PHOTO: &str = concat!(
    r#"a:3:{s:5:"width";i:1200;s:4:"file";s:17:"2024/01/photo.jpg";s:5:"sizes";a:2:{"#,
    r#"s:9:"thumbnail";a:4:{s:4:"file";s:17:"photo-150x150.jpg";s:5:"width";i:150;s:6:"height";i:150;s:9:"mime-type";s:10:"image/jpeg";}"#,
    r#"s:6:"medium";a:4:{s:4:"file";s:17:"photo-300x200.jpg";s:5:"width";i:300;s:6:"height";i:200;s:9:"mime-type";s:10:"image/jpeg";}"#,
    r#"}}"#,
);
const DOCUMENT: &str = r#"a:1:{s:4:"file";s:16:"2024/02/menu.pdf";}"#;

struct Site {
    db: Database,
    ctx: Context,
    uploads: BackendHandle,
    bucket: Arc<MockBackend>,
    dir: tempfile::TempDir,
}

async fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for file in ["2024/01/photo.jpg", "2024/01/photo-150x150.jpg", "2024/01/photo-300x200.jpg", "2024/02/menu.pdf"] {
        let path = root.join("uploads").join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, file.as_bytes()).unwrap();
    }

    let db = Database::connect_scratch(root).await.unwrap();
    let repo = Repository::from(&db);
    repo.insert_attachment(10, "photo", PHOTO).await.unwrap();
    repo.insert_attachment(11, "menu", DOCUMENT).await.unwrap();

    let uploads: BackendHandle = Arc::new(LocalBackend::new("uploads", root.join("uploads")).unwrap());
    let bucket = Arc::new(MockBackend::default());
    let ctx = Context {
        origin: Arc::new(BackendOrigin::new(uploads.clone(), root.join("scratch"))),
        remote: RemoteStore::new(bucket.clone(), "media", "https://media.example.com").with_prefix("wp"),
        backups: BackupStore::new(Arc::new(LocalBackend::new("backups", root.join("backups")).unwrap())),
        repo,
    };
    std::fs::create_dir_all(root.join("scratch")).unwrap();
    Site { db, ctx, uploads, bucket, dir }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let site = site().await;

    // Migrate everything.
    let summary = run_to_completion(&site.ctx, RunOptions { batch_size: 1, ..RunOptions::default() }).await.unwrap();
    assert_eq!(summary.migrated, 2);
    assert_eq!(summary.next_offset, 2);
    assert_eq!(site.bucket.writes(), 4);
    assert_eq!(site.bucket.contents("wp/2024/01/photo-300x200.jpg").await.unwrap(), b"2024/01/photo-300x200.jpg");

    let metadata = offload_codec::decode(&site.ctx.repo.get_attachment_metadata(10).await.unwrap().unwrap()).unwrap();
    assert!(metadata.is_migrated());
    assert_eq!(metadata.remote.as_ref().unwrap().url, "https://media.example.com/wp/2024/01/photo.jpg");
    assert!(metadata.sizes.variants().all(|(_, variant)| variant.is_migrated()));
    // Fields the tool doesn't know about survive.
    assert_eq!(metadata.field("width").and_then(offload_codec::Value::as_u64), Some(1200));
    assert!(site.dir.path().join("backups/10.json").is_file());
    // Scratch downloads are cleaned up.
    assert_eq!(std::fs::read_dir(site.dir.path().join("scratch")).unwrap().count(), 0);

    // Every local file is now safe to delete.
    let report = audit_to_completion(&site.ctx.repo, &site.uploads, &site.ctx.remote, WorkerPool::new(2)).await.unwrap();
    let expected: BTreeSet<String> =
        ["2024/01/photo.jpg", "2024/01/photo-150x150.jpg", "2024/01/photo-300x200.jpg", "2024/02/menu.pdf"]
            .map(String::from)
            .into();
    assert_eq!(report.candidates, expected);
    assert_eq!(report.counts.checks, 4);

    let cleaned = cleanup(&site.uploads, &report.candidates).await;
    assert_eq!(cleaned.deleted.len(), 4);
    assert!(cleaned.failed.is_empty());
    assert!(!site.dir.path().join("uploads/2024/01/photo.jpg").exists());

    // A second audit finds nothing left to delete, and everything still remote.
    let report = audit_to_completion(&site.ctx.repo, &site.uploads, &site.ctx.remote, WorkerPool::new(2)).await.unwrap();
    assert!(report.candidates.is_empty());
    assert_eq!(report.counts.missing_locally, 4);

    // Roll the photo back.
    rollback(&site.ctx, 10).await.unwrap();
    assert_eq!(site.ctx.repo.get_attachment_metadata(10).await.unwrap().as_deref(), Some(PHOTO));
    assert!(!site.dir.path().join("backups/10.json").exists());
    assert!(site.dir.path().join("backups/11.json").is_file());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let site = site().await;
    let options = RunOptions { dry_run: true, ..RunOptions::default() };
    let ctx = Context { repo: Repository::new(site.db.clone(), true), ..site.ctx.clone() };

    let summary = run_to_completion(&ctx, options).await.unwrap();
    assert_eq!(summary.migrated, 2);
    assert_eq!(site.bucket.writes(), 0);
    assert_eq!(ctx.repo.get_attachment_metadata(10).await.unwrap().as_deref(), Some(PHOTO));
    assert!(!site.dir.path().join("backups/10.json").exists());
}
