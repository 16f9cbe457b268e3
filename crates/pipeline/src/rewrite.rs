//! Points page-builder (Elementor) documents at object storage.
//!
//! Elementor keeps each page as a JSON document in the `_elementor_data`
//! postmeta row, with media referenced by absolute URLs. Every `url` field
//! pointing into the uploads directory is replaced with the public URL of the
//! same file in object storage.

use crate::Context;
use crate::backup::BackupStore;
use crate::error::{ErrorKind, Result};
use crate::remote::RemoteStore;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use serde_json::Value;

/// Meta key Elementor stores page documents under.
pub const ELEMENTOR_DATA_KEY: &str = "_elementor_data";
/// Backups of rewritten documents are kept apart from attachment backups.
pub const ELEMENTOR_BACKUP_NAMESPACE: &str = "elementor";

const UPLOADS_MARKER: &str = "/wp-content/uploads/";

/// Rewrite every matching `url` field in `document`, returning how many
/// changed.
pub fn rewrite_urls(document: &mut Value, remote: &RemoteStore) -> usize {
    match document {
        Value::Array(items) => items.iter_mut().map(|item| rewrite_urls(item, remote)).sum(),
        Value::Object(fields) => {
            let mut changed = 0;
            for (key, value) in fields.iter_mut() {
                match value {
                    Value::String(url) if key == "url" => {
                        let rewritten = remote_url(url, remote).filter(|rewritten| rewritten.as_str() != url.as_str());
                        if let Some(rewritten) = rewritten {
                            *url = rewritten;
                            changed += 1;
                        }
                    },
                    value => changed += rewrite_urls(value, remote),
                }
            }
            changed
        },
        _ => 0,
    }
}

fn remote_url(url: &str, remote: &RemoteStore) -> Option<String> {
    let (_, relative) = url.split_once(UPLOADS_MARKER)?;
    if relative.is_empty() {
        return None;
    }
    Some(remote.url_for(&remote.key_for(relative)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    pub documents: u64,
    /// Documents with at least one URL to rewrite.
    pub rewritten: u64,
    pub urls: u64,
    pub unchanged: u64,
    pub invalid: u64,
    pub failed: u64,
    /// Whether changes were written back.
    pub applied: bool,
}

/// Progress events emitted by [`rewrite`].
///
/// [`Started`](Self::Started) comes first and [`Complete`](Self::Complete)
/// last, with one other event per document in between. A broken cursor ends
/// the stream early.
#[derive(Debug)]
pub enum RewriteEvent {
    Started { apply: bool },
    /// `urls` URLs changed; `applied` tells whether the document was saved.
    Rewritten { post_id: i64, urls: usize, applied: bool },
    Unchanged { post_id: i64 },
    /// The stored value isn't JSON; left untouched.
    Invalid { post_id: i64 },
    Failed { post_id: i64, kind: ErrorKind },
    Complete(RewriteSummary),
}

/// Streams every Elementor document through [`rewrite_urls`].
///
/// Without `apply` nothing is written: events report what would change. With
/// it, each changed document is backed up before being saved.
pub fn rewrite(ctx: &Context, apply: bool) -> impl Stream<Item = Result<RewriteEvent>> + '_ {
    stream!({
        yield Ok(RewriteEvent::Started { apply });
        tracing::info!(apply, "Rewriting Elementor links");
        let backups = ctx.backups.namespaced(ELEMENTOR_BACKUP_NAMESPACE);
        let mut summary = RewriteSummary { applied: apply, ..RewriteSummary::default() };

        for await row in ctx.repo.stream_postmeta(ELEMENTOR_DATA_KEY) {
            let row = match row.or_raise(|| ErrorKind::Cursor) {
                Ok(row) => row,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let post_id = row.post_id;
            summary.documents += 1;

            let mut document: Value = match serde_json::from_str(&row.meta_value) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(post_id, error = %e, "Skipping invalid Elementor JSON");
                    summary.invalid += 1;
                    yield Ok(RewriteEvent::Invalid { post_id });
                    continue;
                },
            };
            let urls = rewrite_urls(&mut document, &ctx.remote);
            if urls == 0 {
                summary.unchanged += 1;
                yield Ok(RewriteEvent::Unchanged { post_id });
                continue;
            }
            summary.rewritten += 1;
            summary.urls += urls as u64;
            if !apply {
                tracing::info!(post_id, urls, "Would update Elementor data");
                yield Ok(RewriteEvent::Rewritten { post_id, urls, applied: false });
                continue;
            }

            match save(ctx, &backups, post_id, &row.meta_value, &document).await {
                Ok(()) => {
                    tracing::info!(post_id, urls, "Updated Elementor data");
                    yield Ok(RewriteEvent::Rewritten { post_id, urls, applied: true });
                },
                Err(e) => {
                    tracing::error!(post_id, error = ?e, "Failed to update Elementor data");
                    summary.failed += 1;
                    yield Ok(RewriteEvent::Failed { post_id, kind: *e });
                },
            }
        }

        tracing::info!(
            documents = summary.documents,
            rewritten = summary.rewritten,
            urls = summary.urls,
            invalid = summary.invalid,
            failed = summary.failed,
            apply,
            "Elementor rewrite complete"
        );
        yield Ok(RewriteEvent::Complete(summary));
    })
}

async fn save(ctx: &Context, backups: &BackupStore, post_id: i64, raw: &str, document: &Value) -> Result<()> {
    let updated = serde_json::to_string(document).or_raise(|| ErrorKind::Encode)?;
    backups.backup(post_id, raw).await?;
    ctx.repo.update_postmeta(post_id, ELEMENTOR_DATA_KEY, &updated).await.or_raise(|| ErrorKind::Database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::BackendOrigin;
    use futures::TryStreamExt;
    use offload_db::{Database, Repository};
    use offload_storage::backend::MockBackend;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    fn remote() -> RemoteStore {
        RemoteStore::new(Arc::new(MockBackend::default()), "media", "https://cdn.example.com/")
    }

    #[rstest]
    #[case("https://example.com/wp-content/uploads/2024/01/a.jpg", Some("https://cdn.example.com/2024/01/a.jpg"))]
    #[case("/wp-content/uploads/2024/01/a.jpg", Some("https://cdn.example.com/2024/01/a.jpg"))]
    #[case("https://example.com/wp-content/uploads/", None)]
    #[case("https://example.com/about/", None)]
    fn test_remote_url(#[case] url: &str, #[case] expected: Option<&str>) {
        assert_eq!(remote_url(url, &remote()).as_deref(), expected);
    }

    #[test]
    fn test_rewrite_urls_recursively() {
        let mut document = json!([{
            "id": "abc",
            "settings": {
                "image": { "url": "https://example.com/wp-content/uploads/2024/01/a.jpg", "id": 7 },
                "link": { "url": "https://example.com/contact/" },
                "gallery": [
                    { "url": "https://example.com/wp-content/uploads/2024/01/b.png" },
                    { "url": "https://cdn.example.com/2024/01/c.png" }
                ],
                "caption": "https://example.com/wp-content/uploads/2024/01/a.jpg"
            },
            "elements": []
        }]);
        let store = remote();
        assert_eq!(rewrite_urls(&mut document, &store), 2);
        let settings = &document[0]["settings"];
        assert_eq!(settings["image"]["url"], "https://cdn.example.com/2024/01/a.jpg");
        assert_eq!(settings["link"]["url"], "https://example.com/contact/");
        assert_eq!(settings["gallery"][0]["url"], "https://cdn.example.com/2024/01/b.png");
        // Only `url` fields are touched.
        assert_eq!(settings["caption"], "https://example.com/wp-content/uploads/2024/01/a.jpg");
        // A second pass has nothing left to do.
        assert_eq!(rewrite_urls(&mut document, &store), 0);
    }

    #[test]
    fn test_rewrite_keeps_key_order() {
        let raw = r#"{"z":1,"url":"https://example.com/wp-content/uploads/a.jpg","a":2}"#;
        let mut document: Value = serde_json::from_str(raw).unwrap();
        rewrite_urls(&mut document, &remote().with_prefix("media"));
        assert_eq!(serde_json::to_string(&document).unwrap(), r#"{"z":1,"url":"https://cdn.example.com/media/a.jpg","a":2}"#);
    }

    struct Harness {
        ctx: Context,
        backups: Arc<MockBackend>,
        _dir: tempfile::TempDir,
    }

    const PAGE: &str = r#"[{"settings":{"image":{"url":"https://example.com/wp-content/uploads/2024/01/a.jpg"}}}]"#;

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_scratch(dir.path()).await.unwrap();
        let repo = Repository::from(&db);
        repo.insert_postmeta(1, ELEMENTOR_DATA_KEY, PAGE).await.unwrap();
        repo.insert_postmeta(2, ELEMENTOR_DATA_KEY, r#"[{"settings":{}}]"#).await.unwrap();
        repo.insert_postmeta(3, ELEMENTOR_DATA_KEY, "{ not json").await.unwrap();
        repo.insert_postmeta(4, "_other", PAGE).await.unwrap();

        let backups = Arc::new(MockBackend::default());
        let ctx = Context {
            origin: Arc::new(BackendOrigin::new(Arc::new(MockBackend::default()), dir.path())),
            remote: remote(),
            backups: BackupStore::new(backups.clone()),
            repo,
        };
        Harness { ctx, backups, _dir: dir }
    }

    #[tokio::test]
    async fn test_report_only() {
        let h = harness().await;
        let events: Vec<RewriteEvent> = rewrite(&h.ctx, false).try_collect().await.unwrap();
        assert!(matches!(events[1], RewriteEvent::Rewritten { post_id: 1, urls: 1, applied: false }));
        assert!(matches!(events[2], RewriteEvent::Unchanged { post_id: 2 }));
        assert!(matches!(events[3], RewriteEvent::Invalid { post_id: 3 }));
        let Some(RewriteEvent::Complete(summary)) = events.last() else {
            panic!("rewrite did not complete");
        };
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.rewritten, 1);
        assert!(!summary.applied);

        assert_eq!(h.ctx.repo.get_postmeta(1, ELEMENTOR_DATA_KEY).await.unwrap().as_deref(), Some(PAGE));
        assert_eq!(h.backups.writes(), 0);
    }

    #[tokio::test]
    async fn test_apply_backs_up_then_writes() {
        let h = harness().await;
        let events: Vec<RewriteEvent> = rewrite(&h.ctx, true).try_collect().await.unwrap();
        assert!(matches!(events[1], RewriteEvent::Rewritten { post_id: 1, urls: 1, applied: true }));

        let stored = h.ctx.repo.get_postmeta(1, ELEMENTOR_DATA_KEY).await.unwrap().unwrap();
        assert_eq!(stored, r#"[{"settings":{"image":{"url":"https://cdn.example.com/2024/01/a.jpg"}}}]"#);
        assert_eq!(h.backups.writes(), 1);
        let elementor = h.ctx.backups.namespaced(ELEMENTOR_BACKUP_NAMESPACE);
        assert_eq!(elementor.restore(1).await.unwrap(), PAGE);
        // Rows under other keys are left alone.
        assert_eq!(h.ctx.repo.get_postmeta(4, "_other").await.unwrap().as_deref(), Some(PAGE));
    }

    #[tokio::test]
    async fn test_backup_failure_prevents_write() {
        let h = harness().await;
        let backups = Arc::new(MockBackend::default().failing_on("elementor_1.json"));
        let ctx = Context { backups: BackupStore::new(backups), ..h.ctx.clone() };
        let events: Vec<RewriteEvent> = rewrite(&ctx, true).try_collect().await.unwrap();
        assert!(matches!(events[1], RewriteEvent::Failed { post_id: 1, kind: ErrorKind::Backup }));
        assert_eq!(ctx.repo.get_postmeta(1, ELEMENTOR_DATA_KEY).await.unwrap().as_deref(), Some(PAGE));
    }
}
