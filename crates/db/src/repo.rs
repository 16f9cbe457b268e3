//! Repository over the `posts` and `postmeta` tables.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{AttachmentRow, PostmetaRow};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use tracing::instrument;

/// Meta key WordPress stores serialized attachment metadata under.
pub const ATTACHMENT_METADATA_KEY: &str = "_wp_attachment_metadata";

/// Repository for reading and rewriting attachment metadata.
///
/// In dry-run mode every write is skipped (and logged) while reads behave
/// normally.
#[derive(Debug, Clone)]
pub struct Repository {
    db: Database,
    dry_run: bool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { db: db.clone(), dry_run: false }
    }
}
impl Repository {
    pub fn new(db: Database, dry_run: bool) -> Self {
        Self { db, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    /// Stream every attachment with its metadata blob, ordered by id, skipping
    /// the first `offset` rows.
    ///
    /// The query runs on a single forward-only cursor; dropping the stream
    /// closes it.
    pub fn stream_attachments(&self, offset: u64) -> impl Stream<Item = Result<AttachmentRow>> + Send + '_ {
        stream! {
            let offset = match i64::try_from(offset) {
                Ok(offset) => offset,
                Err(_) => {
                    yield Err(exn::Exn::from(ErrorKind::InvalidData("offset")));
                    return;
                },
            };
            let sql = self.db.render(include_str!("../queries/select_attachments.sql"));
            let mut rows = sqlx::query_as::<_, AttachmentRow>(&sql).bind(i64::MAX).bind(offset).fetch(self.db.pool());
            while let Some(row) = rows.next().await {
                yield row.or_raise(|| ErrorKind::Database);
            }
        }
    }

    /// Number of attachments carrying a metadata row.
    pub async fn count_attachments(&self) -> Result<u64> {
        let (total,): (i64,) = sqlx::query_as(&self.db.render(include_str!("../queries/count_attachments.sql")))
            .fetch_one(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(total).or_raise(|| ErrorKind::InvalidData("total"))
    }

    /// Current metadata blob of an attachment.
    pub async fn get_attachment_metadata(&self, id: i64) -> Result<Option<String>> {
        self.get_postmeta(id, ATTACHMENT_METADATA_KEY).await
    }

    /// Overwrite the metadata blob of an attachment.
    pub async fn update_attachment_metadata(&self, id: i64, blob: &str) -> Result<u64> {
        self.update_postmeta(id, ATTACHMENT_METADATA_KEY, blob).await
    }

    // =========================================================================
    // Generic postmeta
    // =========================================================================

    /// Stream every value stored under `meta_key`, ordered by post id.
    pub fn stream_postmeta<'a>(&'a self, meta_key: &'a str) -> impl Stream<Item = Result<PostmetaRow>> + Send + 'a {
        stream! {
            let sql = self.db.render(include_str!("../queries/select_postmeta.sql"));
            let mut rows = sqlx::query_as::<_, PostmetaRow>(&sql).bind(meta_key).fetch(self.db.pool());
            while let Some(row) = rows.next().await {
                yield row.or_raise(|| ErrorKind::Database);
            }
        }
    }

    pub async fn get_postmeta(&self, post_id: i64, meta_key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&self.db.render(include_str!("../queries/get_postmeta.sql")))
            .bind(post_id)
            .bind(meta_key)
            .fetch_optional(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(value,)| value))
    }

    /// Overwrite an existing postmeta value, returning the number of rows
    /// changed (always 0 in dry-run mode).
    #[instrument(skip(self, value), fields(bytes = value.len()))]
    pub async fn update_postmeta(&self, post_id: i64, meta_key: &str, value: &str) -> Result<u64> {
        if self.dry_run {
            tracing::info!(post_id, meta_key, "Skipping database update during dry run");
            return Ok(0);
        }
        let result = sqlx::query(&self.db.render(include_str!("../queries/update_postmeta.sql")))
            .bind(value)
            .bind(post_id)
            .bind(meta_key)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Insert (seeding throwaway databases)
    // =========================================================================

    /// Insert an attachment post together with its metadata row.
    pub async fn insert_attachment(&self, id: i64, title: &str, meta_value: &str) -> Result<()> {
        sqlx::query(&self.db.render(include_str!("../queries/insert_post.sql")))
            .bind(id)
            .bind("attachment")
            .bind(title)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.insert_postmeta(id, ATTACHMENT_METADATA_KEY, meta_value).await
    }

    pub async fn insert_postmeta(&self, post_id: i64, meta_key: &str, meta_value: &str) -> Result<()> {
        sqlx::query(&self.db.render(include_str!("../queries/insert_postmeta.sql")))
            .bind(post_id)
            .bind(meta_key)
            .bind(meta_value)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use rstest::rstest;

    async fn seeded() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        for id in [12_i64, 3, 7] {
            repo.insert_attachment(id, &format!("image {id}"), &format!("blob-{id}")).await.unwrap();
        }
        // A non-attachment post with the same meta key must be ignored.
        sqlx::query("INSERT INTO wp_posts (ID, post_type) VALUES (5, 'post')").execute(db.pool()).await.unwrap();
        repo.insert_postmeta(5, ATTACHMENT_METADATA_KEY, "not an attachment").await.unwrap();
        repo.insert_postmeta(7, "_elementor_data", "[]").await.unwrap();
        repo
    }

    #[rstest]
    #[case(0, vec![3, 7, 12])]
    #[case(1, vec![7, 12])]
    #[case(3, vec![])]
    #[tokio::test]
    async fn test_stream_attachments(#[case] offset: u64, #[case] expected: Vec<i64>) {
        let repo = seeded().await;
        let rows: Vec<AttachmentRow> = repo.stream_attachments(offset).try_collect().await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), expected);
        assert!(rows.iter().all(|r| r.meta_value == format!("blob-{}", r.id)));
    }

    #[tokio::test]
    async fn test_offsets_partition_rows() {
        let repo = seeded().await;
        let first: Vec<AttachmentRow> = repo.stream_attachments(0).take(2).try_collect().await.unwrap();
        let rest: Vec<AttachmentRow> = repo.stream_attachments(2).try_collect().await.unwrap();
        let ids: Vec<i64> = first.iter().chain(&rest).map(|r| r.id).collect();
        assert_eq!(ids, [3, 7, 12]);
        assert_eq!(repo.count_attachments().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_attachment_metadata() {
        let repo = seeded().await;
        assert_eq!(repo.update_attachment_metadata(7, "new-blob").await.unwrap(), 1);
        assert_eq!(repo.get_attachment_metadata(7).await.unwrap().as_deref(), Some("new-blob"));
        // Other meta keys of the same post are untouched.
        assert_eq!(repo.get_postmeta(7, "_elementor_data").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(repo.get_attachment_metadata(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dry_run_skips_writes() {
        let repo = seeded().await;
        let dry = Repository::new(repo.db.clone(), true);
        assert!(dry.is_dry_run());
        assert_eq!(dry.update_attachment_metadata(7, "new-blob").await.unwrap(), 0);
        assert_eq!(repo.get_attachment_metadata(7).await.unwrap().as_deref(), Some("blob-7"));
    }

    #[tokio::test]
    async fn test_stream_postmeta() {
        let repo = seeded().await;
        let rows: Vec<PostmetaRow> = repo.stream_postmeta("_elementor_data").try_collect().await.unwrap();
        assert_eq!(rows, [PostmetaRow { post_id: 7, meta_value: "[]".to_string() }]);
    }
}
