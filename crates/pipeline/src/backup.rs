//! Snapshots of metadata taken right before it is overwritten.
//!
//! One JSON document per record (`42.json`, or `elementor_42.json` for a
//! namespaced store), the latest backup of an id replacing any earlier one.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use offload_storage::BackendHandle;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub attachment_id: i64,
    /// The stored value exactly as it was read from the database.
    pub raw_metadata: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    /// BLAKE3 hash of `raw_metadata`.
    pub checksum: String,
}
impl BackupRecord {
    pub fn new(attachment_id: i64, raw_metadata: impl Into<String>) -> Self {
        let raw_metadata = raw_metadata.into();
        let checksum = blake3::hash(raw_metadata.as_bytes()).to_string();
        Self { attachment_id, raw_metadata, stored_at: OffsetDateTime::now_utc(), checksum }
    }

    /// Returns `true` if the snapshot still matches its checksum.
    pub fn verify(&self) -> bool {
        blake3::hash(self.raw_metadata.as_bytes()).to_string() == self.checksum
    }
}

#[derive(Clone)]
pub struct BackupStore {
    backend: BackendHandle,
    namespace: Option<String>,
}

impl BackupStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, namespace: None }
    }

    /// A store sharing the same backend whose records can't collide with
    /// this one's.
    pub fn namespaced(&self, namespace: impl Into<String>) -> Self {
        Self { backend: self.backend.clone(), namespace: Some(namespace.into()) }
    }

    fn path_for(&self, id: i64) -> PathBuf {
        match &self.namespace {
            Some(namespace) => PathBuf::from(format!("{namespace}_{id}.json")),
            None => PathBuf::from(format!("{id}.json")),
        }
    }

    /// Persist a snapshot of `raw`, replacing any earlier one for `id`.
    #[instrument(skip(self, raw), fields(namespace = self.namespace.as_deref()))]
    pub async fn backup(&self, id: i64, raw: &str) -> Result<BackupRecord> {
        let record = BackupRecord::new(id, raw);
        let json = serde_json::to_vec_pretty(&record).or_raise(|| ErrorKind::Backup)?;
        self.backend.write(&self.path_for(id), &json).await.or_raise(|| ErrorKind::Backup)?;
        tracing::debug!(id, checksum = %record.checksum, "Stored backup");
        Ok(record)
    }

    /// Read a snapshot back, checking it is intact.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) if there is no snapshot
    /// for `id`, and [`Backup`](ErrorKind::Backup) if it is unreadable or
    /// corrupted.
    pub async fn load(&self, id: i64) -> Result<BackupRecord> {
        let json = match self.backend.read(&self.path_for(id)).await {
            Ok(json) => json,
            Err(e) => {
                let kind = if e.is_not_found() { ErrorKind::NotFound } else { ErrorKind::Backup };
                return Err(e).or_raise(|| kind);
            },
        };
        let record: BackupRecord = serde_json::from_slice(&json).or_raise(|| ErrorKind::Backup)?;
        if record.attachment_id != id {
            tracing::warn!(id, found = record.attachment_id, "Backup belongs to another attachment");
            exn::bail!(ErrorKind::Backup);
        }
        if !record.verify() {
            tracing::warn!(id, "Backup does not match its checksum");
            exn::bail!(ErrorKind::Backup);
        }
        Ok(record)
    }

    /// The original raw value for `id`.
    pub async fn restore(&self, id: i64) -> Result<String> {
        Ok(self.load(id).await?.raw_metadata)
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        self.backend.exists(&self.path_for(id)).await.or_raise(|| ErrorKind::Backup)
    }

    /// Remove the snapshot for `id`.
    pub async fn discard(&self, id: i64) -> Result<()> {
        match self.backend.delete(&self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let kind = if e.is_not_found() { ErrorKind::NotFound } else { ErrorKind::Backup };
                Err(e).or_raise(|| kind)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_storage::backend::{LocalBackend, MockBackend, StorageBackend};
    use std::path::Path;
    use std::sync::Arc;

    const RAW: &str = r#"a:1:{s:4:"file";s:13:"2024/01/a.jpg";}"#;

    #[tokio::test]
    async fn test_backup_and_restore() {
        let backend = Arc::new(MockBackend::default());
        let store = BackupStore::new(backend.clone());
        let record = store.backup(42, RAW).await.unwrap();
        assert!(record.verify());
        assert!(store.exists(42).await.unwrap());
        assert!(backend.exists(Path::new("42.json")).await.unwrap());

        assert_eq!(store.restore(42).await.unwrap(), RAW);
        assert_eq!(store.load(42).await.unwrap(), record);

        store.discard(42).await.unwrap();
        assert!(!store.exists(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = BackupStore::new(Arc::new(MockBackend::default()));
        store.backup(42, "first").await.unwrap();
        store.backup(42, "second").await.unwrap();
        assert_eq!(store.restore(42).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_missing_backup() {
        let store = BackupStore::new(Arc::new(MockBackend::default()));
        assert_eq!(*store.restore(7).await.unwrap_err(), ErrorKind::NotFound);
        assert_eq!(*store.discard(7).await.unwrap_err(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_corrupted_backup() {
        let backend = Arc::new(MockBackend::default());
        let store = BackupStore::new(backend.clone());
        let mut record = BackupRecord::new(42, RAW);
        record.raw_metadata.push('x');
        backend.write(Path::new("42.json"), &serde_json::to_vec(&record).unwrap()).await.unwrap();
        assert_eq!(*store.restore(42).await.unwrap_err(), ErrorKind::Backup);

        backend.write(Path::new("43.json"), b"{ not json").await.unwrap();
        assert_eq!(*store.restore(43).await.unwrap_err(), ErrorKind::Backup);

        backend.write(Path::new("44.json"), &serde_json::to_vec(&BackupRecord::new(45, RAW)).unwrap()).await.unwrap();
        assert_eq!(*store.restore(44).await.unwrap_err(), ErrorKind::Backup);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let backend = Arc::new(MockBackend::default());
        let store = BackupStore::new(backend.clone());
        let elementor = store.namespaced("elementor");
        store.backup(42, RAW).await.unwrap();
        elementor.backup(42, "[]").await.unwrap();
        assert!(backend.exists(Path::new("elementor_42.json")).await.unwrap());
        assert_eq!(store.restore(42).await.unwrap(), RAW);
        assert_eq!(elementor.restore(42).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_on_disk_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(Arc::new(LocalBackend::new("backups", dir.path()).unwrap()));
        store.backup(42, RAW).await.unwrap();

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(dir.path().join("42.json")).unwrap()).unwrap();
        assert_eq!(json["attachment_id"], 42);
        assert_eq!(json["raw_metadata"], RAW);
        assert_eq!(json["checksum"], blake3::hash(RAW.as_bytes()).to_string());
        assert!(json["stored_at"].is_string());
    }
}
