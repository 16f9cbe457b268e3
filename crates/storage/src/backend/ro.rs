use crate::error::Result;
use crate::{BackendHandle, StorageBackend};
use async_trait::async_trait;
use std::path::Path;

/// Passes reads through to another backend and turns every change into a
/// logged no-op that reports success. Dry runs wrap each writable backend in
/// one.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}

impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn download(&self, path: &Path, target: &Path) -> Result<u64> {
        self.inner.download(path, target).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), bytes = data.len(), "Dry run: would write");
        Ok(())
    }

    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), source = %source.display(), "Dry run: would upload");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), "Dry run: would delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_changes_are_dropped() {
        let bucket = Arc::new(MockBackend::with_files([("2024/01/a.jpg", b"jpeg")]).with_name("bucket"));
        let guarded = ReadOnlyBackend::new(bucket.clone());
        assert_eq!(guarded.name(), "bucket");

        guarded.write(Path::new("2024/01/b.jpg"), b"jpeg").await.unwrap();
        guarded.upload(Path::new("2024/01/c.jpg"), Path::new("/nonexistent/c.jpg")).await.unwrap();
        guarded.delete(Path::new("2024/01/a.jpg")).await.unwrap();
        assert_eq!((bucket.writes(), bucket.deletes()), (0, 0));

        assert!(guarded.exists(Path::new("2024/01/a.jpg")).await.unwrap());
        assert!(!guarded.exists(Path::new("2024/01/b.jpg")).await.unwrap());
        assert_eq!(guarded.read(Path::new("2024/01/a.jpg")).await.unwrap(), b"jpeg");
    }
}
