mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::path::Path;

/// A flat namespace of files addressed by relative path.
///
/// Every path goes through [`validate_path`](crate::validate_path) inside the
/// implementation, so callers may pass paths exactly as WordPress stored them.
/// Operations on a missing file fail with
/// [`NotFound`](ErrorKind::NotFound), except [`exists()`](Self::exists).
///
/// ```
/// use offload_storage::{StorageBackend, error::Result};
/// use std::path::Path;
///
/// async fn publish(uploads: &dyn StorageBackend, bucket: &dyn StorageBackend, path: &Path) -> Result<()> {
///     let data = uploads.read(path).await?;
///     bucket.write(path, &data).await
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Label for log output.
    fn name(&self) -> &str;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or replace a file. Missing parent directories are created.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    async fn delete(&self, path: &Path) -> Result<()>;

    /// Store the local file `source` under `path`.
    ///
    /// Buffers the whole file by default.
    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let data = tokio::fs::read(source).await.map_err(|e| ErrorKind::from_io(e, source))?;
        self.write(path, &data).await
    }

    /// Copy the file at `path` to `target` on local disk. Returns the number
    /// of bytes written.
    async fn download(&self, path: &Path, target: &Path) -> Result<u64> {
        let data = self.read(path).await?;
        tokio::fs::write(target, &data).await.map_err(|e| ErrorKind::from_io(e, target))?;
        Ok(data.len() as u64)
    }
}
