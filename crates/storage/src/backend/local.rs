//! Files on local disk: the WordPress uploads directory, and the directory
//! metadata backups are written to.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A directory on local disk.
///
/// ```no_run
/// use offload_storage::backend::LocalBackend;
///
/// let uploads = LocalBackend::new("uploads", "/var/www/html/wp-content/uploads").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    /// `root` must be absolute. It is created when missing, so that a fresh
    /// backup directory needs no setup.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        // Runs once while wiring up services, before any I/O is in flight.
        std::fs::create_dir_all(root).map_err(|e| ErrorKind::from_io(e, root))?;
        Ok(Self { name: name.into(), root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    /// Resolve `path`, creating the directories it lives in.
    async fn prepare(&self, path: &Path) -> Result<PathBuf> {
        let target = self.resolve(path)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await.map_err(|e| ErrorKind::from_io(e, path))?;
        }
        Ok(target)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let target = self.resolve(path)?;
        match fs::metadata(&target).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => exn::bail!(ErrorKind::from_io(e, path)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        Ok(fs::read(&target).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let target = self.prepare(path).await?;
        Ok(fs::write(&target, data).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        fs::remove_file(&target).await.map_err(|e| ErrorKind::from_io(e, path))?;
        tracing::debug!(backend = %self.name, path = %path.display(), "Deleted file");
        Ok(())
    }

    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let target = self.prepare(path).await?;
        fs::copy(source, &target).await.map_err(|e| ErrorKind::from_io(e, source))?;
        Ok(())
    }

    async fn download(&self, path: &Path, target: &Path) -> Result<u64> {
        let source = self.resolve(path)?;
        Ok(fs::copy(&source, target).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploads() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("uploads", dir.path().join("uploads")).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_root_must_be_an_absolute_directory() {
        let (dir, backend) = uploads();
        assert!(backend.root().is_dir());
        assert!(LocalBackend::new("uploads", "wp-content/uploads").is_err());

        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        assert!(LocalBackend::new("uploads", &file).is_err());
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let (dir, backend) = uploads();
        let path = Path::new("2024/01/photo.jpg");
        assert!(!backend.exists(path).await.unwrap());

        backend.write(path, b"jpeg").await.unwrap();
        assert!(dir.path().join("uploads/2024/01/photo.jpg").is_file());
        assert!(backend.exists(path).await.unwrap());
        assert_eq!(backend.read(path).await.unwrap(), b"jpeg");

        backend.delete(path).await.unwrap();
        assert!(!backend.exists(path).await.unwrap());
        assert!(backend.delete(path).await.unwrap_err().is_not_found());
        assert!(backend.read(path).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_directories_are_not_files() {
        let (_dir, backend) = uploads();
        backend.write(Path::new("2024/01/photo.jpg"), b"jpeg").await.unwrap();
        assert!(!backend.exists(Path::new("2024/01")).await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (dir, backend) = uploads();
        let source = dir.path().join("scratch.pdf");
        std::fs::write(&source, b"%PDF-1.7").unwrap();

        backend.upload(Path::new("2024/02/menu.pdf"), &source).await.unwrap();
        let target = dir.path().join("copy.pdf");
        assert_eq!(backend.download(Path::new("2024/02/menu.pdf"), &target).await.unwrap(), 8);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.7");

        let err = backend.download(Path::new("2024/02/missing.pdf"), &target).await.unwrap_err();
        assert!(err.is_not_found());
        let err = backend.upload(Path::new("2024/02/b.pdf"), &dir.path().join("missing.pdf")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_paths_stay_below_root() {
        let (dir, backend) = uploads();
        std::fs::write(dir.path().join("wp-config.php"), b"<?php").unwrap();
        assert!(backend.read(Path::new("../wp-config.php")).await.is_err());
        assert!(backend.exists(Path::new("2024/../../wp-config.php")).await.is_err());
        assert!(backend.write(Path::new("../shell.php"), b"<?php").await.is_err());
        assert!(backend.delete(Path::new("../wp-config.php")).await.is_err());
        assert!(dir.path().join("wp-config.php").is_file());
    }
}
