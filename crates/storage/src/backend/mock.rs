use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// In-memory bucket for tests.
///
/// Counts successful writes and deletes, and can be told to fail every
/// operation on given paths, so tests can assert on exactly which side effects
/// a run had.
///
/// ```
/// use offload_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bucket = MockBackend::with_files([("2024/01/a.jpg", b"jpeg")]).failing_on("2024/01/b.jpg");
/// assert!(bucket.exists(Path::new("2024/01/a.jpg")).await.unwrap());
/// assert!(bucket.write(Path::new("2024/01/b.jpg"), b"jpeg").await.is_err());
/// assert_eq!(bucket.writes(), 0);
/// # }
/// ```
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    failing: BTreeSet<PathBuf>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl MockBackend {
    /// Panics on a path that doesn't validate: the fixture is wrong.
    pub fn with_files<P, D>(files: impl IntoIterator<Item = (P, D)>) -> Self
    where
        P: AsRef<Path>,
        D: Into<Vec<u8>>,
    {
        let files = files.into_iter().map(|(path, data)| (fixture_path(path.as_ref()), data.into())).collect();
        Self {
            name: "mock".to_string(),
            files: Mutex::new(files),
            failing: BTreeSet::new(),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Every operation on `path` fails with a network error.
    pub fn failing_on(mut self, path: impl AsRef<Path>) -> Self {
        self.failing.insert(fixture_path(path.as_ref()));
        self
    }

    /// Successful writes so far, uploads included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub async fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = validate_path(path).ok()?;
        self.files.lock().await.get(&path).cloned()
    }

    fn reachable(&self, path: &Path) -> Result<PathBuf> {
        let path = validate_path(path)?;
        if self.failing.contains(&path) {
            exn::bail!(ErrorKind::Network(format!("{}: connection reset", path.display())));
        }
        Ok(path)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(std::iter::empty::<(&str, Vec<u8>)>())
    }
}

fn fixture_path(path: &Path) -> PathBuf {
    match validate_path(path) {
        Ok(path) => path,
        Err(_) => panic!("MockBackend: invalid path {}", path.display()),
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = self.reachable(path)?;
        Ok(self.files.lock().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.reachable(path)?;
        let data = self.files.lock().await.get(&path).cloned();
        Ok(data.ok_or(ErrorKind::NotFound(path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = self.reachable(path)?;
        self.files.lock().await.insert(path, data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = self.reachable(path)?;
        if self.files.lock().await.remove(&path).is_none() {
            exn::bail!(ErrorKind::NotFound(path));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
