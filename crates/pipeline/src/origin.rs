//! Where original media files are fetched from before being uploaded.
//!
//! Either another storage backend (normally the WordPress uploads directory on
//! local disk) or the live site over HTTP. Every fetch lands in a scratch file
//! that is removed again when dropped.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use offload_storage::BackendHandle;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// A downloaded file on local disk, deleted on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}
impl ScratchFile {
    fn create(dir: &Path, relative: &str) -> Result<Self> {
        // Keep the extension around so anything sniffing the path still can.
        let suffix = Path::new(relative).extension().map(|ext| format!(".{}", ext.to_string_lossy())).unwrap_or_default();
        let file = tempfile::Builder::new()
            .prefix("offload-")
            .suffix(&suffix)
            .tempfile_in(dir)
            .or_raise(|| ErrorKind::Transfer)?;
        Ok(Self { path: file.into_temp_path() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        self.path.close().or_raise(|| ErrorKind::Transfer)
    }
}

#[async_trait]
pub trait OriginSource: Send + Sync {
    /// Name of the origin, used for logging only.
    fn name(&self) -> &str;

    /// Copy the file at `relative` (relative to the uploads directory) into
    /// a fresh scratch file.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) when the origin doesn't
    /// have the file, and [`Transfer`](ErrorKind::Transfer) otherwise.
    async fn fetch(&self, relative: &str) -> Result<ScratchFile>;
}

/// Fetches files from a storage backend.
pub struct BackendOrigin {
    backend: BackendHandle,
    scratch_dir: PathBuf,
}
impl BackendOrigin {
    pub fn new(backend: BackendHandle, scratch_dir: impl Into<PathBuf>) -> Self {
        Self { backend, scratch_dir: scratch_dir.into() }
    }
}

#[async_trait]
impl OriginSource for BackendOrigin {
    fn name(&self) -> &str {
        self.backend.name()
    }

    #[instrument(skip(self), fields(origin = self.backend.name()))]
    async fn fetch(&self, relative: &str) -> Result<ScratchFile> {
        let scratch = ScratchFile::create(&self.scratch_dir, relative)?;
        match self.backend.download(Path::new(relative), scratch.path()).await {
            Ok(bytes) => {
                tracing::debug!(bytes, "Fetched from origin");
                Ok(scratch)
            },
            Err(e) => {
                let kind = if e.is_not_found() { ErrorKind::NotFound } else { ErrorKind::Transfer };
                Err(e).or_raise(|| kind)
            },
        }
    }
}

/// Downloads files from the live site, e.g. `https://example.com/wp-content/uploads/`.
pub struct HttpOrigin {
    client: reqwest::Client,
    base_url: String,
    scratch_dir: PathBuf,
}
impl HttpOrigin {
    pub fn new(base_url: impl Into<String>, timeout: Duration, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("offload/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Config)?;
        Ok(Self::with_client(client, base_url, scratch_dir))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url, scratch_dir: scratch_dir.into() }
    }

    pub fn url_for(&self, relative: &str) -> String {
        format!("{}{}", self.base_url, relative.trim_start_matches('/'))
    }
}

#[async_trait]
impl OriginSource for HttpOrigin {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn fetch(&self, relative: &str) -> Result<ScratchFile> {
        let url = self.url_for(relative);
        let response = self.client.get(&url).send().await.or_raise(|| ErrorKind::Transfer)?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::warn!(url, "Origin responded 404; file is probably in the database but not on disk");
                exn::bail!(ErrorKind::NotFound);
            },
            status if !status.is_success() => {
                tracing::warn!(url, %status, "Origin responded with an error");
                exn::bail!(ErrorKind::Transfer);
            },
            _ => {},
        }

        let scratch = ScratchFile::create(&self.scratch_dir, relative)?;
        let mut file = tokio::fs::File::create(scratch.path()).await.or_raise(|| ErrorKind::Transfer)?;
        let mut body = response.bytes_stream();
        let mut bytes = 0_u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.or_raise(|| ErrorKind::Transfer)?;
            file.write_all(&chunk).await.or_raise(|| ErrorKind::Transfer)?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.or_raise(|| ErrorKind::Transfer)?;
        tracing::debug!(bytes, "Downloaded from origin");
        Ok(scratch)
    }
}
