//! Object storage as seen by the pipelines: keys, public URLs and descriptors
//! on top of a plain [`StorageBackend`](offload_storage::StorageBackend).

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use offload_codec::RemoteDescriptor;
use offload_storage::BackendHandle;
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

/// URL written into descriptors during a dry run, in place of the public URL.
pub const DRY_RUN_URL: &str = "DRY_RUN_S3_URL";

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of checking whether an object exists.
///
/// A failed or timed-out check is [`Unknown`](Self::Unknown), never
/// [`Absent`](Self::Absent): callers must not treat "couldn't tell" as "isn't
/// there".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Present,
    Absent,
    Unknown,
}
impl Probe {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }
}

#[derive(Clone)]
pub struct RemoteStore {
    backend: BackendHandle,
    bucket: String,
    public_url: String,
    prefix: String,
    access_policy: String,
    probe_timeout: Duration,
}

impl RemoteStore {
    /// `public_url` is the base objects are reachable under, with or without a
    /// trailing slash.
    pub fn new(backend: BackendHandle, bucket: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            prefix: String::new(),
            access_policy: offload_codec::models::PUBLIC_READ.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Store every object under `prefix/`.
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = prefix.as_ref().trim_matches('/').to_string();
        self
    }

    /// Access policy recorded in descriptors. Empty values are ignored.
    pub fn with_access_policy(mut self, policy: impl Into<String>) -> Self {
        let policy = policy.into();
        if !policy.is_empty() {
            self.access_policy = policy;
        }
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Object key for a path relative to the uploads directory.
    pub fn key_for(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if self.prefix.is_empty() { relative.to_string() } else { format!("{}/{relative}", self.prefix) }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_url)
    }

    /// Upload a local file under `key` and describe the resulting object.
    #[instrument(skip(self, local_path), fields(bucket = %self.bucket))]
    pub async fn put(&self, local_path: &Path, key: &str, mime_type: Option<&str>) -> Result<RemoteDescriptor> {
        self.backend.upload(Path::new(key), local_path).await.or_raise(|| ErrorKind::Transfer)?;
        tracing::debug!(key, "Uploaded object");
        Ok(self.descriptor(self.url_for(key), key, mime_type))
    }

    /// Descriptor for an upload that a dry run pretends to have made.
    pub fn placeholder(&self, key: &str, mime_type: Option<&str>) -> RemoteDescriptor {
        self.descriptor(format!("{DRY_RUN_URL}/{key}"), key, mime_type)
    }

    fn descriptor(&self, url: String, key: &str, mime_type: Option<&str>) -> RemoteDescriptor {
        let mime_type = match mime_type {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => guess_mime_type(key),
        };
        let mut descriptor = RemoteDescriptor::new(url, &self.bucket, key, mime_type);
        descriptor.access_policy.clone_from(&self.access_policy);
        descriptor
    }

    /// Check for an object, bounded by the probe timeout.
    pub async fn probe(&self, key: &str) -> Probe {
        match tokio::time::timeout(self.probe_timeout, self.backend.exists(Path::new(key))).await {
            Ok(Ok(true)) => Probe::Present,
            Ok(Ok(false)) => Probe::Absent,
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "Existence check failed");
                Probe::Unknown
            },
            Err(_) => {
                tracing::warn!(key, timeout = ?self.probe_timeout, "Existence check timed out");
                Probe::Unknown
            },
        }
    }

    /// Coarse form of [`probe()`](Self::probe): only a confirmed object counts.
    pub async fn exists(&self, key: &str) -> bool {
        self.probe(key).await.is_present()
    }
}

pub(crate) fn guess_mime_type(path: &str) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}
