//! The bucket media is offloaded to: AWS S3 or anything speaking its API
//! (MinIO, DigitalOcean Spaces, Backblaze B2). Credentials come from the
//! configuration file, never from the environment.

use crate::{
    StorageBackend,
    error::{ErrorKind, Result},
    to_key,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, SharedCredentialsProvider, http::HttpResponse, retry::RetryConfig, timeout::TimeoutConfig},
    error::{DisplayErrorContext, SdkError},
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    primitives::ByteStream,
    types::ObjectCannedAcl,
};
use exn::ResultExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible storage backend.
///
/// Paths map one-to-one onto object keys in the configured bucket. Objects are
/// written with a content type guessed from the key's extension and, when
/// configured, a canned ACL (`public-read` for media offloading).
///
/// # Examples
///
/// ```no_run
/// use offload_storage::backend::S3Backend;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "remote",
///     "my-media-bucket",
///     "eu-west-1",
///     None::<String>,
///     "access_key_id",
///     "secret_access_key",
/// )
/// .await?
/// .with_acl("public-read")
/// .with_timeout(Duration::from_secs(30));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    acl: Option<ObjectCannedAcl>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Credentials::new(key_id, key_secret, None, None, "offload-config");
        Self::build(name.into(), bucket.into(), region.into(), endpoint.map(Into::into), Some(credentials))
    }

    /// A backend that signs nothing. Only requests the bucket allows
    /// anonymously succeed; everything else fails as a permission or network
    /// error.
    pub fn without_credentials(
        name: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
    ) -> Result<Self> {
        Self::build(name.into(), bucket.into(), region.into(), endpoint.map(Into::into), None)
    }

    fn build(
        name: String,
        bucket: String,
        region: String,
        endpoint: Option<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        if bucket.is_empty() {
            exn::bail!(ErrorKind::BackendError("bucket name must not be empty".to_string()));
        }
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            // 1 initial attempt + 3 retries with exponential backoff.
            .retry_config(RetryConfig::standard().with_max_attempts(4));
        config_builder.set_credentials_provider(credentials.map(SharedCredentialsProvider::new));
        if let Some(endpoint_url) = endpoint {
            // Path-style addressing for S3-compatible services (MinIO, etc.)
            config_builder = config_builder.endpoint_url(endpoint_url).force_path_style(true);
        }
        Ok(Self::from_client(name, Client::from_conf(config_builder.build()), bucket))
    }

    /// Wrap an already configured client.
    pub fn from_client(name: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            acl: None,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        }
    }

    /// Canned ACL applied to every object written (e.g. `public-read`).
    pub fn with_acl(mut self, acl: impl AsRef<str>) -> Self {
        self.acl = Some(ObjectCannedAcl::from(acl.as_ref()));
        self
    }

    /// Upper bound for a single operation, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let timeouts = TimeoutConfig::builder().operation_timeout(timeout).build();
        self.client = Client::from_conf(self.client.config().to_builder().timeout_config(timeouts).build());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter.clone().acquire_owned().await.or_raise(|| ErrorKind::BackendError("rate limiter closed".to_string()))
    }

    fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, path: &Path) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match err.raw_response().map(|response| response.status().as_u16()) {
            Some(404) => ErrorKind::NotFound(path.to_path_buf()),
            Some(401 | 403) => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Network(DisplayErrorContext(&err).to_string()),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = to_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(HeadObjectError::is_not_found) => Ok(false),
            Err(err) => match Self::map_sdk_error(err, path) {
                ErrorKind::NotFound(_) => Ok(false),
                kind => exn::bail!(kind),
            },
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = to_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|err| {
            if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) {
                ErrorKind::NotFound(path.to_path_buf())
            } else {
                Self::map_sdk_error(err, path)
            }
        })?;
        let data = output.body.collect().await.or_raise(|| ErrorKind::Network(format!("truncated body for {}", path.display())))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = to_key(path)?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type.essence_str())
            .set_acl(self.acl.clone())
            .send()
            .await
            .map_err(|err| Self::map_sdk_error(err, path))?;
        tracing::debug!(bucket = %self.bucket, path = %path.display(), bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let key = to_key(path)?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        if let Err(e) = tokio::fs::metadata(source).await {
            exn::bail!(ErrorKind::from_io(e, source));
        }
        let body = ByteStream::from_path(source)
            .await
            .or_raise(|| ErrorKind::BackendError(format!("cannot stream {}", source.display())))?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type.essence_str())
            .set_acl(self.acl.clone())
            .send()
            .await
            .map_err(|err| Self::map_sdk_error(err, path))?;
        tracing::debug!(bucket = %self.bucket, path = %path.display(), "Uploaded object");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // DeleteObject succeeds for missing keys; keep the trait's NotFound contract.
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let key = to_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| Self::map_sdk_error(err, path))?;
        Ok(())
    }
}
