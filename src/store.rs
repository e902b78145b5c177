//! Object storage destinations.

use crate::error::StoreError;
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as _, PutPayload, WriteMultipart};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Files larger than this are uploaded in parts.
const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Size of each multipart chunk.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts in flight at once during a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 4;

/// A bucket that artifacts are mirrored into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `key` exists. A missing key is `Ok(false)`, not an error.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Uploads the local file at `path` to `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError>;

    /// Human-readable location of `key`, for diagnostics.
    fn location(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Host (and port) of the endpoint, or a full URL.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Use HTTPS when `endpoint` has no scheme.
    pub tls: bool,
}

impl S3Settings {
    /// The endpoint as a URL.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.tls { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }
}

/// [`ObjectStore`] backed by an S3-compatible service.
#[derive(Debug)]
pub struct S3Store {
    bucket: String,
    inner: AmazonS3,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Result<Self, StoreError> {
        let endpoint = settings.endpoint_url();
        let inner = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_endpoint(&endpoint)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .build()?;
        Ok(Self {
            bucket: settings.bucket.clone(),
            inner,
        })
    }

    async fn upload_in_parts(&self, location: &ObjectPath, path: &Path) -> Result<(), StoreError> {
        let upload = self.inner.put_multipart(location).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);
        let mut file = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; PART_SIZE];

        loop {
            let n = match file.read(&mut buffer).await {
                Ok(n) => n,
                Err(e) => {
                    writer.abort().await?;
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
            writer.write(&buffer[..n]);
        }
        writer.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.inner.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let location = ObjectPath::from(key);
        let size = tokio::fs::metadata(path).await?.len();
        if size > MULTIPART_THRESHOLD {
            debug!("Uploading {} bytes to {} in parts", size, self.location(key));
            return self.upload_in_parts(&location, path).await;
        }
        let data = tokio::fs::read(path).await?;
        self.inner.put(&location, PutPayload::from(data)).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
