//! Artifact download over HTTP.

use crate::error::FetchError;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Fetches artifacts and checksum files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `url` into `dest`, replacing its contents; returns the byte count.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;

    /// Fetches `url` as text.
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// [`Fetcher`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("s3-mirror/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self.get(url).await?;
        let content_length = response.content_length();

        let mut file = BufWriter::new(tokio::fs::File::create(dest).await?);
        let mut byte_stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(piece) = byte_stream.next().await {
            let chunk = piece?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        match content_length {
            Some(expected) if expected != written => {
                return Err(FetchError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    actual: written,
                });
            }
            Some(_) => {}
            None => warn!(
                "Content-Length header was not present for {}. Cannot verify file size.",
                url
            ),
        }

        debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get(url).await?.text().await?)
    }
}
