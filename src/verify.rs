//! SHA-256 checksum verification of downloaded artifacts.

use crate::download::Fetcher;
use crate::error::FetchError;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Computes the SHA-256 hash of a local file as lower-case hex.
///
/// The file is read in chunks on a blocking thread so large artifacts
/// neither sit in memory nor stall the async runtime.
///
/// # Arguments
///
/// * `path` - File to hash
///
/// # Returns
///
/// The 64-character hex digest, or an I/O error if the file cannot be read.
pub async fn compute_file_sha256(path: &Path) -> Result<String, FetchError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<String, FetchError> {
        use sha2::{Digest, Sha256};
        use std::io::Read;

        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| FetchError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Checks `path` against the digest published at `checksum_url`.
///
/// The published text is trimmed and must equal the lower-case hex digest.
///
/// # Arguments
///
/// * `fetcher` - Fetcher used to read the checksum file
/// * `checksum_url` - URL of the published digest
/// * `path` - Downloaded artifact to verify
/// * `deadline` - Limit on fetching the checksum file; `None` waits indefinitely
///
/// # Returns
///
/// `Ok(())` if the digests match. A checksum file that cannot be fetched
/// in time is reported as [`FetchError::ChecksumFetch`], differing digests
/// as [`FetchError::ChecksumMismatch`].
pub async fn verify_checksum(
    fetcher: &dyn Fetcher,
    checksum_url: &str,
    path: &Path,
    deadline: Option<Duration>,
) -> Result<(), FetchError> {
    let published = fetch_published(fetcher, checksum_url, deadline)
        .await
        .map_err(|e| FetchError::ChecksumFetch {
            url: checksum_url.to_string(),
            source: Box::new(e),
        })?;
    let expected = published.trim();
    let actual = compute_file_sha256(path).await?;

    if actual != expected {
        return Err(FetchError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    debug!("SHA-256 {} matches for {}", actual, path.display());
    Ok(())
}

async fn fetch_published(
    fetcher: &dyn Fetcher,
    url: &str,
    deadline: Option<Duration>,
) -> Result<String, FetchError> {
    match deadline {
        Some(after) => tokio::time::timeout(after, fetcher.fetch_text(url))
            .await
            .map_err(|_| FetchError::TimedOut {
                url: url.to_string(),
                after,
            })?,
        None => fetcher.fetch_text(url).await,
    }
}
