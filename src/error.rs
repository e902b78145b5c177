//! Error types for mirror operations.
//!
//! [`MirrorError`] is fatal and aborts the run. [`FetchError`] covers the
//! recoverable download and checksum failures that only abandon a single
//! target.

use crate::template::TemplateError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a mirror run.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The configuration is structurally invalid.
    #[error("invalid configuration for '{binary}': {reason}")]
    Config { binary: String, reason: String },

    /// The repository URL does not name exactly one owner and repository.
    #[error("invalid GitHub URL '{0}': expected https://github.com/<owner>/<repo>")]
    InvalidLocator(String),

    /// The semver range expression could not be parsed.
    #[error("invalid semver range '{range}': {reason}")]
    InvalidRangeExpression { range: String, reason: String },

    /// A template failed to parse or render.
    #[error("{field} template of '{binary}' ({template}): {source}")]
    Template {
        binary: String,
        field: &'static str,
        template: String,
        #[source]
        source: TemplateError,
    },

    /// Listing releases failed, so no versions could be resolved.
    #[error("failed to fetch GitHub versions for {repository}: {source}")]
    SourceUnavailable {
        repository: String,
        #[source]
        source: SourceError,
    },

    /// The existence check failed with something other than "not found".
    #[error("failed to check if file exists in {location}: {source}")]
    ExistsCheck {
        location: String,
        #[source]
        source: StoreError,
    },

    /// Uploading to the object store failed.
    #[error("failed to upload file to {location}: {source}")]
    Upload {
        location: String,
        #[source]
        source: StoreError,
    },

    /// A download or checksum failure escalated by the fetch failure policy.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// The run was cancelled from outside.
    #[error("run interrupted")]
    Interrupted,

    /// I/O error during local file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// YAML deserialization error.
    #[error("failed to parse config file: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Recoverable failures while acquiring an artifact.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("failed to download {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// Fewer or more bytes arrived than `Content-Length` announced.
    #[error("file size mismatch for {url}: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// A single attempt exceeded its deadline.
    #[error("download of {url} timed out after {}", human_duration(.after))]
    TimedOut { url: String, after: Duration },

    /// The checksum file itself could not be fetched.
    #[error("failed to download checksum from {url}: {source}")]
    ChecksumFetch {
        url: String,
        #[source]
        source: Box<FetchError>,
    },

    /// The computed digest differs from the published one.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// I/O error while writing or hashing the scratch file.
    #[error(transparent)]
    IoError(#[from] io::Error),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::ReqwestError(_) | FetchError::TimedOut { .. } => true,
            FetchError::SizeMismatch { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::ChecksumFetch { source, .. } => source.is_transient(),
            FetchError::ChecksumMismatch { .. } | FetchError::IoError(_) => false,
        }
    }
}

fn human_duration(after: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*after)
}

/// Errors reported by an object store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error from the S3 client.
    #[error(transparent)]
    Backend(#[from] object_store::Error),

    /// I/O error reading the file to upload.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// The upload exceeded its deadline.
    #[error("upload timed out after {}", human_duration(.after))]
    TimedOut { after: Duration },

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

/// Errors reported by a release source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP transport error.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// The API answered with a non-success status (unknown repository, rate limit).
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The release listing was not the expected JSON.
    #[error("invalid release listing: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Any other source failure.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(404, false)]
    #[case::forbidden(403, false)]
    #[case::rate_limited(429, true)]
    #[case::server_error(502, true)]
    fn test_status_transience(#[case] status: u16, #[case] transient: bool) {
        let err = FetchError::Status {
            url: "https://example.com/a".to_string(),
            status,
        };
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn test_checksum_mismatch_is_permanent() {
        let err = FetchError::ChecksumMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected abc123, got def456"
        );
    }

    #[test]
    fn test_timeout_message_uses_human_duration() {
        let err = FetchError::TimedOut {
            url: "https://example.com/a".to_string(),
            after: Duration::from_secs(90),
        };
        assert_eq!(
            err.to_string(),
            "download of https://example.com/a timed out after 1m 30s"
        );
    }
}
