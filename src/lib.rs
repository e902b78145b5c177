//! s3-mirror - Mirror GitHub-released binaries into S3-compatible storage
//!
//! This library resolves the releases of each configured binary against a
//! semver range, expands download URLs and object keys from templates over
//! a version × OS × architecture × binary matrix, and copies every artifact
//! that is not yet in the bucket, verifying SHA-256 digests where published.
//!
//! # Features
//!
//! - **Semver Filtering**: Tolerant tag parsing with ranges such as `>=1.28.0 <1.29.0`
//! - **Templated Targets**: URLs, checksums, keys and conditions from one template language
//! - **Idempotent Runs**: Objects already in the bucket are never downloaded again
//! - **SHA-256 Verification**: Published digests are checked before upload
//! - **Automatic Retry**: Built-in retry logic for transient download failures
//!
//! # Example
//!
//! ```no_run
//! use s3_mirror::{config, GitHubReleases, HttpFetcher, Mirror, RunOptions, S3Settings, S3Store};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = S3Settings {
//!     bucket: "mirror".to_string(),
//!     region: "us-east-1".to_string(),
//!     endpoint: "s3.amazonaws.com".to_string(),
//!     access_key: "key".to_string(),
//!     secret_key: "secret".to_string(),
//!     tls: true,
//! };
//! let mirror = Mirror::new(
//!     Arc::new(S3Store::new(&settings)?),
//!     Arc::new(GitHubReleases::new(s3_mirror::github::DEFAULT_API_URL, None)?),
//!     Arc::new(HttpFetcher::new()?),
//!     RunOptions::default(),
//! );
//!
//! let config = config::load("config.yaml").await?;
//! mirror.run(&config, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod expand;
pub mod github;
pub mod orchestrator;
pub mod store;
pub mod sync;
pub mod template;
pub mod types;
pub mod verify;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types and functions
pub use download::{Fetcher, HttpFetcher};
pub use error::{FetchError, MirrorError, SourceError, StoreError};
pub use expand::{expand, ExpandedTarget, Expansion};
pub use github::{GitHubReleases, Release, ReleaseSource};
pub use orchestrator::Mirror;
pub use store::{ObjectStore, S3Settings, S3Store};
pub use sync::{prepare, publish, sync_target, Prepared};
pub use template::{Context, Template, TemplateError};
pub use types::{
    BinaryEntry, FailurePolicy, MirrorConfig, RepoLocator, RunOptions, RunSummary, SyncOutcome,
    TargetSpec, VersionSpec,
};
pub use version::{filter_versions, parse_tolerant, VersionRange};
