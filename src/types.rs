//! Data structures for mirror runs.

use crate::error::MirrorError;
use crate::template::Template;
use crate::version::VersionRange;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A GitHub repository, derived from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    /// The URL as written in the configuration; exposed to templates as `.github`.
    pub url: String,
    pub owner: String,
    pub repo: String,
}

impl RepoLocator {
    /// Parses `https://github.com/<owner>/<repo>`.
    ///
    /// The host prefix is optional; a trailing `/` or `.git` is ignored.
    /// Anything other than exactly two path segments is rejected.
    pub fn parse(url: &str) -> Result<Self, MirrorError> {
        let trimmed = url.trim();
        let path = ["https://github.com/", "http://github.com/", "github.com/"]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        match path.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                url: trimmed.to_string(),
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(MirrorError::InvalidLocator(url.to_string())),
        }
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Which releases of a repository to mirror.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub repository: RepoLocator,
    pub range: VersionRange,
    pub include_prereleases: bool,
}

/// One declared download target; every template is already parsed.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub url: Template,
    /// URL of a file holding the SHA-256 digest; `None` skips verification.
    pub checksum: Option<Template>,
    pub destination: Template,
    /// Must render to `true` for the combination to be mirrored.
    pub condition: Option<Template>,
}

/// A binary to mirror and the matrix it is expanded over.
#[derive(Debug, Clone)]
pub struct BinaryEntry {
    pub name: String,
    pub versions: VersionSpec,
    pub targets: Vec<TargetSpec>,
    pub os: Vec<String>,
    pub arch: Vec<String>,
    /// Binary names; `[name]` unless configured.
    pub bins: Vec<String>,
}

/// The whole mirror configuration.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    pub binaries: Vec<BinaryEntry>,
}

/// What happens to the run when a class of failure occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Log the failure, abandon the target and carry on.
    Continue,
    /// Stop the whole run.
    Abort,
}

/// Tunables for a mirror run.
///
/// # Example
///
/// ```
/// use s3_mirror::{FailurePolicy, RunOptions};
///
/// let options = RunOptions {
///     concurrency: 4,
///     download_retries: 0,
///     ..RunOptions::default()
/// };
/// assert_eq!(options.on_publish_failure, FailurePolicy::Abort);
/// ```
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of targets synced at once (default: 1, strictly sequential).
    pub concurrency: usize,
    /// Deadline for a single download attempt, also applied to fetching
    /// the checksum file.
    pub download_timeout: Option<Duration>,
    /// Deadline for one upload.
    pub upload_timeout: Option<Duration>,
    /// Extra attempts after a transient download failure.
    pub download_retries: usize,
    /// Pause between download attempts.
    pub retry_interval: Duration,
    /// Where scratch files are created (default: the system temp dir).
    pub scratch_dir: Option<PathBuf>,
    /// Policy for download and checksum failures (default: continue).
    pub on_fetch_failure: FailurePolicy,
    /// Policy for upload failures (default: abort).
    ///
    /// A failing upload usually means bad credentials or an unreachable
    /// endpoint, which every later target would hit as well.
    pub on_publish_failure: FailurePolicy,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            download_timeout: Some(Duration::from_secs(600)),
            upload_timeout: Some(Duration::from_secs(1800)),
            download_retries: 3,
            retry_interval: Duration::from_secs(10),
            scratch_dir: None,
            on_fetch_failure: FailurePolicy::Continue,
            on_publish_failure: FailurePolicy::Abort,
            show_progress: false,
        }
    }
}

/// Result of handling one expanded combination.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The destination key already existed; nothing was downloaded.
    SkippedExists,
    /// The target's condition did not render `true`.
    ExcludedByCondition,
    /// Downloaded, verified when configured, and uploaded.
    Succeeded,
    /// A failure the run's policy let through; the target was abandoned.
    Failed(MirrorError),
}

/// A target abandoned after a recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTarget {
    pub destination: String,
    pub error: String,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub uploaded: usize,
    pub skipped_existing: usize,
    pub excluded: usize,
    pub failed: Vec<FailedTarget>,
}

impl RunSummary {
    pub fn record(&mut self, destination: Option<&str>, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::SkippedExists => self.skipped_existing += 1,
            SyncOutcome::ExcludedByCondition => self.excluded += 1,
            SyncOutcome::Succeeded => self.uploaded += 1,
            SyncOutcome::Failed(err) => self.failed.push(FailedTarget {
                destination: destination.unwrap_or_default().to_string(),
                error: err.to_string(),
            }),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} already present, {} excluded by condition, {} failed",
            self.uploaded,
            self.skipped_existing,
            self.excluded,
            self.failed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use rstest::rstest;

    #[rstest]
    #[case::full_url("https://github.com/kubernetes/kubernetes", "kubernetes", "kubernetes")]
    #[case::trailing_slash("https://github.com/helm/helm/", "helm", "helm")]
    #[case::git_suffix("https://github.com/cli/cli.git", "cli", "cli")]
    #[case::bare_path("owner/repo", "owner", "repo")]
    fn test_locator_parse(#[case] url: &str, #[case] owner: &str, #[case] repo: &str) {
        let locator = RepoLocator::parse(url).unwrap();
        assert_eq!((locator.owner.as_str(), locator.repo.as_str()), (owner, repo));
    }

    #[rstest]
    #[case::one_segment("https://github.com/kubernetes")]
    #[case::three_segments("https://github.com/kubernetes/kubernetes/releases")]
    #[case::empty_owner("https://github.com//repo")]
    #[case::empty("")]
    fn test_locator_rejects(#[case] url: &str) {
        assert!(matches!(
            RepoLocator::parse(url),
            Err(MirrorError::InvalidLocator(_))
        ));
    }

    #[test]
    fn test_summary_records_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(Some("a"), &SyncOutcome::Succeeded);
        summary.record(Some("b"), &SyncOutcome::SkippedExists);
        summary.record(None, &SyncOutcome::ExcludedByCondition);
        summary.record(
            Some("c"),
            &SyncOutcome::Failed(MirrorError::Fetch {
                url: "https://example.com/c".to_string(),
                source: FetchError::Status {
                    url: "https://example.com/c".to_string(),
                    status: 404,
                },
            }),
        );
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed[0].destination, "c");
        assert_eq!(
            summary.to_string(),
            "1 uploaded, 1 already present, 1 excluded by condition, 1 failed"
        );
    }
}
