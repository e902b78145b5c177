//! Main orchestration logic for mirror runs.

use crate::download::Fetcher;
use crate::error::MirrorError;
use crate::expand::{combination_count, expand, ExpandedTarget, Expansion};
use crate::github::ReleaseSource;
use crate::store::ObjectStore;
use crate::sync::{prepare, publish, Prepared, SyncEnv};
use crate::types::{BinaryEntry, MirrorConfig, RunOptions, RunSummary, SyncOutcome};
use crate::version;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Mirrors configured binaries from their release hosts into a bucket.
///
/// # Example
///
/// ```no_run
/// use s3_mirror::{config, GitHubReleases, HttpFetcher, Mirror, RunOptions, S3Settings, S3Store};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = S3Store::new(&S3Settings {
///     bucket: "mirror".to_string(),
///     region: "us-east-1".to_string(),
///     endpoint: "localhost:9000".to_string(),
///     access_key: "minio".to_string(),
///     secret_key: "minio123".to_string(),
///     tls: false,
/// })?;
/// let mirror = Mirror::new(
///     Arc::new(store),
///     Arc::new(GitHubReleases::new(s3_mirror::github::DEFAULT_API_URL, None)?),
///     Arc::new(HttpFetcher::new()?),
///     RunOptions::default(),
/// );
/// let config = config::load("config.yaml").await?;
/// let summary = mirror.run(&config, &CancellationToken::new()).await?;
/// println!("{summary}");
/// # Ok(())
/// # }
/// ```
pub struct Mirror {
    store: Arc<dyn ObjectStore>,
    source: Arc<dyn ReleaseSource>,
    fetcher: Arc<dyn Fetcher>,
    options: RunOptions,
}

impl Mirror {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn ReleaseSource>,
        fetcher: Arc<dyn Fetcher>,
        options: RunOptions,
    ) -> Self {
        Self {
            store,
            source,
            fetcher,
            options,
        }
    }

    /// Mirrors every binary in `config`, in order.
    ///
    /// The first fatal error stops the run; nothing after it is attempted.
    pub async fn run(
        &self,
        config: &MirrorConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, MirrorError> {
        let mut summary = RunSummary::default();
        for entry in &config.binaries {
            if cancel.is_cancelled() {
                return Err(MirrorError::Interrupted);
            }
            self.mirror_binary(entry, cancel, &mut summary).await?;
        }
        Ok(summary)
    }

    async fn mirror_binary(
        &self,
        entry: &BinaryEntry,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), MirrorError> {
        let versions = version::resolve(self.source.as_ref(), &entry.versions).await?;
        info!("Filtered versions for {}: {:?}", entry.name, versions);
        if versions.is_empty() {
            warn!(
                "No releases of {} match '{}'",
                entry.versions.repository, entry.versions.range
            );
            return Ok(());
        }

        let pb = self.progress_bar(entry, combination_count(entry, &versions));
        let env = SyncEnv {
            store: self.store.as_ref(),
            fetcher: self.fetcher.as_ref(),
            options: &self.options,
            cancel,
        };

        // Checks and downloads overlap up to `concurrency`; `buffered` hands
        // them back in expansion order, and logging and uploads happen here,
        // one target at a time.
        let mut staged = stream::iter(expand(entry, &versions))
            .map(move |expansion| stage(expansion, env))
            .buffered(self.options.concurrency.max(1));

        while let Some(unit) = staged.next().await {
            let result = match unit {
                Ok(Unit::Excluded) => Ok((None, SyncOutcome::ExcludedByCondition)),
                Ok(Unit::Target(target, prepared)) => {
                    let published = publish(&target, prepared, env).await;
                    published.map(|outcome| (Some(target.destination), outcome))
                }
                Err(e) => Err(e),
            };
            pb.inc(1);
            match result {
                Ok((destination, outcome)) => summary.record(destination.as_deref(), &outcome),
                Err(e) => {
                    error!("Mirroring {} failed: {}", entry.name, e);
                    pb.abandon_with_message("❌ Mirror failed!");
                    return Err(e);
                }
            }
        }

        pb.finish_with_message(format!("✅ {} done", entry.name));
        Ok(())
    }

    fn progress_bar(&self, entry: &BinaryEntry, total: u64) -> indicatif::ProgressBar {
        if !self.options.show_progress {
            return indicatif::ProgressBar::hidden();
        }
        let progress_bar = indicatif::ProgressBar::new(total);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
        ) {
            progress_bar.set_style(style.progress_chars("█▓▒░ "));
        }
        progress_bar.set_message(format!("📦 Mirroring {}", entry.name));
        progress_bar
    }
}

enum Unit {
    Excluded,
    Target(ExpandedTarget, Prepared),
}

async fn stage(
    expansion: Result<Expansion, MirrorError>,
    env: SyncEnv<'_>,
) -> Result<Unit, MirrorError> {
    match expansion? {
        Expansion::Excluded(_) => Ok(Unit::Excluded),
        Expansion::Target(target) => {
            let prepared = prepare(&target, env).await?;
            Ok(Unit::Target(target, prepared))
        }
    }
}
