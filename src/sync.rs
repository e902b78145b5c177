//! Syncing of a single expanded target into the bucket.
//!
//! A target is handled in two stages. [`prepare`] checks the bucket,
//! downloads and verifies; it is safe to run for several targets at once.
//! [`publish`] emits the target's log lines and uploads; callers run it in
//! expansion order.

use crate::download::Fetcher;
use crate::error::{FetchError, MirrorError, StoreError};
use crate::expand::ExpandedTarget;
use crate::store::ObjectStore;
use crate::types::{FailurePolicy, RunOptions, SyncOutcome};
use crate::verify::verify_checksum;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_retry2::strategy::{jitter, FixedInterval};
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A uniquely named local file that is removed when dropped.
#[derive(Debug)]
pub struct Scratch {
    path: PathBuf,
}

impl Scratch {
    /// Creates an empty scratch file in `dir`, or the system temp dir.
    pub fn acquire(dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("binary-");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let path = file.into_temp_path().keep()?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
}

/// Log lines of one target, held back until [`publish`] replays them.
#[derive(Debug, Default)]
pub struct Journal {
    lines: Mutex<Vec<(Level, String)>>,
}

impl Journal {
    fn info(&self, line: String) {
        self.push(Level::Info, line);
    }

    fn warn(&self, line: String) {
        self.push(Level::Warn, line);
    }

    fn push(&self, level: Level, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, line));
    }

    fn replay(self) {
        let lines = self
            .lines
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for (level, line) in lines {
            match level {
                Level::Info => info!("{}", line),
                Level::Warn => warn!("{}", line),
            }
        }
    }
}

/// Collaborators shared by every target of a run.
#[derive(Clone, Copy)]
pub struct SyncEnv<'a> {
    pub store: &'a dyn ObjectStore,
    pub fetcher: &'a dyn Fetcher,
    pub options: &'a RunOptions,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug)]
enum Stage {
    Present,
    Fetched(Scratch),
    FetchFailed(FetchError),
}

/// A target after [`prepare`], waiting for [`publish`].
#[derive(Debug)]
pub struct Prepared {
    stage: Stage,
    journal: Journal,
}

/// Mirrors one target: skip if present, else download, verify and upload.
///
/// # Arguments
///
/// * `target` - The rendered target to mirror
/// * `env` - Store, fetcher, run options and cancellation token
///
/// # Returns
///
/// The outcome of the target. Failures that the configured policy lets
/// through come back as [`SyncOutcome::Failed`]; everything else is an
/// `Err`. The scratch file is gone when this returns, whichever way it
/// returns.
pub async fn sync_target(
    target: &ExpandedTarget,
    env: SyncEnv<'_>,
) -> Result<SyncOutcome, MirrorError> {
    let prepared = prepare(target, env).await?;
    publish(target, prepared, env).await
}

/// Checks the bucket for `target` and, if absent, downloads and verifies it.
///
/// Nothing is logged above debug level here; lines are kept in the
/// returned [`Prepared`] for [`publish`].
pub async fn prepare(target: &ExpandedTarget, env: SyncEnv<'_>) -> Result<Prepared, MirrorError> {
    let journal = Journal::default();
    let location = env.store.location(&target.destination);

    let exists = cancellable(env.cancel, env.store.exists(&target.destination))
        .await?
        .map_err(|source| MirrorError::ExistsCheck {
            location: location.clone(),
            source,
        })?;
    if exists {
        journal.info(format!("File {} already exists, skipping", location));
        return Ok(Prepared {
            stage: Stage::Present,
            journal,
        });
    }

    let scratch = Scratch::acquire(env.options.scratch_dir.as_deref())?;
    journal.info(format!(
        "⬇️  Downloading {} for {}",
        target.url, target.context
    ));
    let stage = match cancellable(env.cancel, fetch(target, scratch.path(), env, &journal)).await? {
        Ok(()) => Stage::Fetched(scratch),
        Err(e) => Stage::FetchFailed(e),
    };
    Ok(Prepared { stage, journal })
}

/// Logs what [`prepare`] did for `target` and uploads the verified artifact.
pub async fn publish(
    target: &ExpandedTarget,
    prepared: Prepared,
    env: SyncEnv<'_>,
) -> Result<SyncOutcome, MirrorError> {
    let Prepared { stage, journal } = prepared;
    journal.replay();

    let key = target.destination.as_str();
    let location = env.store.location(key);
    let scratch = match stage {
        Stage::Present => return Ok(SyncOutcome::SkippedExists),
        Stage::FetchFailed(source) => {
            let err = MirrorError::Fetch {
                url: target.url.clone(),
                source,
            };
            return apply_policy(env.options.on_fetch_failure, &location, err);
        }
        Stage::Fetched(scratch) => scratch,
    };

    info!("⬆️  Uploading to {}", location);
    let uploaded = upload(env.store, key, scratch.path(), env.options.upload_timeout);
    match cancellable(env.cancel, uploaded).await? {
        Ok(()) => {
            info!("✅ Uploaded {}", location);
            Ok(SyncOutcome::Succeeded)
        }
        Err(source) => {
            let err = MirrorError::Upload {
                location: location.clone(),
                source,
            };
            apply_policy(env.options.on_publish_failure, &location, err)
        }
    }
}

fn apply_policy(
    policy: FailurePolicy,
    location: &str,
    err: MirrorError,
) -> Result<SyncOutcome, MirrorError> {
    match policy {
        FailurePolicy::Abort => Err(err),
        FailurePolicy::Continue => {
            error!("❌ Skipping {}: {}", location, err);
            Ok(SyncOutcome::Failed(err))
        }
    }
}

async fn fetch(
    target: &ExpandedTarget,
    dest: &Path,
    env: SyncEnv<'_>,
    journal: &Journal,
) -> Result<(), FetchError> {
    download_with_retry(env.fetcher, &target.url, dest, env.options, journal).await?;
    match &target.checksum_url {
        Some(checksum_url) => {
            verify_checksum(env.fetcher, checksum_url, dest, env.options.download_timeout)
                .await?;
            journal.info(format!("✅ SHA-256 verified for {}", target.url));
        }
        None => debug!("No checksum configured for {}", target.url),
    }
    Ok(())
}

/// Downloads `url` into `dest`, retrying transient failures.
///
/// # Arguments
///
/// * `fetcher` - Fetcher performing each attempt
/// * `url` - Artifact URL
/// * `dest` - Scratch file; every attempt replaces its contents
/// * `options` - Retry count, pause between attempts and per-attempt deadline
/// * `journal` - Receives a warning for each failed attempt that is retried
///
/// # Returns
///
/// The number of bytes written, or the error of the last attempt. Errors
/// that [`FetchError::is_transient`] rejects end the retries at once.
pub async fn download_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
    options: &RunOptions,
    journal: &Journal,
) -> Result<u64, FetchError> {
    let retry_strategy = FixedInterval::new(options.retry_interval)
        .map(jitter)
        .take(options.download_retries);

    Retry::spawn(retry_strategy, || async move {
        match attempt(fetcher, url, dest, options.download_timeout).await {
            Ok(written) => Ok(written),
            Err(e) if e.is_transient() => {
                journal.warn(format!("Failed to download {} due to error: {}", url, e));
                RetryError::to_transient(e)
            }
            Err(e) => RetryError::to_permanent(e),
        }
    })
    .await
}

async fn attempt(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
    deadline: Option<Duration>,
) -> Result<u64, FetchError> {
    match deadline {
        Some(after) => tokio::time::timeout(after, fetcher.download(url, dest))
            .await
            .map_err(|_| FetchError::TimedOut {
                url: url.to_string(),
                after,
            })?,
        None => fetcher.download(url, dest).await,
    }
}

async fn upload(
    store: &dyn ObjectStore,
    key: &str,
    path: &Path,
    deadline: Option<Duration>,
) -> Result<(), StoreError> {
    match deadline {
        Some(after) => tokio::time::timeout(after, store.put_file(key, path))
            .await
            .map_err(|_| StoreError::TimedOut { after })?,
        None => store.put_file(key, path).await,
    }
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, MirrorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MirrorError::Interrupted),
        output = fut => Ok(output),
    }
}
