use anyhow::Context;
use clap::{ArgAction, Parser};
use s3_mirror::{
    config, FailurePolicy, GitHubReleases, HttpFetcher, Mirror, RunOptions, S3Settings, S3Store,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "s3-mirror")]
#[command(about = "Mirror GitHub release binaries into an S3 bucket", long_about = None)]
#[command(version)]
struct Args {
    /// Bucket name
    #[arg(long, env = "S3_BUCKET")]
    bucket: String,

    /// YAML config file listing the binaries to mirror
    #[arg(long, env = "CONFIG_FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Bucket region
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Access key ID
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    access_key: String,

    /// Secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: String,

    /// S3 endpoint, as host[:port] or a full URL
    #[arg(long, env = "S3_ENDPOINT")]
    endpoint: String,

    /// Use TLS for the S3 endpoint
    #[arg(long, env = "S3_TLSSECURE", default_value_t = true, action = ArgAction::Set)]
    tlssecure: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Token for the GitHub API, raising its rate limit
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = s3_mirror::github::DEFAULT_API_URL)]
    github_api_url: String,

    /// Targets of one binary synced at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Deadline for one download attempt or checksum fetch, e.g. "10m" (0 disables it)
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    download_timeout: Duration,

    /// Deadline for one upload, e.g. "30m" (0 disables it)
    #[arg(long, default_value = "30m", value_parser = humantime::parse_duration)]
    upload_timeout: Duration,

    /// Retries after a transient download failure
    #[arg(long, default_value_t = 3)]
    download_retries: usize,

    /// Pause between download attempts, e.g. "10s"
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    retry_interval: Duration,

    /// Directory for scratch files (default: system temp dir)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// What to do when a download or checksum check fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Continue)]
    on_download_failure: FailurePolicy,

    /// What to do when an upload fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    on_upload_failure: FailurePolicy,

    /// Never draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(format!("s3_mirror={}", args.log_level))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("🚀 s3-mirror - GitHub release mirror");
    info!("Bucket: {}", args.bucket);
    info!("Config: {}", args.config.display());

    let config = config::load(&args.config).await?;

    let store = S3Store::new(&S3Settings {
        bucket: args.bucket,
        region: args.region,
        endpoint: args.endpoint,
        access_key: args.access_key,
        secret_key: args.secret_key,
        tls: args.tlssecure,
    })
    .context("failed to initialize S3 client")?;
    let source = GitHubReleases::new(&args.github_api_url, args.github_token)
        .context("failed to initialize GitHub client")?;
    let fetcher = HttpFetcher::new().context("failed to initialize HTTP client")?;

    let options = RunOptions {
        concurrency: args.concurrency,
        download_timeout: Some(args.download_timeout).filter(|d| !d.is_zero()),
        upload_timeout: Some(args.upload_timeout).filter(|d| !d.is_zero()),
        download_retries: args.download_retries,
        retry_interval: args.retry_interval,
        scratch_dir: args.scratch_dir,
        on_fetch_failure: args.on_download_failure,
        on_publish_failure: args.on_upload_failure,
        show_progress: !args.no_progress && atty::is(atty::Stream::Stderr),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            on_interrupt.cancel();
        }
    });

    let mirror = Mirror::new(Arc::new(store), Arc::new(source), Arc::new(fetcher), options);
    let summary = mirror.run(&config, &cancel).await?;

    info!("✅ Mirror run completed: {}", summary);
    for failed in &summary.failed {
        warn!("Not mirrored: {} ({})", failed.destination, failed.error);
    }
    Ok(())
}
