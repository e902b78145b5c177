//! GitHub release listing.

use crate::error::SourceError;
use crate::types::RepoLocator;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Default GitHub REST API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Releases requested per page (the API maximum).
const PER_PAGE: usize = 100;

/// Upper bound on pages fetched for one repository.
const MAX_PAGES: usize = 50;

/// One release as seen by the version resolver.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Tag name; drafts may not have one yet.
    #[serde(rename = "tag_name")]
    pub tag: Option<String>,
    /// Whether the release is marked as a prerelease.
    #[serde(default)]
    pub prerelease: bool,
}

impl Release {
    pub fn new(tag: impl Into<String>, prerelease: bool) -> Self {
        Self {
            tag: Some(tag.into()),
            prerelease,
        }
    }
}

/// Source of release listings for a repository.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Lists every release of `repo`, newest first as the host returns them.
    async fn list_releases(&self, repo: &RepoLocator) -> Result<Vec<Release>, SourceError>;
}

/// [`ReleaseSource`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubReleases {
    /// Creates a client for `api_url`, authenticating with `token` when given.
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("s3-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    async fn fetch_page(&self, repo: &RepoLocator, page: usize) -> Result<Vec<Release>, SourceError> {
        let url = format!(
            "{}/repos/{}/{}/releases",
            self.api_url, repo.owner, repo.repo
        );
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .query(&[("per_page", PER_PAGE), ("page", page)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ApiMessage>(&body)
                .map(|m| m.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn list_releases(&self, repo: &RepoLocator) -> Result<Vec<Release>, SourceError> {
        let mut releases = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch = self.fetch_page(repo, page).await?;
            let count = batch.len();
            debug!("Fetched {} releases from page {} of {}", count, page, repo);
            releases.extend(batch);
            if count < PER_PAGE {
                return Ok(releases);
            }
        }
        warn!(
            "Stopped listing releases of {} after {} pages",
            repo, MAX_PAGES
        );
        Ok(releases)
    }
}
