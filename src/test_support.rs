//! In-memory fakes and fixtures shared by unit tests.

use crate::download::Fetcher;
use crate::error::{FetchError, SourceError, StoreError};
use crate::github::{Release, ReleaseSource};
use crate::store::ObjectStore;
use crate::template::Template;
use crate::types::{BinaryEntry, RepoLocator, TargetSpec, VersionSpec};
use crate::version::VersionRange;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Builds an entry for `name` with one target rendering
/// `https://dl/{version}/{os}/{arch}/{bin}` into `{name}/{version}/{os}/{arch}/{bin}`.
pub fn entry(name: &str, os: &[&str], arch: &[&str]) -> BinaryEntry {
    BinaryEntry {
        name: name.to_string(),
        versions: VersionSpec {
            repository: RepoLocator::parse(&format!("https://github.com/acme/{name}")).unwrap(),
            range: VersionRange::parse("*").unwrap(),
            include_prereleases: false,
        },
        targets: vec![target(
            "https://dl/{{.version}}/{{.os}}/{{.arch}}/{{.bin}}",
            "{{.name}}/{{.version}}/{{.os}}/{{.arch}}/{{.bin}}",
        )],
        os: os.iter().map(|s| s.to_string()).collect(),
        arch: arch.iter().map(|s| s.to_string()).collect(),
        bins: vec![name.to_string()],
    }
}

/// A target without checksum or condition.
pub fn target(url: &str, destination: &str) -> TargetSpec {
    TargetSpec {
        url: Template::parse(url).unwrap(),
        checksum: None,
        destination: Template::parse(destination).unwrap(),
        condition: None,
    }
}

/// Release source serving fixed listings keyed by `owner/repo`.
#[derive(Default)]
pub struct FakeSource {
    releases: HashMap<String, Vec<Release>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_releases(slug: &str, releases: Vec<Release>) -> Self {
        Self::default().and_releases(slug, releases)
    }

    pub fn and_releases(mut self, slug: &str, releases: Vec<Release>) -> Self {
        self.releases.insert(slug.to_string(), releases);
        self
    }

    /// Repositories listed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn list_releases(&self, repo: &RepoLocator) -> Result<Vec<Release>, SourceError> {
        let slug = repo.to_string();
        self.calls.lock().unwrap().push(slug.clone());
        self.releases
            .get(&slug)
            .cloned()
            .ok_or_else(|| SourceError::Status {
                status: 404,
                message: "Not Found".to_string(),
            })
    }
}

enum Response {
    Body(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Status(u16),
    Stall,
}

/// Fetcher serving canned bodies; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    responses: HashMap<String, Response>,
    flaky: Mutex<HashMap<String, usize>>,
    downloads: Mutex<Vec<(String, PathBuf)>>,
    texts: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_file(mut self, url: &str, body: &[u8]) -> Self {
        self.responses
            .insert(url.to_string(), Response::Body(body.to_vec()));
        self
    }

    pub fn with_text(self, url: &str, text: &str) -> Self {
        self.with_file(url, text.as_bytes())
    }

    pub fn with_failure(mut self, url: &str, status: u16) -> Self {
        self.responses
            .insert(url.to_string(), Response::Status(status));
        self
    }

    /// Answers 503 for the first `failures` downloads of `url`.
    pub fn with_flaky(self, url: &str, failures: usize, body: &[u8]) -> Self {
        self.flaky.lock().unwrap().insert(url.to_string(), failures);
        self.with_file(url, body)
    }

    /// Serves `body` for `url` after waiting `delay`.
    pub fn with_delay(mut self, url: &str, delay: Duration, body: &[u8]) -> Self {
        self.responses
            .insert(url.to_string(), Response::Delayed(delay, body.to_vec()));
        self
    }

    /// Never finishes answering `url`.
    pub fn with_stall(mut self, url: &str) -> Self {
        self.responses.insert(url.to_string(), Response::Stall);
        self
    }

    /// URLs downloaded so far, in call order, one entry per attempt.
    pub fn downloaded_urls(&self) -> Vec<String> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Scratch paths written by downloads.
    pub fn scratch_paths(&self) -> Vec<PathBuf> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub fn text_urls(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn status(url: &str, status: u16) -> FetchError {
        FetchError::Status {
            url: url.to_string(),
            status,
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.downloads
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));

        if let Some(left) = self.flaky.lock().unwrap().get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(Self::status(url, 503));
            }
        }

        match self.responses.get(url) {
            Some(Response::Body(body)) => {
                tokio::fs::write(dest, body).await?;
                Ok(body.len() as u64)
            }
            Some(Response::Delayed(delay, body)) => {
                tokio::time::sleep(*delay).await;
                tokio::fs::write(dest, body).await?;
                Ok(body.len() as u64)
            }
            Some(Response::Status(status)) => Err(Self::status(url, *status)),
            Some(Response::Stall) => stall(url).await,
            None => Err(Self::status(url, 404)),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.texts.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(Response::Body(body)) => Ok(String::from_utf8_lossy(body).into_owned()),
            Some(Response::Delayed(delay, body)) => {
                tokio::time::sleep(*delay).await;
                Ok(String::from_utf8_lossy(body).into_owned())
            }
            Some(Response::Status(status)) => Err(Self::status(url, *status)),
            Some(Response::Stall) => stall(url).await,
            None => Err(Self::status(url, 404)),
        }
    }
}

async fn stall<T>(url: &str) -> Result<T, FetchError> {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    Err(FakeFetcher::status(url, 504))
}

/// Bucket held in memory.
#[derive(Default)]
pub struct FakeStore {
    existing: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    exists_calls: Mutex<Vec<String>>,
    fail_uploads: bool,
    stall_uploads: bool,
    fail_exists: bool,
}

impl FakeStore {
    pub fn with_existing(keys: &[&str]) -> Self {
        Self {
            existing: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
            ..Self::default()
        }
    }

    /// Every upload fails.
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Every upload hangs.
    pub fn stalling_uploads(mut self) -> Self {
        self.stall_uploads = true;
        self
    }

    /// Every existence check fails.
    pub fn failing_exists(mut self) -> Self {
        self.fail_exists = true;
        self
    }

    /// Keys uploaded so far with the bytes read at upload time.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploads().into_iter().map(|(key, _)| key).collect()
    }

    pub fn exists_calls(&self) -> Vec<String> {
        self.exists_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.exists_calls.lock().unwrap().push(key.to_string());
        if self.fail_exists {
            return Err(StoreError::Other("access denied".to_string()));
        }
        Ok(self.existing.lock().unwrap().contains(key))
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = tokio::fs::read(path).await?;
        if self.stall_uploads {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_uploads {
            return Err(StoreError::Other("connection refused".to_string()));
        }
        self.uploads.lock().unwrap().push((key.to_string(), body));
        self.existing.lock().unwrap().insert(key.to_string());
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("mem://{key}")
    }
}
