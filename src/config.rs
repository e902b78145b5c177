//! Configuration loading from YAML files.
//!
//! The document is either a mapping with a `binaries` list or the list
//! itself:
//!
//! ```yaml
//! binaries:
//!   - name: kubectl
//!     versions:
//!       github: https://github.com/kubernetes/kubernetes
//!       semver: ">=1.28.0 <1.29.0"
//!       prereleases: false
//!     os: [linux, darwin]
//!     arch: [amd64, arm64]
//!     targets:
//!       - url: https://dl.k8s.io/release/{{.version}}/bin/{{.os}}/{{.arch}}/kubectl
//!         checksum: https://dl.k8s.io/release/{{.version}}/bin/{{.os}}/{{.arch}}/kubectl.sha256
//!         destination: kubectl/{{.version}}/{{.os}}/{{.arch}}/kubectl
//! ```
//!
//! Entries written in the older single-target shape (`download`,
//! `checksum` and `destination` next to `name`) are read as one target.
//! Unknown keys are rejected at every level.

use crate::error::MirrorError;
use crate::template::Template;
use crate::types::{BinaryEntry, MirrorConfig, RepoLocator, TargetSpec, VersionSpec};
use crate::version::VersionRange;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(default)]
    binaries: Vec<RawBinary>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBinary {
    name: String,
    versions: RawVersions,
    #[serde(default)]
    os: Vec<String>,
    #[serde(default)]
    arch: Vec<String>,
    #[serde(default)]
    bins: Option<Vec<String>>,
    #[serde(default)]
    targets: Option<Vec<RawTarget>>,
    #[serde(default)]
    download: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    destination: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVersions {
    github: String,
    semver: String,
    #[serde(default)]
    prereleases: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    url: String,
    #[serde(default)]
    checksum: Option<String>,
    destination: String,
    #[serde(default)]
    condition: Option<String>,
}

/// Reads and validates the configuration file at `path`.
pub async fn load(path: impl AsRef<Path>) -> Result<MirrorConfig, MirrorError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("failed to read config file {}: {}", path.display(), e),
        )
    })?;
    parse(&content)
}

/// Parses and validates a YAML configuration document.
///
/// Locators, ranges and templates are all checked here, so a bad
/// configuration fails before any network access.
pub fn parse(yaml: &str) -> Result<MirrorConfig, MirrorError> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let raw = match value {
        serde_yaml::Value::Sequence(_) => serde_yaml::from_value::<Vec<RawBinary>>(value)?,
        serde_yaml::Value::Null => Vec::new(),
        other => serde_yaml::from_value::<RawDocument>(other)?.binaries,
    };

    let binaries = raw
        .into_iter()
        .map(build_entry)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MirrorConfig { binaries })
}

fn build_entry(raw: RawBinary) -> Result<BinaryEntry, MirrorError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(MirrorError::Config {
            binary: raw.name,
            reason: "name must not be empty".to_string(),
        });
    }
    let config_error = |reason: &str| MirrorError::Config {
        binary: name.clone(),
        reason: reason.to_string(),
    };

    let repository = RepoLocator::parse(&raw.versions.github)?;
    let range = VersionRange::parse(&raw.versions.semver)?;

    let raw_targets = match (raw.targets, raw.download, raw.destination) {
        (Some(targets), None, None) => targets,
        (Some(_), _, _) => {
            return Err(config_error(
                "use either 'targets' or 'download'/'destination', not both",
            ));
        }
        (None, Some(url), Some(destination)) => vec![RawTarget {
            url,
            checksum: raw.checksum,
            destination,
            condition: None,
        }],
        (None, None, None) => Vec::new(),
        (None, _, _) => {
            return Err(config_error(
                "'download' and 'destination' must be given together",
            ));
        }
    };

    if !raw_targets.is_empty() && (raw.os.is_empty() || raw.arch.is_empty()) {
        return Err(config_error(
            "'os' and 'arch' must list at least one value when targets are declared",
        ));
    }
    if raw_targets.is_empty() {
        warn!("Binary {} declares no targets; nothing will be mirrored", name);
    }

    let targets = raw_targets
        .into_iter()
        .map(|t| build_target(&name, t))
        .collect::<Result<Vec<_>, _>>()?;

    let bins = match raw.bins {
        Some(bins) if !bins.is_empty() => bins,
        _ => vec![name.clone()],
    };

    Ok(BinaryEntry {
        versions: VersionSpec {
            repository,
            range,
            include_prereleases: raw.versions.prereleases,
        },
        targets,
        os: raw.os,
        arch: raw.arch,
        bins,
        name,
    })
}

fn build_target(binary: &str, raw: RawTarget) -> Result<TargetSpec, MirrorError> {
    let compile = |field: &'static str, source: &str| {
        Template::parse(source).map_err(|source_err| MirrorError::Template {
            binary: binary.to_string(),
            field,
            template: source.to_string(),
            source: source_err,
        })
    };
    let optional = |field: &'static str, source: Option<String>| {
        source
            .filter(|s| !s.trim().is_empty())
            .map(|s| compile(field, &s))
            .transpose()
    };

    Ok(TargetSpec {
        url: compile("url", &raw.url)?,
        checksum: optional("checksum", raw.checksum)?,
        destination: compile("destination", &raw.destination)?,
        condition: optional("condition", raw.condition)?,
    })
}
