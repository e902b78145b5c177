//! Release tag resolution and semver range filtering.

use crate::error::MirrorError;
use crate::github::{Release, ReleaseSource};
use crate::types::VersionSpec;
use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Parses a tag that may deviate from strict semver.
///
/// Accepts a leading lower-case `v`, surrounding whitespace, leading zeros in the
/// numeric components and a missing minor or patch component (`1.28` is
/// read as `1.28.0`). Short forms may not carry a prerelease or build
/// suffix.
pub fn parse_tolerant(tag: &str) -> Option<Version> {
    let s = tag.trim();
    let s = s.strip_prefix('v').unwrap_or(s);

    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(split);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || (parts.len() < 3 && !suffix.is_empty()) {
        return None;
    }

    let mut normalized: Vec<&str> = parts
        .iter()
        .map(|p| {
            let trimmed = p.trim_start_matches('0');
            if trimmed.is_empty() && !p.is_empty() {
                "0"
            } else {
                trimmed
            }
        })
        .collect();
    normalized.resize(3, "0");

    Version::parse(&format!("{}{}", normalized.join("."), suffix)).ok()
}

/// Orders versions by semver precedence, ignoring build metadata.
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Bound {
    Exact(Version),
    /// `1.x` covers `[1.0.0, 2.0.0)`; a bare `*` has no upper end.
    Wildcard {
        lower: Version,
        upper: Option<Version>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    bound: Bound,
}

impl Comparator {
    fn matches(&self, v: &Version) -> bool {
        match &self.bound {
            Bound::Exact(b) => {
                let ord = precedence(v, b);
                match self.op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::Ne => ord != Ordering::Equal,
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                }
            }
            Bound::Wildcard { lower, upper } => {
                let at_least_lower = precedence(v, lower) != Ordering::Less;
                let below_upper = upper
                    .as_ref()
                    .map_or(true, |u| precedence(v, u) == Ordering::Less);
                match self.op {
                    Op::Eq => at_least_lower && below_upper,
                    Op::Ne => !(at_least_lower && below_upper),
                    Op::Ge => at_least_lower,
                    Op::Gt => upper.is_some() && !below_upper,
                    Op::Lt => !at_least_lower,
                    Op::Le => below_upper,
                }
            }
        }
    }
}

/// A semver range expression such as `>=1.28.0 <1.29.0 || 2.x`.
///
/// Whitespace-separated comparators must all match; `||` separates
/// alternatives of which one must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    pub fn parse(range: &str) -> Result<Self, MirrorError> {
        let invalid = |reason: String| MirrorError::InvalidRangeExpression {
            range: range.to_string(),
            reason,
        };

        let mut alternatives = Vec::new();
        for alternative in range.split("||") {
            let mut comparators = Vec::new();
            let mut pending_op: Option<&str> = None;
            for word in alternative.split_whitespace() {
                let (op, version) = split_operator(word);
                match (pending_op.take(), op, version.is_empty()) {
                    (None, op, true) => pending_op = Some(op),
                    (None, op, false) => comparators.push(parse_comparator(op, version).map_err(invalid)?),
                    (Some(op), "", false) => comparators.push(parse_comparator(op, version).map_err(invalid)?),
                    (Some(op), _, _) => return Err(invalid(format!("operator '{op}' is missing a version"))),
                }
            }
            if let Some(op) = pending_op {
                return Err(invalid(format!("operator '{op}' is missing a version")));
            }
            if comparators.is_empty() {
                return Err(invalid("empty range".to_string()));
            }
            alternatives.push(comparators);
        }

        Ok(Self {
            source: range.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for VersionRange {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn split_operator(word: &str) -> (&str, &str) {
    for op in [">=", "<=", "==", "!=", ">", "<", "=", "!"] {
        if let Some(rest) = word.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", word)
}

fn parse_comparator(op: &str, version: &str) -> Result<Comparator, String> {
    let op = match op {
        "" | "=" | "==" => Op::Eq,
        "!=" | "!" => Op::Ne,
        ">" => Op::Gt,
        ">=" => Op::Ge,
        "<" => Op::Lt,
        "<=" => Op::Le,
        other => return Err(format!("unknown operator '{other}'")),
    };
    Ok(Comparator {
        op,
        bound: parse_bound(version)?,
    })
}

fn parse_bound(version: &str) -> Result<Bound, String> {
    let is_wild = |p: &str| matches!(p, "x" | "X" | "*");
    let has_suffix = version.contains(['-', '+']);
    let parts: Vec<&str> = version.split('.').collect();

    if has_suffix || (parts.len() == 3 && !parts.iter().any(|p| is_wild(p))) {
        return Version::parse(version)
            .map(Bound::Exact)
            .map_err(|e| format!("'{version}': {e}"));
    }
    if parts.len() > 3 {
        return Err(format!("'{version}': too many components"));
    }

    let mut fixed = Vec::new();
    for (idx, part) in parts.iter().enumerate() {
        if is_wild(part) {
            if parts[idx..].iter().any(|p| !is_wild(p)) {
                return Err(format!("'{version}': wildcard must be trailing"));
            }
            break;
        }
        let n = part
            .parse::<u64>()
            .map_err(|_| format!("'{version}': '{part}' is not a number"))?;
        fixed.push(n);
    }

    let bound = match fixed.as_slice() {
        [] => Bound::Wildcard {
            lower: Version::new(0, 0, 0),
            upper: None,
        },
        [major] => Bound::Wildcard {
            lower: Version::new(*major, 0, 0),
            upper: Some(Version::new(major + 1, 0, 0)),
        },
        [major, minor] => Bound::Wildcard {
            lower: Version::new(*major, *minor, 0),
            upper: Some(Version::new(*major, minor + 1, 0)),
        },
        _ => return Err(format!("'{version}': malformed version")),
    };
    Ok(bound)
}

/// Keeps the tags whose tolerant parse satisfies `range`.
///
/// The original tag strings are returned in input order. Tags that do not
/// parse are skipped.
pub fn filter_versions<'a, I>(tags: I, range: &VersionRange) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter(|tag| match parse_tolerant(tag) {
            Some(v) => range.matches(&v),
            None => {
                debug!("Ignoring tag {:?}: not a version", tag);
                false
            }
        })
        .map(str::to_string)
        .collect()
}

/// Drops untagged releases and, unless requested, prereleases.
pub fn release_tags(releases: &[Release], include_prereleases: bool) -> Vec<&str> {
    releases
        .iter()
        .filter(|r| include_prereleases || !r.prerelease)
        .filter_map(|r| r.tag.as_deref())
        .collect()
}

/// Lists the releases for `spec` and returns the tags inside its range.
pub async fn resolve(
    source: &dyn ReleaseSource,
    spec: &VersionSpec,
) -> Result<Vec<String>, MirrorError> {
    let releases = source
        .list_releases(&spec.repository)
        .await
        .map_err(|source| MirrorError::SourceUnavailable {
            repository: spec.repository.to_string(),
            source,
        })?;
    debug!(
        "Found {} releases for {}",
        releases.len(),
        spec.repository
    );
    let tags = release_tags(&releases, spec.include_prereleases);
    Ok(filter_versions(tags, &spec.range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSource;
    use crate::types::RepoLocator;
    use rstest::rstest;

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[rstest]
    #[case::plain("1.2.3", "1.2.3")]
    #[case::v_prefix("v1.28.0", "1.28.0")]
    #[case::whitespace("  v1.0.0\n", "1.0.0")]
    #[case::short_minor("v1.28", "1.28.0")]
    #[case::short_major("3", "3.0.0")]
    #[case::leading_zeros("01.02.003", "1.2.3")]
    #[case::prerelease("v1.29.0-rc.1", "1.29.0-rc.1")]
    #[case::build("1.0.0+build.5", "1.0.0+build.5")]
    fn test_parse_tolerant(#[case] tag: &str, #[case] expected: &str) {
        assert_eq!(parse_tolerant(tag), Some(Version::parse(expected).unwrap()));
    }

    #[rstest]
    #[case::word("latest")]
    #[case::upper_v("V2.0.0")]
    #[case::prefixed_name("kubernetes-1.28.0")]
    #[case::four_parts("1.2.3.4")]
    #[case::short_with_suffix("1.2-rc.1")]
    #[case::empty("")]
    #[case::date("2024-01-01")]
    fn test_parse_tolerant_rejects(#[case] tag: &str) {
        assert_eq!(parse_tolerant(tag), None);
    }

    #[rstest]
    #[case(">=1.28.0 <1.29.0", "1.28.5", true)]
    #[case(">=1.28.0 <1.29.0", "1.29.0", false)]
    #[case(">=1.28.0 <1.29.0", "1.29.0-rc.1", true)]
    #[case(">= 1.28.0", "1.28.0", true)]
    #[case("1.2.3", "1.2.3", true)]
    #[case("=1.2.3", "1.2.4", false)]
    #[case("!1.2.3", "1.2.4", true)]
    #[case("!=1.2.3", "1.2.3", false)]
    #[case("<1.0.0 || >=2.0.0", "1.5.0", false)]
    #[case("<1.0.0 || >=2.0.0", "2.1.0", true)]
    #[case("1.x", "1.9.9", true)]
    #[case("1.x", "2.0.0", false)]
    #[case("1.28.x", "1.28.7", true)]
    #[case("1.28", "1.29.0", false)]
    #[case(">1.x", "2.0.0", true)]
    #[case(">1.x", "1.9.0", false)]
    #[case("<=1.x", "1.9.0", true)]
    #[case("<1.x", "0.9.0", true)]
    #[case("!=1.x", "1.0.1", false)]
    #[case("*", "0.0.1", true)]
    #[case(">=1.0.0", "1.0.0+build", true)]
    fn test_range_matches(#[case] expr: &str, #[case] version: &str, #[case] expected: bool) {
        let v = Version::parse(version).unwrap();
        assert_eq!(range(expr).matches(&v), expected, "{expr} vs {version}");
    }

    #[rstest]
    #[case::garbage("not a range")]
    #[case::dangling_operator(">=")]
    #[case::empty("")]
    #[case::empty_alternative(">=1.0.0 ||")]
    #[case::bad_version(">=1.2.3.4")]
    #[case::middle_wildcard("1.x.3")]
    #[case::v_prefix(">=v1.0.0")]
    #[case::double_operator(">= <1.0.0")]
    fn test_invalid_ranges(#[case] expr: &str) {
        let err = VersionRange::parse(expr).unwrap_err();
        assert!(
            matches!(err, MirrorError::InvalidRangeExpression { .. }),
            "{expr}: {err}"
        );
    }

    #[test]
    fn test_filter_keeps_original_tags_in_source_order() {
        let tags = ["v1.28.1", "garbage", "v1.27.0", "1.28.0", "v1.28.10"];
        assert_eq!(
            filter_versions(tags, &range(">=1.28.0 <1.29.0")),
            vec!["v1.28.1", "1.28.0", "v1.28.10"]
        );
    }

    #[test]
    fn test_release_tags_drops_untagged_and_prereleases() {
        let releases = vec![
            Release::new("v1.0.0", false),
            Release {
                tag: None,
                prerelease: false,
            },
            Release::new("v1.1.0-rc.1", true),
        ];
        assert_eq!(release_tags(&releases, false), vec!["v1.0.0"]);
        assert_eq!(release_tags(&releases, true), vec!["v1.0.0", "v1.1.0-rc.1"]);
    }

    fn kubectl_source() -> FakeSource {
        FakeSource::with_releases(
            "kubernetes/kubernetes",
            vec![
                Release::new("1.28.0", false),
                Release::new("1.28.1", false),
                Release::new("1.29.0-rc.1", true),
                Release::new("1.29.0", false),
            ],
        )
    }

    fn kubectl_spec(include_prereleases: bool) -> VersionSpec {
        VersionSpec {
            repository: RepoLocator::parse("https://github.com/kubernetes/kubernetes").unwrap(),
            range: range(">=1.28.0 <1.29.0"),
            include_prereleases,
        }
    }

    #[tokio::test]
    async fn test_resolve_kubectl_scenario() {
        let source = kubectl_source();
        let versions = resolve(&source, &kubectl_spec(false)).await.unwrap();
        assert_eq!(versions, vec!["1.28.0", "1.28.1"]);
    }

    #[tokio::test]
    async fn test_resolve_with_prereleases() {
        let source = kubectl_source();
        let versions = resolve(&source, &kubectl_spec(true)).await.unwrap();
        assert_eq!(versions, vec!["1.28.0", "1.28.1", "1.29.0-rc.1"]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_repository() {
        let source = FakeSource::default();
        let err = resolve(&source, &kubectl_spec(false)).await.unwrap_err();
        assert!(matches!(err, MirrorError::SourceUnavailable { .. }), "{err}");
    }
}
