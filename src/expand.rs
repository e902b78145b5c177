//! Expansion of binary entries into concrete download targets.

use crate::error::MirrorError;
use crate::template::{evaluate_condition, Context, Template};
use crate::types::{BinaryEntry, TargetSpec};
use tracing::debug;

/// A fully rendered target, ready for syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedTarget {
    pub context: Context,
    pub url: String,
    /// `None` when the target declares no checksum.
    pub checksum_url: Option<String>,
    /// Object key the artifact is stored under.
    pub destination: String,
}

/// What one combination of the matrix expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// The target's condition did not render `true`.
    Excluded(Context),
    Target(ExpandedTarget),
}

/// Lazily expands `entry` over the resolved `versions`.
///
/// Iteration is nested target → version → os → arch → bin, each in
/// declaration order. A render failure is yielded as an error for that
/// combination only; the caller decides whether to stop.
pub fn expand<'a>(
    entry: &'a BinaryEntry,
    versions: &'a [String],
) -> impl Iterator<Item = Result<Expansion, MirrorError>> + 'a {
    entry.targets.iter().flat_map(move |target| {
        versions.iter().flat_map(move |version| {
            entry.os.iter().flat_map(move |os| {
                entry.arch.iter().flat_map(move |arch| {
                    entry.bins.iter().map(move |bin| {
                        let ctx = Context::new(
                            &entry.name,
                            version,
                            os,
                            arch,
                            bin,
                            &entry.versions.repository.url,
                        );
                        expand_one(entry, target, ctx)
                    })
                })
            })
        })
    })
}

/// Number of combinations [`expand`] will visit, excluded ones included.
pub fn combination_count(entry: &BinaryEntry, versions: &[String]) -> u64 {
    [
        entry.targets.len(),
        versions.len(),
        entry.os.len(),
        entry.arch.len(),
        entry.bins.len(),
    ]
    .iter()
    .map(|n| *n as u64)
    .product()
}

fn expand_one(
    entry: &BinaryEntry,
    target: &TargetSpec,
    ctx: Context,
) -> Result<Expansion, MirrorError> {
    if let Some(condition) = &target.condition {
        let included = evaluate_condition(condition, &ctx)
            .map_err(|source| template_error(entry, "condition", condition, source))?;
        if !included {
            debug!("Condition excluded {}", ctx);
            return Ok(Expansion::Excluded(ctx));
        }
    }

    let url = render(entry, "url", &target.url, &ctx)?;
    let checksum_url = target
        .checksum
        .as_ref()
        .map(|tpl| render(entry, "checksum", tpl, &ctx))
        .transpose()?;
    let destination = render(entry, "destination", &target.destination, &ctx)?;

    Ok(Expansion::Target(ExpandedTarget {
        context: ctx,
        url,
        checksum_url,
        destination,
    }))
}

fn render(
    entry: &BinaryEntry,
    field: &'static str,
    template: &Template,
    ctx: &Context,
) -> Result<String, MirrorError> {
    template
        .render(ctx)
        .map_err(|source| template_error(entry, field, template, source))
}

fn template_error(
    entry: &BinaryEntry,
    field: &'static str,
    template: &Template,
    source: crate::template::TemplateError,
) -> MirrorError {
    MirrorError::Template {
        binary: entry.name.clone(),
        field,
        template: template.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entry, target};

    fn versions(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn destinations(entry: &BinaryEntry, versions: &[String]) -> Vec<String> {
        expand(entry, versions)
            .filter_map(|e| match e.unwrap() {
                Expansion::Target(t) => Some(t.destination),
                Expansion::Excluded(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_nested_order() {
        let mut entry = entry("tool", &["linux", "darwin"], &["amd64", "arm64"]);
        entry.bins = vec!["a".to_string(), "b".to_string()];
        entry.targets = vec![
            target("https://x/{{.bin}}", "t1/{{.version}}/{{.os}}/{{.arch}}/{{.bin}}"),
            target("https://y/{{.bin}}", "t2/{{.version}}/{{.os}}/{{.arch}}/{{.bin}}"),
        ];
        let got = destinations(&entry, &versions(&["v1", "v2"]));

        assert_eq!(got.len(), 2 * 2 * 2 * 2 * 2);
        assert_eq!(
            &got[..5],
            &[
                "t1/v1/linux/amd64/a",
                "t1/v1/linux/amd64/b",
                "t1/v1/linux/arm64/a",
                "t1/v1/linux/arm64/b",
                "t1/v1/darwin/amd64/a",
            ]
        );
        assert_eq!(got[8], "t1/v2/linux/amd64/a");
        assert_eq!(got[16], "t2/v1/linux/amd64/a");
        assert_eq!(got[31], "t2/v2/darwin/arm64/b");
        assert_eq!(combination_count(&entry, &versions(&["v1", "v2"])), 32);
    }

    #[test]
    fn test_renders_all_fields() {
        let mut entry = entry("kubectl", &["linux"], &["amd64"]);
        entry.targets[0].checksum =
            Some(Template::parse("https://dl/{{.version}}/{{.bin}}.sha256").unwrap());
        let got: Vec<_> = expand(&entry, &versions(&["v1.28.0"])).collect();
        let [Ok(Expansion::Target(t))] = got.as_slice() else {
            panic!("unexpected expansion: {got:?}");
        };
        assert_eq!(t.url, "https://dl/v1.28.0/linux/amd64/kubectl");
        assert_eq!(t.checksum_url.as_deref(), Some("https://dl/v1.28.0/kubectl.sha256"));
        assert_eq!(t.destination, "kubectl/v1.28.0/linux/amd64/kubectl");
        assert_eq!(t.context.get(crate::template::Field::Github), "https://github.com/acme/kubectl");
    }

    #[test]
    fn test_condition_excludes_without_stopping_siblings() {
        let mut entry = entry("tool", &["linux", "windows", "darwin"], &["amd64"]);
        entry.targets[0].condition = Some(Template::parse(r#"{{ ne .os "windows" }}"#).unwrap());
        let all: Vec<_> = expand(&entry, &versions(&["v1"]))
            .map(Result::unwrap)
            .collect();

        assert_eq!(all.len(), 3);
        assert!(matches!(&all[1], Expansion::Excluded(ctx) if ctx.os() == "windows"));
        assert_eq!(
            destinations(&entry, &versions(&["v1"])),
            vec!["tool/v1/linux/amd64/tool", "tool/v1/darwin/amd64/tool"]
        );
    }

    #[test]
    fn test_non_true_condition_output_excludes() {
        let mut entry = entry("tool", &["linux"], &["amd64"]);
        entry.targets[0].condition = Some(Template::parse("{{ .os }}").unwrap());
        assert!(destinations(&entry, &versions(&["v1"])).is_empty());
    }

    #[test]
    fn test_render_failure_is_reported() {
        let mut entry = entry("tool", &["linux"], &["amd64"]);
        entry.targets[0].url = Template::parse("{{ shell .os }}").unwrap();
        let first = expand(&entry, &versions(&["v1"])).next().unwrap();
        match first {
            Err(MirrorError::Template { field, .. }) => assert_eq!(field, "url"),
            other => panic!("expected template error, got {other:?}"),
        }
    }

    #[test]
    fn test_no_versions_yields_nothing() {
        let entry = entry("tool", &["linux"], &["amd64"]);
        assert_eq!(expand(&entry, &[]).count(), 0);
    }
}
