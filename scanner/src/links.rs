use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use tracing::warn;

use cde_core::error::Result;

use crate::docs::enumerate_markdown;
use crate::inventory::{BrokenLink, LinkReport};
use crate::ScannerConfig;

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Inline markdown links: [text](target)
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").expect("static regex"))
}

/// Validate the markdown links of every document under `root`.
///
/// External links (http/https/mailto) are counted but never fetched.
/// Relative targets are resolved against the source file's directory and
/// must exist under the project root; anything else lands in `broken` with
/// its anchor, when one was given.
pub fn analyse_links(root: &Path, config: &ScannerConfig) -> Result<LinkReport> {
    let files = enumerate_markdown(root, config)?;
    let mut report = LinkReport::default();

    for (absolute, relative) in &files {
        let content = match std::fs::read_to_string(absolute) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = relative, error = %e, "Skipping unreadable file in link scan");
                continue;
            }
        };

        for capture in link_regex().captures_iter(&content) {
            let target = &capture[1];
            report.total += 1;

            if target.starts_with("http://")
                || target.starts_with("https://")
                || target.starts_with("mailto:")
            {
                report.external += 1;
                continue;
            }

            // In-page anchors always resolve
            if target.starts_with('#') {
                report.valid += 1;
                continue;
            }

            let (path_part, anchor) = match target.split_once('#') {
                Some((p, a)) => (p, Some(a.to_string())),
                None => (target, None),
            };

            let source_dir = absolute.parent().unwrap_or(root);
            let resolved = source_dir.join(path_part);
            let inside_root = resolved
                .canonicalize()
                .map(|c| c.starts_with(root.canonicalize().unwrap_or_else(|_| root.to_path_buf())))
                .unwrap_or(false);

            if inside_root {
                report.valid += 1;
            } else {
                report.broken.push(BrokenLink {
                    source: relative.clone(),
                    target: path_part.to_string(),
                    anchor,
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_link_classification() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/guide.md"), "target\n").unwrap();
        fs::write(
            root.join("README.md"),
            "[guide](docs/guide.md)\n\
             [missing](docs/nope.md#setup)\n\
             [site](https://example.com)\n\
             [anchor](#section)\n",
        )
        .unwrap();

        let report = analyse_links(root, &ScannerConfig::default()).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.valid, 2);
        assert_eq!(report.external, 1);
        assert_eq!(report.broken.len(), 1);
        assert_eq!(report.broken[0].source, "README.md");
        assert_eq!(report.broken[0].target, "docs/nope.md");
        assert_eq!(report.broken[0].anchor.as_deref(), Some("setup"));
    }

    #[test]
    fn test_escaping_links_are_broken() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "[out](../outside.md)\n").unwrap();
        let report = analyse_links(dir.path(), &ScannerConfig::default()).unwrap();
        assert_eq!(report.broken.len(), 1);
    }

    #[test]
    fn test_relative_links_resolve_from_source_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/a.md"), "[sibling](b.md)\n").unwrap();
        fs::write(root.join("docs/b.md"), "x\n").unwrap();
        let report = analyse_links(root, &ScannerConfig::default()).unwrap();
        assert_eq!(report.valid, 1);
        assert!(report.broken.is_empty());
    }
}
