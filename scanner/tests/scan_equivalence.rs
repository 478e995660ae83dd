//! Equivalence between the pooled and pure documentation scan paths.
//!
//! For any directory tree, both paths must report the same set of relative
//! paths with the same per-file frontmatter flag, line count, and category.

use std::fs;
use std::path::Path;

use scanner::{scan_documentation, scan_documentation_serial, ScannerConfig};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn assert_paths_agree(root: &Path) {
    let config = ScannerConfig::default();
    let parallel = scan_documentation(root, &config).unwrap();
    let serial = scan_documentation_serial(root, &config).unwrap();

    assert_eq!(parallel.total, serial.total);
    assert_eq!(parallel.entries, serial.entries);
    assert_eq!(parallel.missing_metadata(), serial.missing_metadata());
    assert_eq!(parallel.orphaned(), serial.orphaned());
    assert_eq!(
        parallel.by_location().keys().collect::<Vec<_>>(),
        serial.by_location().keys().collect::<Vec<_>>()
    );
}

#[test]
fn empty_tree() {
    let dir = TempDir::new().unwrap();
    assert_paths_agree(dir.path());
}

#[test]
fn standard_layout() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "README.md", "---\ntitle: root\n---\nhello\n");
    write(root, "CHANGELOG.md", "changes\n");
    write(root, "STRAY-NOTES.md", "stray\n");
    write(root, "docs/guide.md", "---\naudience: users\n---\nguide\n");
    write(root, "docs/nested/deep.md", "deep\n");
    write(root, "specs/features/login.md", "---\nid: f1\nstatus: draft\n---\nspec\n");
    write(root, "specs/design/db.md", "design\n");
    write(root, "agent-docs/sessions/s1.md", "session\n");
    write(root, "agent-docs/research/r1.md", "research\n");
    write(root, "src/module/notes.md", "notes\n");
    assert_paths_agree(root);
}

#[test]
fn tree_with_ignored_directories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "README.md", "hello\n");
    write(root, "node_modules/pkg/readme.md", "ignored\n");
    write(root, ".git/description.md", "ignored\n");
    write(root, "target/doc/out.md", "ignored\n");
    assert_paths_agree(root);

    let inventory =
        scan_documentation(root, &ScannerConfig::default()).unwrap();
    assert_eq!(inventory.total, 1);
}

#[test]
fn many_small_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for i in 0..120 {
        let frontmatter = if i % 3 == 0 { "---\nid: x\n---\n" } else { "" };
        write(
            root,
            &format!("docs/section{}/file{:03}.md", i % 7, i),
            &format!("{frontmatter}line one\nline two for file {i}\n"),
        );
    }
    assert_paths_agree(root);

    let inventory = scan_documentation(root, &ScannerConfig::default()).unwrap();
    assert_eq!(inventory.total, 120);
    // Sorted, unique relative paths
    let mut paths: Vec<&str> = inventory
        .entries
        .iter()
        .map(|e| e.relative_path.as_str())
        .collect();
    let original = paths.clone();
    paths.sort();
    paths.dedup();
    assert_eq!(paths, original);
}

#[test]
fn frontmatter_fields_agree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "docs/meta.md",
        "---\ntitle: T\nauthor: A\ntags:\n  - one\n---\nbody\n",
    );
    let config = ScannerConfig::default();
    let parallel = scan_documentation(root, &config).unwrap();
    let serial = scan_documentation_serial(root, &config).unwrap();
    assert_eq!(
        parallel.entries[0].frontmatter_fields,
        serial.entries[0].frontmatter_fields
    );
    assert_eq!(parallel.entries[0].frontmatter_fields.len(), 3);
}
