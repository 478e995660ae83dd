use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use cde_core::error::Result;

use crate::ScannerConfig;

/// Known extension → language pairs for the shallow histogram
const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("py", "Python"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("go", "Go"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("cs", "C#"),
    ("c", "C"),
    ("h", "C"),
    ("cpp", "C++"),
    ("hpp", "C++"),
    ("swift", "Swift"),
    ("sh", "Shell"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("md", "Markdown"),
    ("yml", "YAML"),
    ("yaml", "YAML"),
    ("toml", "TOML"),
    ("json", "JSON"),
];

/// Count source files per language under `root`, respecting the scanner's
/// ignore directories. Unknown extensions are skipped.
pub fn language_histogram(root: &Path, config: &ScannerConfig) -> Result<BTreeMap<String, usize>> {
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if !config.ignore_dirs.iter().any(|ignored| ignored == &name) {
                    stack.push(path);
                }
            } else if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
                let folded = extension.to_ascii_lowercase();
                if let Some((_, language)) =
                    LANGUAGE_TABLE.iter().find(|(ext, _)| *ext == folded)
                {
                    *histogram.entry(language.to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    Ok(histogram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_histogram_counts_and_ignores() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("lib.rs"), "\n").unwrap();
        fs::write(root.join("app.py"), "\n").unwrap();
        fs::write(root.join("notes.txt"), "\n").unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::write(root.join("node_modules/dep.js"), "\n").unwrap();

        let histogram = language_histogram(root, &ScannerConfig::default()).unwrap();
        assert_eq!(histogram["Rust"], 2);
        assert_eq!(histogram["Python"], 1);
        assert!(!histogram.contains_key("JavaScript"));
    }
}
