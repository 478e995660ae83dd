use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Instant;

use threadpool::ThreadPool;
use tracing::{debug, warn};

use cde_core::error::{CdeError, Result};

use crate::frontmatter::{self, FRONTMATTER_PROBE_BYTES};
use crate::inventory::{DocCategory, DocEntry, DocInventory, ROOT_ALLOWED};
use crate::ScannerConfig;

/// Scan the markdown documentation under `root` using the parallel worker
/// pool.
///
/// Files are enumerated, sorted by relative path, and parsed by a fixed-size
/// pool; results land in a pre-sized vector so the output order is
/// deterministic regardless of completion order. The scan stops at the
/// configured wall-clock budget and returns a partial inventory tagged
/// `timed_out` instead of failing.
pub fn scan_documentation(root: &Path, config: &ScannerConfig) -> Result<DocInventory> {
    let files = enumerate_markdown(root, config)?;
    if files.is_empty() {
        return Ok(DocInventory::new(Vec::new(), false));
    }

    let pool = ThreadPool::new(config.worker_count.max(1));
    let (tx, rx) = mpsc::channel::<(usize, Option<DocEntry>)>();

    for (index, (absolute, relative)) in files.iter().cloned().enumerate() {
        let tx = tx.clone();
        pool.execute(move || {
            let entry = parse_entry(&absolute, &relative);
            // Receiver may be gone after a timeout; nothing to do then
            let _ = tx.send((index, entry));
        });
    }
    drop(tx);

    let deadline = Instant::now() + config.doc_timeout;
    let mut slots: Vec<Option<DocEntry>> = vec![None; files.len()];
    let mut received = 0usize;
    let mut timed_out = false;

    while received < files.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok((index, entry)) => {
                slots[index] = entry;
                received += 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if timed_out {
        warn!(
            scanned = received,
            total = files.len(),
            "Documentation scan exceeded its budget; returning partial inventory"
        );
    }

    let entries: Vec<DocEntry> = slots.into_iter().flatten().collect();
    Ok(DocInventory::new(entries, timed_out))
}

/// Pure single-threaded fallback producing results identical to
/// [`scan_documentation`]: same ordering, counts, and categorisation.
pub fn scan_documentation_serial(root: &Path, config: &ScannerConfig) -> Result<DocInventory> {
    let files = enumerate_markdown(root, config)?;
    let deadline = Instant::now() + config.doc_timeout;
    let mut entries = Vec::with_capacity(files.len());
    let mut timed_out = false;

    for (absolute, relative) in &files {
        if Instant::now() >= deadline {
            timed_out = true;
            break;
        }
        if let Some(entry) = parse_entry(absolute, relative) {
            entries.push(entry);
        }
    }

    Ok(DocInventory::new(entries, timed_out))
}

/// Enumerate `*.md` files under `root`, skipping the configured ignore
/// directories. Returns `(absolute, relative)` pairs sorted by the
/// '/'-normalised relative path.
pub fn enumerate_markdown(
    root: &Path,
    config: &ScannerConfig,
) -> Result<Vec<(PathBuf, String)>> {
    if !root.exists() {
        return Err(CdeError::Validation(format!(
            "Project path does not exist: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if !config.ignore_dirs.iter().any(|ignored| ignored == &name) {
                    stack.push(path);
                }
            } else if name.to_ascii_lowercase().ends_with(".md") {
                if let Ok(relative) = path.strip_prefix(root) {
                    let normalised = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push((path.clone(), normalised));
                }
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    debug!(count = files.len(), root = %root.display(), "Enumerated markdown files");
    Ok(files)
}

/// Parse one markdown file into a [`DocEntry`].
///
/// Only the first [`FRONTMATTER_PROBE_BYTES`] are buffered; the rest of the
/// file is streamed for the line count. Read failures are swallowed with a
/// warning so one bad file never fails the scan.
fn parse_entry(absolute: &Path, relative: &str) -> Option<DocEntry> {
    let size_bytes = match std::fs::metadata(absolute) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!(file = relative, error = %e, "Skipping unreadable file");
            return None;
        }
    };

    let file = match File::open(absolute) {
        Ok(file) => file,
        Err(e) => {
            warn!(file = relative, error = %e, "Skipping unreadable file");
            return None;
        }
    };
    let mut reader = BufReader::new(file);

    let mut prefix = vec![0u8; FRONTMATTER_PROBE_BYTES];
    let mut filled = 0usize;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                warn!(file = relative, error = %e, "Skipping unreadable file");
                return None;
            }
        }
    }
    prefix.truncate(filled);

    let probe = frontmatter::probe(&prefix);

    // Line count: newlines in the prefix plus the streamed remainder
    let mut newlines = prefix.iter().filter(|b| **b == b'\n').count();
    let mut last_byte = prefix.last().copied();
    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(file = relative, error = %e, "Skipping unreadable file");
                return None;
            }
        };
        if chunk.is_empty() {
            break;
        }
        newlines += chunk.iter().filter(|b| **b == b'\n').count();
        last_byte = chunk.last().copied();
        let consumed = chunk.len();
        reader.consume(consumed);
    }
    let line_count = match last_byte {
        None => 0,
        Some(b'\n') => newlines,
        Some(_) => newlines + 1,
    };

    let category = DocCategory::for_path(relative);
    let orphaned = category == DocCategory::Root && !ROOT_ALLOWED.contains(&relative);

    Some(DocEntry {
        relative_path: relative.to_string(),
        size_bytes,
        line_count,
        has_frontmatter: probe.present,
        frontmatter_fields: probe.fields,
        category,
        orphaned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(
            root.join("README.md"),
            "---\ntitle: Readme\n---\n# Project\n",
        )
        .unwrap();
        fs::write(root.join("RESUMEN-FOO.md"), "no frontmatter here\n").unwrap();
        fs::create_dir_all(root.join("specs/features")).unwrap();
        fs::write(root.join("specs/features/x.md"), "---\nid: x\n---\nbody\n").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/ignored.md"), "ignored\n").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD.md"), "ignored\n").unwrap();
        dir
    }

    #[test]
    fn test_scan_matches_expected_inventory() {
        let dir = fixture_tree();
        let config = ScannerConfig::default();
        let inventory = scan_documentation(dir.path(), &config).unwrap();

        assert_eq!(inventory.total, 3);
        assert!(!inventory.timed_out);
        assert_eq!(inventory.orphaned(), vec!["RESUMEN-FOO.md"]);
        assert_eq!(inventory.missing_metadata(), vec!["RESUMEN-FOO.md"]);

        let locations = inventory.by_location();
        assert_eq!(
            locations[&DocCategory::SpecsFeatures][0].relative_path,
            "specs/features/x.md"
        );
    }

    #[test]
    fn test_entries_sorted_by_relative_path() {
        let dir = fixture_tree();
        let inventory = scan_documentation(dir.path(), &ScannerConfig::default()).unwrap();
        let paths: Vec<&str> = inventory
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_serial_and_parallel_paths_agree() {
        let dir = fixture_tree();
        let config = ScannerConfig::default();
        let parallel = scan_documentation(dir.path(), &config).unwrap();
        let serial = scan_documentation_serial(dir.path(), &config).unwrap();
        assert_eq!(parallel.entries, serial.entries);
        assert_eq!(parallel.total, serial.total);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let err =
            scan_documentation(Path::new("/nonexistent/cde-test"), &ScannerConfig::default())
                .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_line_counts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "one\ntwo\nthree").unwrap();
        fs::write(dir.path().join("b.md"), "one\ntwo\n").unwrap();
        fs::write(dir.path().join("c.md"), "").unwrap();
        let inventory = scan_documentation(dir.path(), &ScannerConfig::default()).unwrap();
        let by_path: std::collections::BTreeMap<&str, usize> = inventory
            .entries
            .iter()
            .map(|e| (e.relative_path.as_str(), e.line_count))
            .collect();
        assert_eq!(by_path["a.md"], 3);
        assert_eq!(by_path["b.md"], 2);
        assert_eq!(by_path["c.md"], 0);
    }
}
