//! Project Context Scanner
//!
//! Parallel filesystem walker producing documentation inventories and Git
//! history insights, plus the context enricher that composes them with
//! framework signatures into a [`context::ProjectContext`].
//!
//! Two concurrency notes apply throughout:
//!
//! - Scans run data-parallel on a fixed-size worker pool and collect into
//!   pre-sized vectors, so result order is deterministic (sorted relative
//!   path, commit order).
//! - Every scan carries a hard wall-clock budget; exceeding it returns a
//!   partial result tagged `timed_out` rather than an error.
//!
//! A pure single-threaded path ([`docs::scan_documentation_serial`])
//! produces results identical to the pooled implementation and serves as
//! the fallback when the pool cannot be used.

pub mod context;
pub mod docs;
pub mod frameworks;
pub mod frontmatter;
pub mod git;
pub mod inventory;
pub mod languages;
pub mod links;
pub mod synthesis;

pub use context::{ContextEnricher, ProjectContext};
pub use docs::{scan_documentation, scan_documentation_serial};
pub use git::{
    analyse_git, analyse_git_with_branches, Commit, Contributor, FrequencyLabel, GitInsights,
};
pub use inventory::{DocCategory, DocEntry, DocInventory, LinkReport};
pub use links::analyse_links;

use std::time::Duration;

/// Scanner tuning knobs; defaults follow the orchestrator configuration
/// record.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Worker pool size for data-parallel scans
    pub worker_count: usize,
    /// Wall-clock budget for a documentation scan
    pub doc_timeout: Duration,
    /// Wall-clock budget per Git sub-command
    pub git_command_timeout: Duration,
    /// Maximum commits fetched from `git log`
    pub git_max_commits: usize,
    /// Cap on commits kept in `commit_history`
    pub recent_commit_cap: usize,
    /// Cap on commits examined for contributor stats
    pub contributor_commit_cap: usize,
    /// Number of hotspot files reported
    pub hotspot_count: usize,
    /// Directory names excluded from every walk
    pub ignore_dirs: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            doc_timeout: Duration::from_secs(30),
            git_command_timeout: Duration::from_secs(10),
            git_max_commits: 1000,
            recent_commit_cap: 100,
            contributor_commit_cap: 200,
            hotspot_count: 10,
            ignore_dirs: [
                ".git",
                ".venv",
                "venv",
                "node_modules",
                "__pycache__",
                ".pytest_cache",
                "target",
                ".cache",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.doc_timeout, Duration::from_secs(30));
        assert!(config.ignore_dirs.iter().any(|d| d == ".git"));
        assert!(config.ignore_dirs.iter().any(|d| d == "node_modules"));
    }
}
