use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use cde_core::error::Result;

use crate::frameworks::{self, FrameworkReport};
use crate::git::{self, GitInsights};
use crate::languages;
use crate::synthesis::{self, DocSynthesis};
use crate::ScannerConfig;

/// Git window used when enriching project context
const CONTEXT_GIT_WINDOW_DAYS: i64 = 30;

/// Immutable snapshot of a project's shape, produced once per request and
/// handed to downstream agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectContext {
    pub root: PathBuf,
    /// Language → file count histogram
    pub languages: BTreeMap<String, usize>,
    pub frameworks: Vec<String>,
    pub architecture_pattern: String,
    pub project_type: String,
    pub synthesis: DocSynthesis,
    pub git: GitInsights,
    pub generated_at: DateTime<Utc>,
}

impl ProjectContext {
    /// A short prose summary suitable for prompt substitution
    pub fn summary(&self) -> String {
        let languages: Vec<String> = self
            .languages
            .iter()
            .map(|(language, count)| format!("{language} ({count})"))
            .collect();
        format!(
            "Project type: {}. Architecture: {}. Languages: {}. Frameworks: {}. \
             Git activity: {:?} with {} recent commits.",
            self.project_type,
            self.architecture_pattern,
            if languages.is_empty() {
                "none detected".to_string()
            } else {
                languages.join(", ")
            },
            if self.frameworks.is_empty() {
                "none detected".to_string()
            } else {
                self.frameworks.join(", ")
            },
            self.git.frequency_label,
            self.git.commit_history.len(),
        )
    }
}

/// Compose scanner outputs into a [`ProjectContext`].
///
/// Combines the shallow language histogram, framework signature matching,
/// documentation synthesis, and a 30-day Git window.
pub struct ContextEnricher;

impl ContextEnricher {
    pub fn enrich(root: &Path, config: &ScannerConfig) -> Result<ProjectContext> {
        let languages = languages::language_histogram(root, config)?;
        let FrameworkReport {
            frameworks,
            architecture_pattern,
            project_type,
        } = frameworks::detect(root);
        let synthesis = synthesis::synthesise(root);
        let git = git::analyse_git(root, CONTEXT_GIT_WINDOW_DAYS, config)?;

        info!(
            root = %root.display(),
            project_type = %project_type,
            frameworks = frameworks.len(),
            "Project context enriched"
        );

        Ok(ProjectContext {
            root: root.to_path_buf(),
            languages,
            frameworks,
            architecture_pattern,
            project_type,
            synthesis,
            git,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_enrich_minimal_rust_project() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(root.join("README.md"), "# Demo\nBuilt with Rust.\n").unwrap();

        let context = ContextEnricher::enrich(root, &ScannerConfig::default()).unwrap();
        assert_eq!(context.languages["Rust"], 1);
        assert_eq!(context.project_type, "cli");
        assert!(context.synthesis.tech_stack.contains(&"rust".to_string()));
        let summary = context.summary();
        assert!(summary.contains("cli"));
        assert!(summary.contains("Rust"));
    }
}
