use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Root-level markdown files that are not considered orphaned
pub const ROOT_ALLOWED: &[&str] = &[
    "README.md",
    "CHANGELOG.md",
    "CONTRIBUTING.md",
    "CODE_OF_CONDUCT.md",
    "LICENSE.md",
    "AGENTS.md",
    "GEMINI.md",
];

/// Line count above which a document is reported as large
pub const LARGE_FILE_LINES: usize = 1000;

/// Directory-derived category of a documentation file.
///
/// Categorisation looks at the first two path components of the relative
/// path against a fixed map; anything else is `Other`, and files directly
/// under the project root are `Root`.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocCategory {
    #[serde(rename = "specs/features")]
    SpecsFeatures,
    #[serde(rename = "specs/design")]
    SpecsDesign,
    #[serde(rename = "specs/tasks")]
    SpecsTasks,
    #[serde(rename = "specs/governance")]
    SpecsGovernance,
    #[serde(rename = "docs")]
    Docs,
    #[serde(rename = "agent-docs/sessions")]
    AgentDocsSessions,
    #[serde(rename = "agent-docs/execution")]
    AgentDocsExecution,
    #[serde(rename = "agent-docs/feedback")]
    AgentDocsFeedback,
    #[serde(rename = "agent-docs/research")]
    AgentDocsResearch,
    #[serde(rename = "root")]
    Root,
    #[serde(rename = "other")]
    Other,
}

impl DocCategory {
    /// Categorise a normalised relative path (forward slashes)
    pub fn for_path(relative_path: &str) -> Self {
        let parts: Vec<&str> = relative_path.split('/').collect();
        if parts.len() == 1 {
            return DocCategory::Root;
        }
        match (parts[0], parts.get(1).copied()) {
            ("specs", Some("features")) => DocCategory::SpecsFeatures,
            ("specs", Some("design")) => DocCategory::SpecsDesign,
            ("specs", Some("tasks")) => DocCategory::SpecsTasks,
            ("specs", Some("governance")) => DocCategory::SpecsGovernance,
            ("docs", _) => DocCategory::Docs,
            ("agent-docs", Some("sessions")) => DocCategory::AgentDocsSessions,
            ("agent-docs", Some("execution")) => DocCategory::AgentDocsExecution,
            ("agent-docs", Some("feedback")) => DocCategory::AgentDocsFeedback,
            ("agent-docs", Some("research")) => DocCategory::AgentDocsResearch,
            _ => DocCategory::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocCategory::SpecsFeatures => "specs/features",
            DocCategory::SpecsDesign => "specs/design",
            DocCategory::SpecsTasks => "specs/tasks",
            DocCategory::SpecsGovernance => "specs/governance",
            DocCategory::Docs => "docs",
            DocCategory::AgentDocsSessions => "agent-docs/sessions",
            DocCategory::AgentDocsExecution => "agent-docs/execution",
            DocCategory::AgentDocsFeedback => "agent-docs/feedback",
            DocCategory::AgentDocsResearch => "agent-docs/research",
            DocCategory::Root => "root",
            DocCategory::Other => "other",
        }
    }
}

/// Metadata for one scanned markdown file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocEntry {
    /// Path relative to the scan root, '/'-separated
    pub relative_path: String,
    pub size_bytes: u64,
    pub line_count: usize,
    pub has_frontmatter: bool,
    /// Top-level frontmatter field names, when present
    #[serde(default)]
    pub frontmatter_fields: BTreeSet<String>,
    pub category: DocCategory,
    /// Root-level file outside the allowed set
    pub orphaned: bool,
}

/// Result of a documentation scan. Entries are ordered by relative path.
///
/// Invariant: each `relative_path` is unique. `timed_out` marks a partial
/// result produced when the scan exceeded its wall-clock budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocInventory {
    pub entries: Vec<DocEntry>,
    pub total: usize,
    pub scanned_at: DateTime<Utc>,
    pub timed_out: bool,
}

impl DocInventory {
    pub fn new(entries: Vec<DocEntry>, timed_out: bool) -> Self {
        let total = entries.len();
        Self {
            entries,
            total,
            scanned_at: Utc::now(),
            timed_out,
        }
    }

    /// Paths of files without frontmatter
    pub fn missing_metadata(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.has_frontmatter)
            .map(|e| e.relative_path.as_str())
            .collect()
    }

    /// Paths of orphaned root-level files
    pub fn orphaned(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.orphaned)
            .map(|e| e.relative_path.as_str())
            .collect()
    }

    /// Files above the large-file threshold, with their line counts
    pub fn large_files(&self) -> Vec<(&str, usize)> {
        self.entries
            .iter()
            .filter(|e| e.line_count > LARGE_FILE_LINES)
            .map(|e| (e.relative_path.as_str(), e.line_count))
            .collect()
    }

    /// Entries grouped by category, skipping empty groups
    pub fn by_location(&self) -> BTreeMap<DocCategory, Vec<&DocEntry>> {
        let mut groups: BTreeMap<DocCategory, Vec<&DocEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.category).or_default().push(entry);
        }
        groups
    }

    /// Human-readable improvement suggestions derived from the scan
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        let missing = self.missing_metadata().len();
        if missing > 0 {
            recommendations.push(format!(
                "{missing} documents missing YAML frontmatter metadata"
            ));
        }
        let orphaned = self.orphaned().len();
        if orphaned > 0 {
            recommendations.push(format!(
                "{orphaned} orphaned documents in the root directory; consider moving them into a subdirectory"
            ));
        }
        let large = self.large_files().len();
        if large > 0 {
            recommendations.push(format!(
                "{large} documents exceed {LARGE_FILE_LINES} lines; consider splitting them"
            ));
        }
        let locations = self.by_location();
        if !locations.contains_key(&DocCategory::SpecsFeatures) {
            recommendations
                .push("No specs/features directory found; create it for feature specs".to_string());
        }
        if !locations.contains_key(&DocCategory::Docs) {
            recommendations
                .push("No docs directory found; create it for user-facing documentation".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Documentation structure looks good".to_string());
        }
        recommendations
    }
}

/// Link validation summary for a documentation tree
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkReport {
    pub total: usize,
    pub valid: usize,
    /// (source file, target, anchor) for each unresolved relative link
    pub broken: Vec<BrokenLink>,
    pub external: usize,
}

/// One broken relative link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokenLink {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, has_frontmatter: bool, line_count: usize) -> DocEntry {
        let category = DocCategory::for_path(path);
        DocEntry {
            relative_path: path.to_string(),
            size_bytes: 100,
            line_count,
            has_frontmatter,
            frontmatter_fields: BTreeSet::new(),
            category,
            orphaned: category == DocCategory::Root && !ROOT_ALLOWED.contains(&path),
        }
    }

    #[test]
    fn test_categorisation_by_first_two_components() {
        assert_eq!(DocCategory::for_path("README.md"), DocCategory::Root);
        assert_eq!(
            DocCategory::for_path("specs/features/x.md"),
            DocCategory::SpecsFeatures
        );
        assert_eq!(DocCategory::for_path("docs/guide.md"), DocCategory::Docs);
        assert_eq!(DocCategory::for_path("docs/deep/guide.md"), DocCategory::Docs);
        assert_eq!(
            DocCategory::for_path("agent-docs/sessions/a.md"),
            DocCategory::AgentDocsSessions
        );
        assert_eq!(DocCategory::for_path("src/notes.md"), DocCategory::Other);
        assert_eq!(DocCategory::for_path("specs/unknown/x.md"), DocCategory::Other);
    }

    #[test]
    fn test_inventory_derived_reports() {
        let inventory = DocInventory::new(
            vec![
                entry("README.md", true, 50),
                entry("RESUMEN-FOO.md", false, 10),
                entry("specs/features/x.md", true, 1500),
            ],
            false,
        );

        assert_eq!(inventory.total, 3);
        assert_eq!(inventory.missing_metadata(), vec!["RESUMEN-FOO.md"]);
        assert_eq!(inventory.orphaned(), vec!["RESUMEN-FOO.md"]);
        assert_eq!(inventory.large_files(), vec![("specs/features/x.md", 1500)]);

        let locations = inventory.by_location();
        assert!(locations.contains_key(&DocCategory::SpecsFeatures));
        assert_eq!(locations[&DocCategory::Root].len(), 2);
    }

    #[test]
    fn test_recommendations_mention_gaps() {
        let inventory = DocInventory::new(vec![entry("NOTES.md", false, 10)], false);
        let recommendations = inventory.recommendations();
        assert!(recommendations.iter().any(|r| r.contains("frontmatter")));
        assert!(recommendations.iter().any(|r| r.contains("orphaned")));
        assert!(recommendations.iter().any(|r| r.contains("specs/features")));
    }

    #[test]
    fn test_clean_tree_recommendation() {
        let inventory = DocInventory::new(
            vec![
                entry("specs/features/a.md", true, 10),
                entry("docs/b.md", true, 10),
            ],
            false,
        );
        assert_eq!(
            inventory.recommendations(),
            vec!["Documentation structure looks good".to_string()]
        );
    }
}
