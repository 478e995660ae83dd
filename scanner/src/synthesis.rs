use serde::{Deserialize, Serialize};
use std::path::Path;

/// Documents consulted for synthesis, in priority order
const SOURCE_DOCS: &[&str] = &["README.md", "CONTRIBUTING.md", "ARCHITECTURE.md"];

/// Dependency manifests scanned for tech-stack terms
const MANIFESTS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
];

/// Tech terms recognised in prose and manifests
const TECH_TERMS: &[&str] = &[
    "rust",
    "python",
    "typescript",
    "javascript",
    "react",
    "vue",
    "next.js",
    "fastapi",
    "django",
    "flask",
    "express",
    "axum",
    "tokio",
    "postgres",
    "sqlite",
    "mysql",
    "redis",
    "mongodb",
    "docker",
    "kubernetes",
    "graphql",
    "grpc",
    "terraform",
];

/// Command prefixes that mark build / test lines inside fenced code blocks
const BUILD_PREFIXES: &[&str] = &[
    "cargo build",
    "cargo run",
    "npm install",
    "npm run build",
    "yarn build",
    "make",
    "pip install",
    "poetry install",
    "go build",
];
const TEST_PREFIXES: &[&str] = &[
    "cargo test",
    "npm test",
    "npm run test",
    "yarn test",
    "pytest",
    "go test",
    "make test",
];

/// Prose and commands distilled from the project's own documentation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocSynthesis {
    /// Paragraphs found under architecture/design headings
    pub architecture_notes: Vec<String>,
    /// Distinct tech-stack terms, in discovery order
    pub tech_stack: Vec<String>,
    pub build_commands: Vec<String>,
    pub test_commands: Vec<String>,
    /// Bullet items found under convention/style headings
    pub conventions: Vec<String>,
}

/// Read README/CONTRIBUTING and dependency manifests for architecture
/// prose, tech terms, build/test command blocks, and convention bullets.
pub fn synthesise(root: &Path) -> DocSynthesis {
    let mut synthesis = DocSynthesis::default();

    for doc in SOURCE_DOCS {
        if let Ok(content) = std::fs::read_to_string(root.join(doc)) {
            extract_from_markdown(&content, &mut synthesis);
        }
    }

    for manifest in MANIFESTS {
        if let Ok(content) = std::fs::read_to_string(root.join(manifest)) {
            collect_tech_terms(&content, &mut synthesis.tech_stack);
        }
    }

    synthesis
}

fn extract_from_markdown(content: &str, synthesis: &mut DocSynthesis) {
    collect_tech_terms(content, &mut synthesis.tech_stack);

    let mut section = String::new();
    let mut in_code_block = false;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block {
            let folded = trimmed.to_lowercase();
            if TEST_PREFIXES.iter().any(|p| folded.starts_with(p)) {
                push_unique(&mut synthesis.test_commands, trimmed);
            } else if BUILD_PREFIXES.iter().any(|p| folded.starts_with(p)) {
                push_unique(&mut synthesis.build_commands, trimmed);
            }
            continue;
        }

        if trimmed.starts_with('#') {
            section = trimmed.trim_start_matches('#').trim().to_lowercase();
            continue;
        }

        let architecture_section =
            section.contains("architecture") || section.contains("design");
        let convention_section = section.contains("convention")
            || section.contains("style")
            || section.contains("guideline");

        if architecture_section && !trimmed.is_empty() && !trimmed.starts_with('-') {
            push_unique(&mut synthesis.architecture_notes, trimmed);
        }
        if convention_section && (trimmed.starts_with('-') || trimmed.starts_with('*')) {
            push_unique(
                &mut synthesis.conventions,
                trimmed.trim_start_matches(['-', '*']).trim(),
            );
        }
    }
}

fn collect_tech_terms(content: &str, stack: &mut Vec<String>) {
    let folded = content.to_lowercase();
    for term in TECH_TERMS {
        if folded.contains(term) && !stack.iter().any(|t| t == term) {
            stack.push(term.to_string());
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
