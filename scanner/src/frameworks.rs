use serde::{Deserialize, Serialize};
use std::path::Path;

use tracing::debug;

/// One framework signature: a framework is detected when a required
/// configuration file exists AND one of the content substrings matches, or
/// when the directory quorum is met.
struct FrameworkSignature {
    name: &'static str,
    files: &'static [&'static str],
    content_patterns: &'static [&'static str],
    dirs: &'static [&'static str],
}

const FRAMEWORK_SIGNATURES: &[FrameworkSignature] = &[
    FrameworkSignature {
        name: "FastAPI",
        files: &["requirements.txt", "pyproject.toml"],
        content_patterns: &["fastapi"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Django",
        files: &["requirements.txt", "pyproject.toml", "manage.py"],
        content_patterns: &["django"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Flask",
        files: &["requirements.txt", "pyproject.toml"],
        content_patterns: &["flask"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "FastMCP",
        files: &["pyproject.toml"],
        content_patterns: &["fastmcp", "mcp"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Next.js",
        files: &["next.config.js", "next.config.ts", "next.config.mjs"],
        content_patterns: &[],
        dirs: &["pages", "app"],
    },
    FrameworkSignature {
        name: "React",
        files: &["package.json"],
        content_patterns: &["react"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Vue",
        files: &["package.json", "vue.config.js"],
        content_patterns: &["vue"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Express",
        files: &["package.json"],
        content_patterns: &["express"],
        dirs: &[],
    },
    FrameworkSignature {
        name: "Axum",
        files: &["Cargo.toml"],
        content_patterns: &["axum"],
        dirs: &[],
    },
];

/// Architecture patterns detected by directory quorum
struct ArchitecturePattern {
    name: &'static str,
    dirs: &'static [&'static str],
}

const ARCHITECTURE_PATTERNS: &[ArchitecturePattern] = &[
    ArchitecturePattern {
        name: "hexagonal",
        dirs: &["domain", "application", "adapters", "infrastructure"],
    },
    ArchitecturePattern {
        name: "clean-architecture",
        dirs: &["entities", "use_cases", "gateways", "controllers"],
    },
    ArchitecturePattern {
        name: "mvc",
        dirs: &["models", "views", "controllers"],
    },
];

/// Framework and architecture detection result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameworkReport {
    pub frameworks: Vec<String>,
    /// First architecture pattern whose directory quorum is met, else "unknown"
    pub architecture_pattern: String,
    /// Inferred by priority: mcp-server > web-app > api > cli > library > unknown
    pub project_type: String,
}

/// Detect frameworks, the architecture pattern, and the project type.
///
/// Detection rule per framework: (i) a required configuration file exists
/// and a content substring matches, or (ii) at least ⌈dirs/2⌉ of the listed
/// directories exist.
pub fn detect(root: &Path) -> FrameworkReport {
    let mut frameworks = Vec::new();

    for signature in FRAMEWORK_SIGNATURES {
        let mut detected = false;

        for file in signature.files {
            let path = root.join(file);
            if !path.exists() {
                continue;
            }
            if signature.content_patterns.is_empty() {
                detected = true;
                break;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                let folded = content.to_lowercase();
                if signature
                    .content_patterns
                    .iter()
                    .any(|pattern| folded.contains(pattern))
                {
                    detected = true;
                    break;
                }
            }
        }

        if !detected && !signature.dirs.is_empty() {
            detected = dir_quorum_met(root, signature.dirs);
        }

        if detected {
            frameworks.push(signature.name.to_string());
        }
    }

    let architecture_pattern = detect_architecture(root);
    let project_type = infer_project_type(root, &frameworks);
    debug!(?frameworks, architecture = %architecture_pattern, project_type = %project_type, "Framework detection complete");

    FrameworkReport {
        frameworks,
        architecture_pattern,
        project_type,
    }
}

/// At least ⌈len/2⌉ of the listed directories must exist under `base`
fn dir_quorum_met(base: &Path, dirs: &[&str]) -> bool {
    let existing = dirs.iter().filter(|d| base.join(d).is_dir()).count();
    existing >= dirs.len().div_ceil(2)
}

fn detect_architecture(root: &Path) -> String {
    let src = root.join("src");
    let base = if src.is_dir() { src } else { root.to_path_buf() };
    for pattern in ARCHITECTURE_PATTERNS {
        if dir_quorum_met(&base, pattern.dirs) {
            return pattern.name.to_string();
        }
    }
    "unknown".to_string()
}

fn infer_project_type(root: &Path, frameworks: &[String]) -> String {
    let has = |name: &str| frameworks.iter().any(|f| f == name);

    if has("FastMCP") {
        return "mcp-server".to_string();
    }
    if has("Next.js") || has("React") || has("Vue") {
        return "web-app".to_string();
    }
    if has("FastAPI") || has("Django") || has("Flask") || has("Express") || has("Axum") {
        return "api".to_string();
    }
    if ["cli.py", "src/cli.py", "src/cli.rs", "src/main.rs"]
        .iter()
        .any(|p| root.join(p).exists())
    {
        return "cli".to_string();
    }
    if root.join("pyproject.toml").exists() || root.join("Cargo.toml").exists() {
        return "library".to_string();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_react_needs_file_and_content() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.0.0"}}"#,
        )
        .unwrap();
        let report = detect(dir.path());
        assert!(report.frameworks.contains(&"React".to_string()));
        assert_eq!(report.project_type, "web-app");
    }

    #[test]
    fn test_package_json_without_react_is_not_react() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"dependencies": {}}"#).unwrap();
        let report = detect(dir.path());
        assert!(!report.frameworks.contains(&"React".to_string()));
    }

    #[test]
    fn test_nextjs_detected_by_dir_quorum() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        let report = detect(dir.path());
        assert!(report.frameworks.contains(&"Next.js".to_string()));
    }

    #[test]
    fn test_mcp_server_has_top_priority() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\ndependencies = [\"fastmcp\", \"fastapi\"]\n",
        )
        .unwrap();
        let report = detect(dir.path());
        assert!(report.frameworks.contains(&"FastMCP".to_string()));
        assert!(report.frameworks.contains(&"FastAPI".to_string()));
        assert_eq!(report.project_type, "mcp-server");
    }

    #[test]
    fn test_hexagonal_architecture_quorum() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/domain")).unwrap();
        fs::create_dir_all(dir.path().join("src/application")).unwrap();
        let report = detect(dir.path());
        assert_eq!(report.architecture_pattern, "hexagonal");
    }

    #[test]
    fn test_unknown_everything() {
        let dir = TempDir::new().unwrap();
        let report = detect(dir.path());
        assert!(report.frameworks.is_empty());
        assert_eq!(report.architecture_pattern, "unknown");
        assert_eq!(report.project_type, "unknown");
    }

    #[test]
    fn test_rust_cli_type() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        let report = detect(dir.path());
        assert_eq!(report.project_type, "cli");
    }
}
