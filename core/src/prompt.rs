use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{CdeError, Result};

/// Placeholder keys accepted by default. Callers may narrow or extend this
/// set, but a template is only accepted when every placeholder it contains
/// is in the active whitelist.
pub const DEFAULT_WHITELIST: &[&str] = &[
    "USER_PROMPT",
    "PROJECT_NAME",
    "PROJECT_CONTEXT",
    "FEATURE_ID",
    "PHASE_ID",
    "BRANCH",
    "SPECIFICATION",
    "ACCEPTANCE_CRITERIA",
    "TASKS",
    "DEPENDENCIES",
    "TECHNICAL_DESIGN",
    "FILE_CHANGES",
    "CODE_CHANGES",
    "FILES_MODIFIED",
    "TEST_FILES",
    "TEST_RESULTS",
    "REVIEW_NOTES",
    "APPROVAL_STATUS",
];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").expect("static regex"))
}

/// The whitelist placeholder key for an artifact type
/// (`code_changes` → `CODE_CHANGES`).
pub fn placeholder_for_artifact(artifact_type: &str) -> String {
    artifact_type.to_ascii_uppercase()
}

/// A UTF-8 prompt template with `{{UPPER_SNAKE_CASE}}` placeholders.
///
/// Substituted values are HTML-escaped before insertion to keep injected
/// markup out of downstream renderers.
///
/// # Examples
///
/// ```rust
/// use std::collections::BTreeMap;
/// use cde_core::prompt::PromptTemplate;
///
/// let template = PromptTemplate::new("Task: {{USER_PROMPT}}");
/// let mut values = BTreeMap::new();
/// values.insert("USER_PROMPT".to_string(), "fix <b>bold</b> bug".to_string());
/// let rendered = template.render_with_defaults(&values).unwrap();
/// assert_eq!(rendered, "Task: fix &lt;b&gt;bold&lt;/b&gt; bug");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    body: String,
}

impl PromptTemplate {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// The distinct placeholder keys the template references, in order of
    /// first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for capture in placeholder_regex().captures_iter(&self.body) {
            let name = capture[1].to_string();
            if seen.insert(name.clone()) {
                ordered.push(name);
            }
        }
        ordered
    }

    /// Render against the default whitelist
    pub fn render_with_defaults(&self, values: &BTreeMap<String, String>) -> Result<String> {
        self.render(values, DEFAULT_WHITELIST)
    }

    /// Render the template.
    ///
    /// Fails `PromptValidation` when a placeholder is outside `whitelist`
    /// or has no value in `values`. Unused values are ignored.
    pub fn render(
        &self,
        values: &BTreeMap<String, String>,
        whitelist: &[&str],
    ) -> Result<String> {
        let placeholders = self.placeholders();

        let rejected: Vec<&String> = placeholders
            .iter()
            .filter(|p| !whitelist.contains(&p.as_str()))
            .collect();
        if !rejected.is_empty() {
            return Err(CdeError::PromptValidation(format!(
                "Placeholders not in whitelist: {rejected:?}"
            )));
        }

        let unresolved: Vec<&String> = placeholders
            .iter()
            .filter(|p| !values.contains_key(p.as_str()))
            .collect();
        if !unresolved.is_empty() {
            return Err(CdeError::PromptValidation(format!(
                "Unresolved placeholders: {unresolved:?}"
            )));
        }

        let rendered = placeholder_regex().replace_all(&self.body, |caps: &regex::Captures| {
            let value = values.get(&caps[1]).expect("checked above");
            html_escape(value)
        });
        Ok(rendered.into_owned())
    }
}

/// Escape HTML-significant characters in a substituted value
pub fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}
