use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cde_core::circuit_breaker::BreakerRegistry;
use cde_core::error::{CdeError, Result};

/// Recipe directory name inside a project's state directory
pub const RECIPE_SUBDIR: &str = "recipes";

/// Description length cap taken from a recipe's role field
const DESCRIPTION_CHARS: usize = 200;

/// HTTP timeout for recipe fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum redirect hops followed
const MAX_REDIRECTS: usize = 3;

/// Remote source of recipe files: raw-content URLs of the form
/// `<base>/<branch>/<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSource {
    pub base_url: String,
    pub branch: String,
}

impl RecipeSource {
    /// Source for a GitHub repository in `owner/name` form
    pub fn github(repo: &str, branch: &str) -> Self {
        Self {
            base_url: format!("https://raw.githubusercontent.com/{repo}"),
            branch: branch.to_string(),
        }
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.branch, path)
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown-host".to_string())
    }
}

impl Default for RecipeSource {
    fn default() -> Self {
        Self::github("iberi22/agents-flows-recipes", "main")
    }
}

/// Built-in manifest of files fetched by `ensure_recipes`
pub const RECIPE_MANIFEST: &[(&str, &str)] = &[
    (
        "recipes/engineering/ai-engineer.md",
        "recipes/engineering/ai-engineer.md",
    ),
    (
        "recipes/engineering/backend-architect.md",
        "recipes/engineering/backend-architect.md",
    ),
    (
        "recipes/engineering/test-writer-fixer.md",
        "recipes/engineering/test-writer-fixer.md",
    ),
    (
        "recipes/product/sprint-prioritizer.md",
        "recipes/product/sprint-prioritizer.md",
    ),
    (
        "recipes/writing/documentation-writer.md",
        "recipes/writing/documentation-writer.md",
    ),
    (
        "recipes/research/deep-research.md",
        "recipes/research/deep-research.md",
    ),
    ("workflow.yml", "workflow.yml"),
];

/// Per-file outcome of a manifest fetch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileOutcome {
    pub destination: String,
    pub outcome: FetchOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    Downloaded,
    Skipped,
    Failed,
}

/// Result of `ensure_recipes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestResult {
    pub status: ManifestStatus,
    pub files: Vec<FileOutcome>,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Success,
    Skipped,
    Partial,
}

/// Coordination topology a recipe describes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    #[default]
    Solo,
    Multi,
}

/// One parsed recipe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeEntry {
    pub id: String,
    pub category: String,
    pub topology: Topology,
    pub tools: BTreeSet<String>,
    pub providers: BTreeMap<String, BTreeMap<String, Value>>,
    /// First sentence of the role field, capped at 200 chars
    pub description: String,
    pub body: String,
    pub local_path: PathBuf,
}

/// Frontmatter fields a recipe may carry; all optional
#[derive(Debug, Default, Deserialize)]
struct RecipeHeader {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    topology: Option<String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    providers: Option<BTreeMap<String, BTreeMap<String, Value>>>,
}

/// On-disk shape of a cached remote index
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    timestamp: DateTime<Utc>,
    body: String,
}

/// Local recipe cache with remote fetch, TTL-guarded index cache, and a
/// circuit breaker per `(host, endpoint-class)`.
///
/// Writes publish through a temporary file plus atomic rename, so readers
/// always see either the prior complete file or the new one.
pub struct RecipeStore {
    state_dir_name: String,
    cache_ttl: Duration,
    client: reqwest::Client,
    breakers: Arc<BreakerRegistry>,
}

impl RecipeStore {
    pub fn new(
        state_dir_name: String,
        cache_ttl: Duration,
        breakers: Arc<BreakerRegistry>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CdeError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            state_dir_name,
            cache_ttl,
            client,
            breakers,
        })
    }

    /// The recipe directory for a project
    pub fn recipe_dir(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.state_dir_name)
    }

    /// Whether the project already has a recipe directory with content
    pub fn check_recipes(&self, project_path: &Path) -> bool {
        self.recipe_dir(project_path).join(RECIPE_SUBDIR).is_dir()
    }

    /// Fetch every manifest file into `<recipe_dir>/<destination>`.
    ///
    /// Skips the fetch entirely when the directory already exists unless
    /// `force` is set. A transient failure on one file is recorded and the
    /// remaining files still download; the overall status is then
    /// `partial`.
    pub async fn ensure_recipes(
        &self,
        project_path: &Path,
        source: &RecipeSource,
        force: bool,
    ) -> Result<ManifestResult> {
        let destination = self.recipe_dir(project_path);
        if self.check_recipes(project_path) && !force {
            return Ok(ManifestResult {
                status: ManifestStatus::Skipped,
                files: Vec::new(),
                destination,
            });
        }

        let breaker_key = (source.host(), "recipes".to_string());
        let mut files = Vec::with_capacity(RECIPE_MANIFEST.len());
        let mut failures = 0usize;

        for (source_path, dest_path) in RECIPE_MANIFEST {
            if let Err(e) = self.breakers.check(&breaker_key) {
                files.push(FileOutcome {
                    destination: dest_path.to_string(),
                    outcome: FetchOutcome::Failed,
                    reason: Some(e.to_string()),
                });
                failures += 1;
                continue;
            }

            match self.fetch_file(source, source_path).await {
                Ok(body) => {
                    self.breakers.record_success(&breaker_key);
                    let target = destination.join(dest_path);
                    if let Err(e) = write_atomic(&target, body.as_bytes()) {
                        warn!(file = dest_path, error = %e, "Failed to write recipe file");
                        files.push(FileOutcome {
                            destination: dest_path.to_string(),
                            outcome: FetchOutcome::Failed,
                            reason: Some(e.to_string()),
                        });
                        failures += 1;
                    } else {
                        files.push(FileOutcome {
                            destination: dest_path.to_string(),
                            outcome: FetchOutcome::Downloaded,
                            reason: None,
                        });
                    }
                }
                Err(e) => {
                    self.breakers.record_failure(&breaker_key);
                    warn!(file = source_path, error = %e, "Recipe fetch failed; continuing");
                    files.push(FileOutcome {
                        destination: dest_path.to_string(),
                        outcome: FetchOutcome::Failed,
                        reason: Some(e.to_string()),
                    });
                    failures += 1;
                }
            }
        }

        let status = if failures == 0 {
            ManifestStatus::Success
        } else {
            ManifestStatus::Partial
        };
        info!(
            downloaded = files.len() - failures,
            failed = failures,
            destination = %destination.display(),
            "Recipe manifest processed"
        );
        Ok(ManifestResult {
            status,
            files,
            destination,
        })
    }

    async fn fetch_file(&self, source: &RecipeSource, path: &str) -> Result<String> {
        let url = source.file_url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CdeError::Unavailable(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(CdeError::Unavailable(format!(
                "GET {url}: HTTP {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| CdeError::Unavailable(format!("Reading {url}: {e}")))
    }

    /// Return the cached index body for `repo_key` when it is younger than
    /// the TTL, or unconditionally with `ignore_ttl`. A stale or missing
    /// entry yields `None`.
    pub fn get_cached_index(
        &self,
        cache_dir: &Path,
        repo_key: &str,
        ignore_ttl: bool,
    ) -> Result<Option<String>> {
        let file = cache_dir.join(cache_file_name(repo_key));
        if !file.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&file).map_err(|e| CdeError::io(&e))?;
        let record: CacheRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Discarding unreadable cache entry");
                return Ok(None);
            }
        };
        let age = Utc::now().signed_duration_since(record.timestamp);
        let fresh = age
            .to_std()
            .map(|age| age < self.cache_ttl)
            .unwrap_or(true);
        if fresh || ignore_ttl {
            Ok(Some(record.body))
        } else {
            Ok(None)
        }
    }

    /// Persist an index body for `repo_key` with the current timestamp
    pub fn save_cached_index(&self, cache_dir: &Path, repo_key: &str, body: &str) -> Result<()> {
        let record = CacheRecord {
            timestamp: Utc::now(),
            body: body.to_string(),
        };
        let serialised =
            serde_json::to_string(&record).map_err(|e| CdeError::Internal(e.to_string()))?;
        write_atomic(&cache_dir.join(cache_file_name(repo_key)), serialised.as_bytes())
    }

    /// Parse every recipe under the project's recipe directory
    pub fn load_recipes(&self, project_path: &Path) -> Result<Vec<RecipeEntry>> {
        let recipes_dir = self.recipe_dir(project_path).join(RECIPE_SUBDIR);
        if !recipes_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut stack = vec![recipes_dir.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).map_err(|e| CdeError::io(&e))?.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path
                    .extension()
                    .map(|e| e == "md" || e == "poml")
                    .unwrap_or(false)
                {
                    match fs::read_to_string(&path) {
                        Ok(text) => entries.push(parse_recipe(&text, &path, &recipes_dir)),
                        Err(e) => {
                            warn!(file = %path.display(), error = %e, "Skipping unreadable recipe")
                        }
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Look up one recipe by id
    pub fn get_recipe(&self, project_path: &Path, recipe_id: &str) -> Result<RecipeEntry> {
        self.load_recipes(project_path)?
            .into_iter()
            .find(|r| r.id == recipe_id)
            .ok_or_else(|| CdeError::recipe_not_found(recipe_id))
    }
}

/// Parse one recipe file. Missing `tools`/`providers`/`topology` fields
/// produce an entry with defaults; a malformed header degrades to an empty
/// one rather than failing.
fn parse_recipe(text: &str, path: &Path, recipes_dir: &Path) -> RecipeEntry {
    let (header, body) = split_frontmatter(text);
    let header: RecipeHeader = header
        .and_then(|h| serde_yaml::from_str(h).ok())
        .unwrap_or_default();

    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recipe".to_string());
    let category = path
        .parent()
        .and_then(|p| p.strip_prefix(recipes_dir).ok())
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".to_string());

    let topology = match header.topology.as_deref() {
        Some("multi") => Topology::Multi,
        _ => Topology::Solo,
    };

    let description = header
        .role
        .as_deref()
        .map(first_sentence)
        .unwrap_or_default();

    RecipeEntry {
        id,
        category,
        topology,
        tools: header.tools.unwrap_or_default().into_iter().collect(),
        providers: header.providers.unwrap_or_default(),
        description,
        body: body.to_string(),
        local_path: path.to_path_buf(),
    }
}

fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    if let Some(rest) = text.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            let header = &rest[..end];
            let body = rest[end + 4..].trim_start_matches('\n');
            return (Some(header), body);
        }
    }
    (None, text)
}

fn first_sentence(role: &str) -> String {
    let sentence = role
        .split_terminator(['.', '!', '?'])
        .next()
        .unwrap_or(role)
        .trim();
    sentence.chars().take(DESCRIPTION_CHARS).collect()
}

fn cache_file_name(repo_key: &str) -> String {
    let sanitised: String = repo_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{sanitised}.json")
}

/// Write a file through a sibling temporary and atomic rename
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| CdeError::Internal("target has no parent".to_string()))?;
    fs::create_dir_all(parent).map_err(|e| CdeError::io(&e))?;
    let tmp = target.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| CdeError::io(&e))?;
    fs::rename(&tmp, target).map_err(|e| CdeError::io(&e))?;
    Ok(())
}
