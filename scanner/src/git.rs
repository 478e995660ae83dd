use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use cde_core::error::{CdeError, Result};

use crate::ScannerConfig;

/// Commit-message keywords that mark architectural decisions
const ARCH_KEYWORDS: &[&str] = &[
    "refactor",
    "migrate",
    "redesign",
    "restructure",
    "architecture",
];

/// Field separator used in the custom `git log` pretty format
const FIELD_SEP: char = '\u{1f}';
/// Record separator marking the start of each commit line
const RECORD_SEP: char = '\u{1e}';

/// One summarised commit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub short_hash: String,
    pub author: String,
    pub email: String,
    /// ISO-8601 author date
    pub date: String,
    /// First line of the commit message
    pub message: String,
    pub file_count: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// One contributor ranked by commit count; ties keep first-seen order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    pub name: String,
    pub email: String,
    pub commits: usize,
}

/// Commit activity level over the observation window
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyLabel {
    VeryActive,
    Moderate,
    Low,
    Unknown,
}

impl FrequencyLabel {
    /// Thresholds: > 20 very active, > 10 moderate, ≥ 1 low, else unknown
    pub fn for_commit_count(count: usize) -> Self {
        if count > 20 {
            FrequencyLabel::VeryActive
        } else if count > 10 {
            FrequencyLabel::Moderate
        } else if count >= 1 {
            FrequencyLabel::Low
        } else {
            FrequencyLabel::Unknown
        }
    }
}

/// Insights extracted from a Git repository over an observation window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitInsights {
    pub repo_path: PathBuf,
    pub age_days: i64,
    pub commit_history: Vec<Commit>,
    pub active_branches: Vec<String>,
    pub contributors: Vec<Contributor>,
    /// Files ranked by aggregate lines changed in the window
    pub hotspots: Vec<String>,
    /// Commits whose first line matches an architecture keyword
    pub arch_decisions: Vec<Commit>,
    pub frequency_label: FrequencyLabel,
    /// Set when a Git sub-command exceeded its budget; the result is partial
    pub timed_out: bool,
}

impl GitInsights {
    /// Empty insights for a directory that is not a Git repository
    pub fn empty(repo_path: PathBuf) -> Self {
        Self {
            repo_path,
            age_days: 0,
            commit_history: Vec::new(),
            active_branches: Vec::new(),
            contributors: Vec::new(),
            hotspots: Vec::new(),
            arch_decisions: Vec::new(),
            frequency_label: FrequencyLabel::Unknown,
            timed_out: false,
        }
    }
}

/// Analyse the Git history of the repository containing `root`, listing
/// local branches only.
pub fn analyse_git(root: &Path, window_days: i64, config: &ScannerConfig) -> Result<GitInsights> {
    analyse_git_with_branches(root, window_days, false, config)
}

/// Analyse the Git history of the repository containing `root`.
///
/// Runs local `git` sub-commands, each bounded by the configured
/// per-command budget. A missing repository or missing `git` binary yields
/// empty insights rather than an error; a sub-command that exceeds its
/// budget yields a partial result tagged `timed_out`.
/// `include_all_branches` extends the branch listing to remote-tracking
/// branches.
pub fn analyse_git_with_branches(
    root: &Path,
    window_days: i64,
    include_all_branches: bool,
    config: &ScannerConfig,
) -> Result<GitInsights> {
    let repo_path = match find_git_root(root) {
        Some(path) => path,
        None => {
            debug!(root = %root.display(), "Not a Git repository");
            return Ok(GitInsights::empty(root.to_path_buf()));
        }
    };

    let mut insights = GitInsights::empty(repo_path.clone());
    let budget = config.git_command_timeout;

    // Single log pass covers history, contributors, hotspots, and frequency
    let since = (Utc::now() - ChronoDuration::days(window_days)).to_rfc3339();
    let format = format!(
        "--pretty=format:{RECORD_SEP}%h{FIELD_SEP}%an{FIELD_SEP}%ae{FIELD_SEP}%aI{FIELD_SEP}%s"
    );
    let max_count = format!("--max-count={}", config.git_max_commits);
    let since_arg = format!("--since={since}");
    match run_git(
        &repo_path,
        &["log", &max_count, &since_arg, "--numstat", &format],
        budget,
    ) {
        Ok(output) => {
            let (commits, churn) = parse_log_with_numstat(&output);
            insights.frequency_label = FrequencyLabel::for_commit_count(commits.len());
            insights.contributors =
                rank_contributors(&commits[..commits.len().min(config.contributor_commit_cap)]);
            insights.hotspots = rank_hotspots(&churn, config.hotspot_count);
            let recent: Vec<Commit> = commits
                .into_iter()
                .take(config.recent_commit_cap)
                .collect();
            insights.arch_decisions = recent
                .iter()
                .filter(|c| {
                    let folded = c.message.to_lowercase();
                    ARCH_KEYWORDS.iter().any(|kw| folded.contains(kw))
                })
                .cloned()
                .collect();
            insights.commit_history = recent;
        }
        Err(GitCommandError::Timeout) => {
            insights.timed_out = true;
        }
        Err(GitCommandError::Failed(message)) => {
            warn!(error = %message, "git log failed; returning empty history");
        }
    }

    // Branches
    let mut branch_args = vec!["branch", "--format=%(refname:short)"];
    if include_all_branches {
        branch_args.push("--all");
    }
    match run_git(&repo_path, &branch_args, budget) {
        Ok(output) => {
            insights.active_branches = output
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .take(10)
                .collect();
        }
        Err(GitCommandError::Timeout) => insights.timed_out = true,
        Err(GitCommandError::Failed(message)) => {
            warn!(error = %message, "git branch failed");
        }
    }

    // Repository age from the root commit
    match run_git(&repo_path, &["rev-list", "--max-parents=0", "HEAD"], budget) {
        Ok(output) => {
            if let Some(root_hash) = output.lines().last().map(str::trim).filter(|h| !h.is_empty())
            {
                match run_git(&repo_path, &["show", "-s", "--format=%aI", root_hash], budget) {
                    Ok(date_output) => {
                        if let Some(first) = date_output.lines().next() {
                            if let Ok(date) = DateTime::parse_from_rfc3339(first.trim()) {
                                insights.age_days =
                                    (Utc::now() - date.with_timezone(&Utc)).num_days().max(0);
                            }
                        }
                    }
                    Err(GitCommandError::Timeout) => insights.timed_out = true,
                    Err(GitCommandError::Failed(_)) => {}
                }
            }
        }
        Err(GitCommandError::Timeout) => insights.timed_out = true,
        Err(GitCommandError::Failed(_)) => {}
    }

    Ok(insights)
}

/// Walk up from `start` to find the directory containing `.git`
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

enum GitCommandError {
    Timeout,
    Failed(String),
}

/// Run one `git` sub-command with a wall-clock budget.
///
/// Stdout is drained on a separate thread so large outputs cannot deadlock
/// the pipe; the child is killed when the budget elapses.
fn run_git(
    repo: &Path,
    args: &[&str],
    budget: Duration,
) -> std::result::Result<String, GitCommandError> {
    let mut child = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GitCommandError::Failed(format!("failed to spawn git: {e}")))?;

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let reader = std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stdout.read_to_end(&mut buffer);
        buffer
    });

    let deadline = Instant::now() + budget;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let buffer = reader.join().unwrap_or_default();
                if status.success() {
                    return Ok(String::from_utf8_lossy(&buffer).into_owned());
                }
                return Err(GitCommandError::Failed(format!(
                    "git {} exited with {status}",
                    args.first().unwrap_or(&"")
                )));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(command = ?args, "git sub-command exceeded its budget");
                    return Err(GitCommandError::Timeout);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(GitCommandError::Failed(format!("wait failed: {e}")));
            }
        }
    }
}

/// Parse `git log --numstat` output with the custom record format.
/// Returns commits in log order plus the per-file churn accumulator.
fn parse_log_with_numstat(output: &str) -> (Vec<Commit>, HashMap<String, usize>) {
    let mut commits: Vec<Commit> = Vec::new();
    let mut churn: HashMap<String, usize> = HashMap::new();

    for line in output.lines() {
        if let Some(record) = line.strip_prefix(RECORD_SEP) {
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            if fields.len() == 5 {
                commits.push(Commit {
                    short_hash: fields[0].to_string(),
                    author: fields[1].to_string(),
                    email: fields[2].to_string(),
                    date: fields[3].to_string(),
                    message: fields[4].to_string(),
                    file_count: 0,
                    insertions: 0,
                    deletions: 0,
                });
            }
        } else if !line.trim().is_empty() {
            // numstat line: "<insertions>\t<deletions>\t<path>"
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            if parts.len() == 3 {
                // Binary files report "-"; count them as zero churn
                let insertions = parts[0].parse::<usize>().unwrap_or(0);
                let deletions = parts[1].parse::<usize>().unwrap_or(0);
                if let Some(commit) = commits.last_mut() {
                    commit.file_count += 1;
                    commit.insertions += insertions;
                    commit.deletions += deletions;
                }
                *churn.entry(parts[2].to_string()).or_insert(0) += insertions + deletions;
            }
        }
    }

    (commits, churn)
}

/// Rank contributors by commit count; ties keep first-seen order
fn rank_contributors(commits: &[Commit]) -> Vec<Contributor> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for commit in commits {
        if !counts.contains_key(&commit.author) {
            order.push((commit.author.clone(), commit.email.clone()));
        }
        *counts.entry(commit.author.clone()).or_insert(0) += 1;
    }
    let mut contributors: Vec<Contributor> = order
        .into_iter()
        .map(|(name, email)| {
            let commits = counts[&name];
            Contributor {
                name,
                email,
                commits,
            }
        })
        .collect();
    // Stable sort keeps first-seen order on equal counts
    contributors.sort_by(|a, b| b.commits.cmp(&a.commits));
    contributors
}

/// Top-N files by aggregate churn; ties break by path
fn rank_hotspots(churn: &HashMap<String, usize>, count: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &usize)> = churn.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().take(count).map(|(p, _)| p.clone()).collect()
}
