use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use cde_core::classifier::{Complexity, Domain};
use cde_core::error::{CdeError, Result};

/// A reusable skill document: a domain/complexity/tag tuple plus a
/// markdown body. Ephemeral skills carry an expiry and become invisible to
/// readers once it passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub name: String,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Skill {
    /// Whether the skill is currently visible
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| expiry > now).unwrap_or(true)
    }
}

/// What a task needs from the skill store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillRequirement {
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Filesystem-backed skill store.
///
/// Skills live as individual JSON files; writes publish through a
/// temporary file and atomic rename so concurrent readers always see a
/// complete document. Expired ephemeral skills are filtered on every read
/// and are never returned.
pub struct SkillStore {
    dir: PathBuf,
}

impl SkillStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn skill_file(&self, name: &str) -> PathBuf {
        let sanitised: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{sanitised}.json"))
    }

    /// Persist a skill, replacing any prior version
    pub fn save(&self, skill: &Skill) -> Result<()> {
        if skill.name.trim().is_empty() {
            return Err(CdeError::empty_field("name"));
        }
        fs::create_dir_all(&self.dir).map_err(|e| CdeError::io(&e))?;
        let serialised =
            serde_json::to_string_pretty(skill).map_err(|e| CdeError::Internal(e.to_string()))?;
        let target = self.skill_file(&skill.name);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, serialised).map_err(|e| CdeError::io(&e))?;
        fs::rename(&tmp, &target).map_err(|e| CdeError::io(&e))?;
        debug!(skill = %skill.name, "Skill saved");
        Ok(())
    }

    /// All live skills, sorted by name
    pub fn list(&self) -> Result<Vec<Skill>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut skills = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| CdeError::io(&e))?.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<Skill>(&raw).ok())
                {
                    Some(skill) if skill.is_live(now) => skills.push(skill),
                    Some(_) => debug!(file = %path.display(), "Skipping expired skill"),
                    None => warn!(file = %path.display(), "Skipping unreadable skill file"),
                }
            }
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    /// Look up one live skill by name
    pub fn get(&self, name: &str) -> Result<Option<Skill>> {
        Ok(self.list()?.into_iter().find(|s| s.name == name))
    }

    /// Best matches for a requirement: domain match required, then ranked
    /// by tag overlap descending, name ascending.
    pub fn find(&self, requirement: &SkillRequirement) -> Result<Vec<Skill>> {
        let mut matches: Vec<(usize, Skill)> = self
            .list()?
            .into_iter()
            .filter(|skill| skill.domain == requirement.domain)
            .filter(|skill| match (requirement.complexity, skill.complexity) {
                (Some(required), Some(offered)) => offered >= required,
                _ => true,
            })
            .map(|skill| {
                let overlap = skill.tags.intersection(&requirement.tags).count();
                (overlap, skill)
            })
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.name.cmp(&b.1.name)));
        Ok(matches.into_iter().map(|(_, skill)| skill).collect())
    }

    /// Delete expired ephemeral skill files; returns how many were removed
    pub fn prune_expired(&self) -> Result<usize> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(|e| CdeError::io(&e))?.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let expired = fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<Skill>(&raw).ok())
                    .map(|skill| !skill.is_live(now))
                    .unwrap_or(false);
                if expired {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(file = %path.display(), error = %e, "Failed to prune skill");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn skill(name: &str, domain: Domain, tags: &[&str]) -> Skill {
        Skill {
            name: name.to_string(),
            domain,
            complexity: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            body: format!("# {name}\n"),
            expires_at: None,
        }
    }

    #[test]
    fn test_save_and_list() {
        let dir = TempDir::new().unwrap();
        let store = SkillStore::new(dir.path().to_path_buf());
        store.save(&skill("sql-optimization", Domain::Database, &["sql"])).unwrap();
        store.save(&skill("caching", Domain::Performance, &["cache"])).unwrap();

        let skills = store.list().unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "caching");
    }

    #[test]
    fn test_expired_skills_are_invisible() {
        let dir = TempDir::new().unwrap();
        let store = SkillStore::new(dir.path().to_path_buf());

        let mut ephemeral = skill("temp-skill", Domain::General, &[]);
        ephemeral.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
        store.save(&ephemeral).unwrap();

        let mut live = skill("live-skill", Domain::General, &[]);
        live.expires_at = Some(Utc::now() + ChronoDuration::hours(1));
        store.save(&live).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["live-skill"]);
        assert!(store.get("temp-skill").unwrap().is_none());

        assert_eq!(store.prune_expired().unwrap(), 1);
    }

    #[test]
    fn test_find_ranks_by_tag_overlap() {
        let dir = TempDir::new().unwrap();
        let store = SkillStore::new(dir.path().to_path_buf());
        store.save(&skill("a", Domain::Database, &["sql", "schema"])).unwrap();
        store.save(&skill("b", Domain::Database, &["sql"])).unwrap();
        store.save(&skill("c", Domain::WebDev, &["sql"])).unwrap();

        let requirement = SkillRequirement {
            domain: Domain::Database,
            complexity: None,
            tags: ["sql", "schema"].iter().map(|t| t.to_string()).collect(),
        };
        let found = store.find(&requirement).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "a");
        assert_eq!(found[1].name, "b");
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SkillStore::new(dir.path().to_path_buf());
        assert!(store.save(&skill("", Domain::General, &[])).is_err());
    }
}
