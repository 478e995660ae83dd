use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use cde_core::error::{CdeError, Result};
use cde_core::models::Project;
use cde_core::validation::InputValidator;

use crate::migration;

/// Default name of the per-project state directory
pub const DEFAULT_STATE_DIR: &str = ".cde";

/// Default number of rotating backups retained
pub const DEFAULT_BACKUP_LIMIT: usize = 10;

/// Atomic, per-project JSON state store.
///
/// Layout under each project root:
///
/// ```text
/// <project>/<state-dir>/state.json
/// <project>/<state-dir>/backups/state_<UTC-timestamp>.json
/// ```
///
/// Saves write a sibling temporary file, fsync it, copy the previous file
/// into the rotating backup directory, then atomically rename over the
/// target. A failed write therefore always leaves the prior file intact.
/// Saves take an advisory per-project lock for their full duration.
///
/// # Examples
///
/// ```rust,no_run
/// use store::state::StateStore;
///
/// let store = StateStore::new(".cde".to_string(), 10);
/// let mut project = store.get_or_create("/abs/project".as_ref(), None).unwrap();
/// project.start_feature("Add search".into(), "standard".into()).unwrap();
/// store.save(&mut project).unwrap();
/// ```
pub struct StateStore {
    state_dir_name: String,
    backup_limit: usize,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl StateStore {
    pub fn new(state_dir_name: String, backup_limit: usize) -> Self {
        Self {
            state_dir_name,
            backup_limit,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Path of a project's state file
    pub fn state_file(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.state_dir_name).join("state.json")
    }

    fn backup_dir(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.state_dir_name).join("backups")
    }

    fn lock_for(&self, project_path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("state lock table poisoned");
        locks
            .entry(project_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the project at `path`, creating a fresh one when no state file
    /// exists. Fails `CorruptState` when the file exists but cannot be
    /// parsed even after migration.
    pub fn get_or_create(&self, path: &Path, name: Option<String>) -> Result<Project> {
        InputValidator::validate_project_path(path)?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        match self.load(&canonical)? {
            Some(project) => Ok(project),
            None => {
                info!(path = %canonical.display(), "Creating new project state");
                Ok(Project::new(&canonical, name))
            }
        }
    }

    /// Load the project at `path`; `None` when no state file exists
    pub fn get_by_path(&self, path: &Path) -> Result<Option<Project>> {
        InputValidator::validate_project_path(path)?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.load(&canonical)
    }

    fn load(&self, project_path: &Path) -> Result<Option<Project>> {
        let file = self.state_file(project_path);
        if !file.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&file).map_err(|e| CdeError::io(&e))?;
        let mut document: Value = serde_json::from_str(&raw)
            .map_err(|e| CdeError::CorruptState(format!("State file is not valid JSON: {e}")))?;
        migration::migrate(&mut document);

        let project: Project = serde_json::from_value(document).map_err(|e| {
            CdeError::CorruptState(format!("State file failed schema migration: {e}"))
        })?;
        project
            .check_invariants()
            .map_err(|e| CdeError::CorruptState(e.to_string()))?;
        debug!(path = %project_path.display(), features = project.features.len(), "Loaded project state");
        Ok(Some(project))
    }

    /// Persist the project.
    ///
    /// Timestamps are refreshed conditionally: a feature's `updated_at`
    /// moves only when its serialised form differs from the previous save,
    /// and the project's `updated_at` moves only when anything changed.
    pub fn save(&self, project: &mut Project) -> Result<()> {
        let lock = self.lock_for(&project.path);
        let _guard = lock.lock().expect("project lock poisoned");

        let target = self.state_file(&project.path);
        let previous = self.load_raw(&target)?;

        let now = Utc::now();
        match &previous {
            Some(previous_doc) => {
                let previous_features = indexed_features(previous_doc);
                for feature in &mut project.features {
                    let current = serde_json::to_value(&*feature)
                        .map_err(|e| CdeError::Internal(e.to_string()))?;
                    match previous_features.get(&feature.id.to_string()) {
                        Some(prior) if *prior == current => {}
                        Some(_) => feature.updated_at = now,
                        None => {}
                    }
                }
                let current_doc = serde_json::to_value(&*project)
                    .map_err(|e| CdeError::Internal(e.to_string()))?;
                if &current_doc != previous_doc {
                    project.updated_at = now;
                }
            }
            None => project.updated_at = now,
        }

        let serialised = serde_json::to_string_pretty(project)
            .map_err(|e| CdeError::Internal(e.to_string()))?;

        let state_dir = target.parent().expect("state file has a parent");
        fs::create_dir_all(state_dir).map_err(|e| CdeError::io(&e))?;

        // Write the sibling temporary file and fsync before publishing
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| CdeError::io(&e))?;
            file.write_all(serialised.as_bytes())
                .map_err(|e| CdeError::io(&e))?;
            file.sync_all().map_err(|e| CdeError::io(&e))?;
        }

        if target.exists() {
            self.create_backup(&project.path, &target)?;
        }

        fs::rename(&tmp, &target).map_err(|e| CdeError::io(&e))?;
        debug!(path = %project.path.display(), "Project state saved");
        Ok(())
    }

    /// Remove the state file; `NotFound` when it does not exist
    pub fn delete_by_path(&self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let file = self.state_file(&canonical);
        if !file.exists() {
            return Err(CdeError::project_not_found(canonical.display()));
        }
        fs::remove_file(&file).map_err(|e| CdeError::io(&e))?;
        info!(path = %canonical.display(), "Project state deleted");
        Ok(())
    }

    /// Paths of the retained backups, newest first
    pub fn list_backups(&self, project_path: &Path) -> Result<Vec<PathBuf>> {
        let dir = self.backup_dir(project_path);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut backups: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| CdeError::io(&e))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("state_") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    fn load_raw(&self, target: &Path) -> Result<Option<Value>> {
        if !target.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(target).map_err(|e| CdeError::io(&e))?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(mut document) => {
                migration::migrate(&mut document);
                Ok(Some(document))
            }
            // A corrupt prior file must not block a save; the backup keeps it
            Err(_) => Ok(None),
        }
    }

    fn create_backup(&self, project_path: &Path, target: &Path) -> Result<()> {
        let dir = self.backup_dir(project_path);
        fs::create_dir_all(&dir).map_err(|e| CdeError::io(&e))?;
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let backup = dir.join(format!("state_{timestamp}.json"));
        fs::copy(target, &backup).map_err(|e| CdeError::io(&e))?;
        self.rotate_backups(project_path)?;
        Ok(())
    }

    fn rotate_backups(&self, project_path: &Path) -> Result<()> {
        let backups = self.list_backups(project_path)?;
        for stale in backups.iter().skip(self.backup_limit) {
            if let Err(e) = fs::remove_file(stale) {
                warn!(backup = %stale.display(), error = %e, "Failed to remove old backup");
            }
        }
        Ok(())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR.to_string(), DEFAULT_BACKUP_LIMIT)
    }
}

/// Index a raw document's features by their id string
fn indexed_features(document: &Value) -> HashMap<String, Value> {
    let mut index = HashMap::new();
    if let Some(features) = document.get("features").and_then(|f| f.as_array()) {
        for feature in features {
            if let Some(id) = feature.get("id").and_then(|i| i.as_str()) {
                index.insert(id.to_string(), feature.clone());
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use cde_core::models::FeatureStatus;
    use tempfile::TempDir;

    fn store() -> StateStore {
        StateStore::default()
    }

    #[test]
    fn test_get_or_create_synthesises_new_project() {
        let dir = TempDir::new().unwrap();
        let project = store()
            .get_or_create(dir.path(), Some("demo".to_string()))
            .unwrap();
        assert_eq!(project.name, "demo");
        assert!(project.features.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let state_store = store();
        let mut project = state_store.get_or_create(dir.path(), None).unwrap();
        project
            .start_feature("Add search".to_string(), "standard".to_string())
            .unwrap();
        state_store.save(&mut project).unwrap();

        let loaded = state_store.get_by_path(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.id, project.id);
        assert_eq!(loaded.features.len(), 1);
        assert_eq!(loaded.features[0].prompt, "Add search");
        assert!(loaded.created_at <= loaded.updated_at);
    }

    #[test]
    fn test_get_by_path_none_when_missing() {
        let dir = TempDir::new().unwrap();
        assert!(store().get_by_path(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = store()
            .get_or_create(Path::new("relative/project"), None)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_corrupt_file_fails_with_backup_intact() {
        let dir = TempDir::new().unwrap();
        let state_store = store();
        let mut project = state_store.get_or_create(dir.path(), None).unwrap();
        state_store.save(&mut project).unwrap();
        state_store.save(&mut project).unwrap(); // creates a backup

        // Truncate the trailing brace
        let file = state_store.state_file(&project.path);
        let mut content = fs::read_to_string(&file).unwrap();
        content.pop();
        fs::write(&file, &content).unwrap();

        let err = state_store.get_by_path(dir.path()).unwrap_err();
        assert_eq!(err.code(), "E201");

        // The newest backup is still a valid serialisation
        let backups = state_store.list_backups(&project.path).unwrap();
        assert!(!backups.is_empty());
        let backup_raw = fs::read_to_string(&backups[0]).unwrap();
        assert!(serde_json::from_str::<Value>(&backup_raw).is_ok());
    }

    #[test]
    fn test_backup_rotation_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let state_store = StateStore::new(DEFAULT_STATE_DIR.to_string(), 3);
        let mut project = state_store.get_or_create(dir.path(), None).unwrap();

        for i in 0..6 {
            project
                .metadata
                .insert("round".to_string(), Value::from(i));
            state_store.save(&mut project).unwrap();
        }

        let backups = state_store.list_backups(&project.path).unwrap();
        assert!(backups.len() <= 3, "kept {} backups", backups.len());
    }

    #[test]
    fn test_conditional_updated_at() {
        let dir = TempDir::new().unwrap();
        let state_store = store();
        let mut project = state_store.get_or_create(dir.path(), None).unwrap();
        let id = project
            .start_feature("x".to_string(), "standard".to_string())
            .unwrap();
        state_store.save(&mut project).unwrap();

        let mut loaded = state_store.get_by_path(dir.path()).unwrap().unwrap();
        let feature_stamp = loaded.feature(&id).unwrap().updated_at;
        let project_stamp = loaded.updated_at;

        // Saving with no changes leaves both timestamps alone
        state_store.save(&mut loaded).unwrap();
        assert_eq!(loaded.updated_at, project_stamp);
        assert_eq!(loaded.feature(&id).unwrap().updated_at, feature_stamp);

        // Changing the feature refreshes both
        loaded
            .feature_mut(&id)
            .unwrap()
            .transition_to(FeatureStatus::Implementing)
            .unwrap();
        state_store.save(&mut loaded).unwrap();
        assert!(loaded.feature(&id).unwrap().updated_at > feature_stamp);
        assert!(loaded.updated_at > project_stamp);
    }

    #[test]
    fn test_legacy_object_features_migrate_on_load() {
        let dir = TempDir::new().unwrap();
        let state_store = store();
        let canonical = dir.path().canonicalize().unwrap();
        let file = state_store.state_file(&canonical);
        fs::create_dir_all(file.parent().unwrap()).unwrap();

        let legacy = serde_json::json!({
            "id": "2f9a0c1e-8b3d-4e5f-9a7b-123456789abc",
            "name": "legacy",
            "path": canonical,
            "status": "active",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "metadata": {},
            "features": {
                "9b2f0c1e-8b3d-4e5f-9a7b-aaaaaaaaaaaa": {
                    "project_id": "2f9a0c1e-8b3d-4e5f-9a7b-123456789abc",
                    "prompt": "legacy feature",
                    "status": "done",
                    "workflow_type": "standard",
                    "created_at": "2026-01-01T00:00:00Z"
                }
            },
            "custom_extension": {"kept": true}
        });
        fs::write(&file, serde_json::to_string(&legacy).unwrap()).unwrap();

        let project = state_store.get_by_path(dir.path()).unwrap().unwrap();
        assert_eq!(project.features.len(), 1);
        assert_eq!(project.features[0].status, FeatureStatus::Completed);
        assert_eq!(
            project.features[0].created_at,
            project.features[0].updated_at
        );
        assert!(project.extra.contains_key("custom_extension"));
    }

    #[test]
    fn test_delete_by_path() {
        let dir = TempDir::new().unwrap();
        let state_store = store();
        let mut project = state_store.get_or_create(dir.path(), None).unwrap();
        state_store.save(&mut project).unwrap();

        state_store.delete_by_path(dir.path()).unwrap();
        assert!(state_store.get_by_path(dir.path()).unwrap().is_none());

        let err = state_store.delete_by_path(dir.path()).unwrap_err();
        assert!(err.is_not_found());
    }
}
