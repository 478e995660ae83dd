use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use cde_core::models::{Feature, FeatureStatus, Project, ProjectStatus};

/// Fluent builder for test projects.
///
/// # Examples
///
/// ```rust
/// use mocks::builders::ProjectBuilder;
///
/// let project = ProjectBuilder::new("/tmp/demo")
///     .name("demo")
///     .active()
///     .with_feature("Add login", "standard")
///     .build();
/// assert_eq!(project.features.len(), 1);
/// ```
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            project: Project::new(path, None),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.project.name = name.to_string();
        self
    }

    pub fn active(mut self) -> Self {
        self.project.status = ProjectStatus::Active;
        self
    }

    pub fn archived(mut self) -> Self {
        self.project.status = ProjectStatus::Archived;
        self
    }

    /// Created a day ago, so timestamp assertions have room to move
    pub fn aged(mut self) -> Self {
        self.project.created_at = Utc::now() - ChronoDuration::days(1);
        self.project.updated_at = self.project.created_at;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.project.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_feature(mut self, prompt: &str, workflow_type: &str) -> Self {
        let status = self.project.status;
        self.project
            .start_feature(prompt.to_string(), workflow_type.to_string())
            .expect("builder feature");
        // start_feature activates onboarding projects; keep what was asked
        if status == ProjectStatus::Onboarding {
            self.project.status = ProjectStatus::Active;
        }
        self
    }

    /// Add a feature already carrying artifacts for the given phases
    pub fn with_feature_at(
        mut self,
        prompt: &str,
        status: FeatureStatus,
        completed_phases: &[&str],
    ) -> Self {
        let id = self
            .project
            .start_feature(prompt.to_string(), "standard".to_string())
            .expect("builder feature");
        let feature = self.project.feature_mut(&id).expect("just created");
        for phase in completed_phases {
            let mut set = BTreeMap::new();
            set.insert(
                "output".to_string(),
                Value::String(format!("artifact of {phase}")),
            );
            feature.artifacts.insert(phase.to_string(), set);
        }
        feature.status = status;
        self
    }

    pub fn build(self) -> Project {
        self.project
    }
}

/// Fluent builder for standalone features
pub struct FeatureBuilder {
    feature: Feature,
}

impl FeatureBuilder {
    pub fn new(project_id: Uuid, prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            feature: Feature {
                id: Uuid::new_v4(),
                project_id,
                prompt: prompt.to_string(),
                status: FeatureStatus::Defining,
                current_phase: "define".to_string(),
                workflow_type: "standard".to_string(),
                created_at: now,
                updated_at: now,
                artifacts: BTreeMap::new(),
                metadata: BTreeMap::new(),
            },
        }
    }

    pub fn status(mut self, status: FeatureStatus) -> Self {
        self.feature.status = status;
        self
    }

    pub fn with_artifact(mut self, phase: &str, artifact_type: &str, value: Value) -> Self {
        self.feature
            .artifacts
            .entry(phase.to_string())
            .or_default()
            .insert(artifact_type.to_string(), value);
        self
    }

    pub fn build(self) -> Feature {
        self.feature
    }
}
