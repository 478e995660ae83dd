use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{CdeError, Result};

/// Per-project state tracked by the orchestrator.
///
/// A project is the unit of persistence: one `state.json` under the project's
/// state directory holds the project record and all of its features. Features
/// are owned by the project and referenced by index, never by back-pointer.
///
/// # Examples
///
/// ```rust
/// use cde_core::models::{Project, ProjectStatus};
///
/// let mut project = Project::new("/tmp/demo", Some("demo".to_string()));
/// assert_eq!(project.status, ProjectStatus::Onboarding);
///
/// let feature_id = project
///     .start_feature("Add OAuth2 login".to_string(), "standard".to_string())
///     .unwrap();
/// assert!(project.feature(&feature_id).is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// Opaque unique identifier
    pub id: Uuid,
    /// Human-readable project name
    pub name: String,
    /// Absolute, canonical project root
    pub path: PathBuf,
    /// Current lifecycle status
    pub status: ProjectStatus,
    /// Creation timestamp (UTC)
    pub created_at: DateTime<Utc>,
    /// Last persisted mutation timestamp (UTC); never before `created_at`
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata preserved across saves
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Features owned by this project, in creation order
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Unknown top-level keys from older schemas, preserved on round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Freshly registered, context not yet published
    Onboarding,
    /// Normal working state
    Active,
    /// Read-only; no new features may start
    Archived,
}

/// One tracked unit of work inside a project.
///
/// Status transitions only move forward along the phase order of the
/// feature's workflow; `Completed` and `Failed` are terminal. The only
/// sanctioned backward move is [`Feature::reset_to_phase`], which also
/// clears the artifacts of every later phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Feature identifier, unique within the project
    pub id: Uuid,
    /// Owning project id
    pub project_id: Uuid,
    /// Original user request
    pub prompt: String,
    /// Current lifecycle status
    pub status: FeatureStatus,
    /// Id of the phase currently being executed
    pub current_phase: String,
    /// Workflow type name driving the phase order (e.g. "standard")
    pub workflow_type: String,
    /// Creation timestamp (UTC)
    pub created_at: DateTime<Utc>,
    /// Last observed mutation timestamp (UTC)
    pub updated_at: DateTime<Utc>,
    /// Artifacts keyed by phase id, then artifact type
    #[serde(default)]
    pub artifacts: BTreeMap<String, BTreeMap<String, Value>>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Feature lifecycle states following the six-phase workflow.
///
/// The full progression is: Defining → Decomposing → Designing →
/// Implementing → Testing → Reviewing → Completed, with Failed reachable
/// from any non-terminal state. Workflow shapes that skip phases also skip
/// the corresponding states.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    /// Writing the feature specification
    Defining,
    /// Breaking the feature into tasks
    Decomposing,
    /// Producing the technical design
    Designing,
    /// Writing code
    Implementing,
    /// Creating and running tests
    Testing,
    /// Code review and QA
    Reviewing,
    /// Terminal: all retained phases succeeded
    Completed,
    /// Terminal: a phase failed non-recoverably or was cancelled
    Failed,
}

impl FeatureStatus {
    /// Position in the forward progression; terminal states order last
    fn rank(self) -> u8 {
        match self {
            FeatureStatus::Defining => 0,
            FeatureStatus::Decomposing => 1,
            FeatureStatus::Designing => 2,
            FeatureStatus::Implementing => 3,
            FeatureStatus::Testing => 4,
            FeatureStatus::Reviewing => 5,
            FeatureStatus::Completed => 6,
            FeatureStatus::Failed => 7,
        }
    }

    /// Whether this is a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, FeatureStatus::Completed | FeatureStatus::Failed)
    }

    /// The in-flight status corresponding to a workflow phase id, if any
    pub fn for_phase(phase_id: &str) -> Option<Self> {
        match phase_id {
            crate::workflow::PHASE_DEFINE => Some(FeatureStatus::Defining),
            crate::workflow::PHASE_DECOMPOSE => Some(FeatureStatus::Decomposing),
            crate::workflow::PHASE_DESIGN => Some(FeatureStatus::Designing),
            crate::workflow::PHASE_IMPLEMENT => Some(FeatureStatus::Implementing),
            crate::workflow::PHASE_TEST => Some(FeatureStatus::Testing),
            crate::workflow::PHASE_REVIEW => Some(FeatureStatus::Reviewing),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FeatureStatus::Defining => "defining",
            FeatureStatus::Decomposing => "decomposing",
            FeatureStatus::Designing => "designing",
            FeatureStatus::Implementing => "implementing",
            FeatureStatus::Testing => "testing",
            FeatureStatus::Reviewing => "reviewing",
            FeatureStatus::Completed => "completed",
            FeatureStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

impl Project {
    /// Synthesise a new project in `Onboarding` status.
    ///
    /// The path is stored as given; callers are expected to pass an
    /// absolute, canonicalised path (the state store enforces this).
    pub fn new(path: impl AsRef<Path>, name: Option<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = name.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            path,
            status: ProjectStatus::Onboarding,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            features: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Start a new feature from a user prompt.
    ///
    /// Fails `Validation` when the prompt is empty or the project is
    /// archived. Returns the id of the new feature; the feature itself is
    /// stored in `self.features`.
    pub fn start_feature(&mut self, prompt: String, workflow_type: String) -> Result<Uuid> {
        if prompt.trim().is_empty() {
            return Err(CdeError::empty_field("prompt"));
        }
        if self.status == ProjectStatus::Archived {
            return Err(CdeError::Validation(
                "Cannot start a feature on an archived project".to_string(),
            ));
        }
        let now = Utc::now();
        let feature = Feature {
            id: Uuid::new_v4(),
            project_id: self.id,
            prompt,
            status: FeatureStatus::Defining,
            current_phase: crate::workflow::PHASE_DEFINE.to_string(),
            workflow_type,
            created_at: now,
            updated_at: now,
            artifacts: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        let id = feature.id;
        self.features.push(feature);
        if self.status == ProjectStatus::Onboarding {
            self.status = ProjectStatus::Active;
        }
        Ok(id)
    }

    /// Look up a feature by id
    pub fn feature(&self, id: &Uuid) -> Option<&Feature> {
        self.features.iter().find(|f| &f.id == id)
    }

    /// Look up a feature mutably by id
    pub fn feature_mut(&mut self, id: &Uuid) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| &f.id == id)
    }

    /// Check the documented invariants; used by the state store after load
    pub fn check_invariants(&self) -> Result<()> {
        if self.created_at > self.updated_at {
            return Err(CdeError::Validation(format!(
                "Project '{}' has created_at after updated_at",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for feature in &self.features {
            if feature.project_id != self.id {
                return Err(CdeError::Validation(format!(
                    "Feature '{}' does not belong to project '{}'",
                    feature.id, self.id
                )));
            }
            if !seen.insert(feature.id) {
                return Err(CdeError::Validation(format!(
                    "Duplicate feature id '{}'",
                    feature.id
                )));
            }
        }
        Ok(())
    }
}

impl Feature {
    /// Check if the feature may move to `new_status`.
    ///
    /// Forward moves along the progression are allowed from any
    /// non-terminal state; `Failed` is reachable from anywhere non-terminal;
    /// terminal states admit no transitions; same-state moves are no-ops
    /// treated as invalid.
    pub fn can_transition_to(&self, new_status: FeatureStatus) -> bool {
        if self.status.is_terminal() || self.status == new_status {
            return false;
        }
        if new_status == FeatureStatus::Failed {
            return true;
        }
        new_status.rank() > self.status.rank()
    }

    /// Transition to `new_status`, updating `updated_at`.
    pub fn transition_to(&mut self, new_status: FeatureStatus) -> Result<()> {
        if !self.can_transition_to(new_status) {
            return Err(CdeError::Validation(format!(
                "Invalid feature transition from {} to {}",
                self.status, new_status
            )));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the artifacts of a phase, replacing any prior set for it.
    pub fn record_artifacts(&mut self, phase_id: &str, artifacts: BTreeMap<String, Value>) {
        self.artifacts.insert(phase_id.to_string(), artifacts);
        self.updated_at = Utc::now();
    }

    /// Whether a phase already has a recorded artifact set (used by resumption)
    pub fn has_artifacts_for(&self, phase_id: &str) -> bool {
        self.artifacts
            .get(phase_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Explicit reset to an earlier phase of `phase_order`.
    ///
    /// This is the only sanctioned backward move: the feature returns to the
    /// in-flight status of `phase_id` and the artifacts of every phase at or
    /// after it in `phase_order` are cleared.
    pub fn reset_to_phase(&mut self, phase_id: &str, phase_order: &[String]) -> Result<()> {
        let position = phase_order
            .iter()
            .position(|p| p == phase_id)
            .ok_or_else(|| {
                CdeError::Validation(format!("Phase '{phase_id}' is not part of this workflow"))
            })?;
        let status = FeatureStatus::for_phase(phase_id).ok_or_else(|| {
            CdeError::Validation(format!("Phase '{phase_id}' has no in-flight status"))
        })?;
        for later in &phase_order[position..] {
            self.artifacts.remove(later);
        }
        self.status = status;
        self.current_phase = phase_id.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }
}
