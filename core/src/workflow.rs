use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::classifier::Complexity;
use crate::error::{CdeError, Result};

/// Phase ids of the built-in six-phase workflow
pub const PHASE_DEFINE: &str = "define";
pub const PHASE_DECOMPOSE: &str = "decompose";
pub const PHASE_DESIGN: &str = "design";
pub const PHASE_IMPLEMENT: &str = "implement";
pub const PHASE_TEST: &str = "test";
pub const PHASE_REVIEW: &str = "review";

/// The one input that is always available without a producing phase
pub const ARTIFACT_USER_PROMPT: &str = "user_prompt";

/// An artifact reference in a workflow definition.
///
/// The on-disk format accepts either a bare artifact-type string or an
/// object `{type, path?, labels?}`; both serialise back in the form they
/// arrived in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ArtifactSpec {
    /// Bare artifact type
    Name(String),
    /// Typed reference with optional path and labels
    Detailed {
        #[serde(rename = "type")]
        artifact_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        labels: Option<Vec<String>>,
    },
}

impl ArtifactSpec {
    /// The artifact type this reference names
    pub fn name(&self) -> &str {
        match self {
            ArtifactSpec::Name(name) => name,
            ArtifactSpec::Detailed { artifact_type, .. } => artifact_type,
        }
    }
}

impl From<&str> for ArtifactSpec {
    fn from(name: &str) -> Self {
        ArtifactSpec::Name(name.to_string())
    }
}

/// A named, ordered sequence of phases.
///
/// Invariant: every phase's `required_inputs` is a subset of the union of
/// outputs of preceding phases plus the external [`ARTIFACT_USER_PROMPT`].
/// [`Workflow::validate`] checks this after construction or YAML load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub version: String,
    pub phases: Vec<WorkflowPhase>,
    /// Unknown top-level YAML keys, preserved on round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

/// One phase of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowPhase {
    pub id: String,
    pub description: String,
    /// Artifact types this phase cannot run without
    #[serde(default, alias = "inputs")]
    pub required_inputs: Vec<ArtifactSpec>,
    /// Artifact types this phase must produce
    #[serde(default, alias = "outputs")]
    pub produced_outputs: Vec<ArtifactSpec>,
    /// Recipe id used to render this phase's prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_recipe: Option<String>,
    /// Handler id for non-agent phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Unknown per-phase YAML keys, preserved on round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

impl WorkflowPhase {
    fn new(
        id: &str,
        description: &str,
        required_inputs: &[&str],
        produced_outputs: &[&str],
        prompt_recipe: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            required_inputs: required_inputs.iter().map(|s| (*s).into()).collect(),
            produced_outputs: produced_outputs.iter().map(|s| (*s).into()).collect(),
            prompt_recipe: Some(prompt_recipe.to_string()),
            handler: None,
            extra: BTreeMap::new(),
        }
    }

    /// Artifact type names this phase requires
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.required_inputs.iter().map(|a| a.name())
    }

    /// Artifact type names this phase produces
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.produced_outputs.iter().map(|a| a.name())
    }
}

impl Workflow {
    /// The built-in six-phase workflow: define → decompose → design →
    /// implement → test → review.
    pub fn standard() -> Self {
        Self {
            name: "standard_workflow".to_string(),
            version: "1.0".to_string(),
            phases: vec![
                WorkflowPhase::new(
                    PHASE_DEFINE,
                    "Write feature specification",
                    &[ARTIFACT_USER_PROMPT],
                    &["specification", "acceptance_criteria"],
                    "prompts/01_define",
                ),
                WorkflowPhase::new(
                    PHASE_DECOMPOSE,
                    "Break feature into tasks",
                    &["specification"],
                    &["tasks", "dependencies"],
                    "prompts/02_decompose",
                ),
                WorkflowPhase::new(
                    PHASE_DESIGN,
                    "Create technical design",
                    &["specification"],
                    &["technical_design", "file_changes"],
                    "prompts/03_design",
                ),
                WorkflowPhase::new(
                    PHASE_IMPLEMENT,
                    "Write code",
                    &[ARTIFACT_USER_PROMPT],
                    &["code_changes", "files_modified"],
                    "prompts/04_implement",
                ),
                WorkflowPhase::new(
                    PHASE_TEST,
                    "Create and run tests",
                    &["code_changes"],
                    &["test_files", "test_results"],
                    "prompts/05_test",
                ),
                WorkflowPhase::new(
                    PHASE_REVIEW,
                    "Code review and QA",
                    &["code_changes"],
                    &["review_notes", "approval_status"],
                    "prompts/06_review",
                ),
            ],
            extra: BTreeMap::new(),
        }
    }

    /// Look up a phase by id
    pub fn phase(&self, id: &str) -> Option<&WorkflowPhase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Ordered phase ids
    pub fn phase_order(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.id.clone()).collect()
    }

    /// Check the input-availability invariant across the full phase order
    pub fn validate(&self) -> Result<()> {
        let mut available: BTreeSet<&str> = BTreeSet::new();
        available.insert(ARTIFACT_USER_PROMPT);
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.id.as_str()) {
                return Err(CdeError::Validation(format!(
                    "Workflow '{}' declares phase '{}' twice",
                    self.name, phase.id
                )));
            }
            for input in phase.input_names() {
                if !available.contains(input) {
                    return Err(CdeError::Validation(format!(
                        "Phase '{}' requires input '{}' that no earlier phase produces",
                        phase.id, input
                    )));
                }
            }
            for output in phase.output_names() {
                available.insert(output);
            }
        }
        Ok(())
    }

    /// Parse a `workflow.yml` document, preserving unknown keys
    pub fn from_yaml(text: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(text)
            .map_err(|e| CdeError::Validation(format!("Invalid workflow.yml: {e}")))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Serialise back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| CdeError::Internal(format!("Workflow serialisation failed: {e}")))
    }
}

/// Workflow type names selecting a default shape
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    /// Full six-phase workflow
    Standard,
    /// Skip define/decompose/design/review, straight to implement + test
    QuickFix,
    /// Heavy analysis, no implementation
    Research,
    /// Specs and docs only
    Documentation,
    /// Code improvement without new features; keeps the full shape
    Refactor,
    /// Emergency fix with minimal validation
    Hotfix,
}

impl WorkflowType {
    /// Default skip list before legality repair
    fn skipped_phases(self, complexity: Complexity) -> Vec<&'static str> {
        match self {
            WorkflowType::QuickFix => {
                vec![PHASE_DEFINE, PHASE_DECOMPOSE, PHASE_DESIGN, PHASE_REVIEW]
            }
            WorkflowType::Hotfix => vec![
                PHASE_DEFINE,
                PHASE_DECOMPOSE,
                PHASE_DESIGN,
                PHASE_TEST,
                PHASE_REVIEW,
            ],
            WorkflowType::Research => vec![PHASE_IMPLEMENT, PHASE_TEST, PHASE_REVIEW],
            WorkflowType::Documentation => vec![
                PHASE_DECOMPOSE,
                PHASE_IMPLEMENT,
                PHASE_TEST,
                PHASE_REVIEW,
            ],
            WorkflowType::Standard | WorkflowType::Refactor => {
                if complexity == Complexity::Trivial {
                    vec![PHASE_DECOMPOSE, PHASE_DESIGN]
                } else {
                    vec![]
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::Standard => "standard",
            WorkflowType::QuickFix => "quick-fix",
            WorkflowType::Research => "research",
            WorkflowType::Documentation => "documentation",
            WorkflowType::Refactor => "refactor",
            WorkflowType::Hotfix => "hotfix",
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The subset-and-order of phases actually executed for one request.
///
/// Derived from a workflow plus the classified type and complexity. The
/// retained phases always preserve the relative order of the underlying
/// workflow, and every retained phase's required inputs are produced by a
/// retained earlier phase or equal to `user_prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowShape {
    pub phases_to_run: Vec<String>,
    pub skipped: Vec<String>,
    pub est_duration: String,
}

impl WorkflowShape {
    /// Plan a shape for `workflow_type` at `complexity`.
    ///
    /// Starts from the type's default skip list, then un-skips any phase
    /// whose removal would leave a retained successor without a producer for
    /// one of its required inputs. Repair iterates until stable, so the
    /// returned shape always satisfies the input-availability invariant.
    pub fn plan(workflow: &Workflow, workflow_type: WorkflowType, complexity: Complexity) -> Self {
        let mut skipped: BTreeSet<String> = workflow_type
            .skipped_phases(complexity)
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        loop {
            let mut unskip: Option<String> = None;
            let mut available: BTreeSet<String> = BTreeSet::new();
            available.insert(ARTIFACT_USER_PROMPT.to_string());

            'phases: for phase in &workflow.phases {
                if skipped.contains(&phase.id) {
                    continue;
                }
                for input in phase.input_names() {
                    if !available.contains(input) {
                        // Re-retain the nearest earlier producer of this input
                        for earlier in &workflow.phases {
                            if earlier.id == phase.id {
                                break;
                            }
                            if skipped.contains(&earlier.id)
                                && earlier.output_names().any(|o| o == input)
                            {
                                unskip = Some(earlier.id.clone());
                                break 'phases;
                            }
                        }
                    }
                }
                for output in phase.output_names() {
                    available.insert(output.to_string());
                }
            }

            match unskip {
                Some(id) => {
                    skipped.remove(&id);
                }
                None => break,
            }
        }

        let phases_to_run: Vec<String> = workflow
            .phases
            .iter()
            .filter(|p| !skipped.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        let skipped: Vec<String> = workflow
            .phases
            .iter()
            .filter(|p| !phases_to_run.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();

        Self {
            phases_to_run,
            skipped,
            est_duration: complexity.estimated_duration().to_string(),
        }
    }

    /// Check the retained phases against the input-availability invariant
    pub fn validate(&self, workflow: &Workflow) -> Result<()> {
        let mut available: BTreeSet<&str> = BTreeSet::new();
        available.insert(ARTIFACT_USER_PROMPT);
        for id in &self.phases_to_run {
            let phase = workflow.phase(id).ok_or_else(|| {
                CdeError::Validation(format!("Shape retains unknown phase '{id}'"))
            })?;
            for input in phase.input_names() {
                if !available.contains(input) {
                    return Err(CdeError::Validation(format!(
                        "Retained phase '{id}' requires input '{input}' from a skipped phase"
                    )));
                }
            }
            for output in phase.output_names() {
                available.insert(output);
            }
        }
        Ok(())
    }
}
