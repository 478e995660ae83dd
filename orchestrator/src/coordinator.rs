use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tracing::{info, warn};

use cde_core::classifier::{Classification, TaskClassifier};
use cde_core::error::{CdeError, Result};
use cde_core::models::{Feature, FeatureStatus, Project};
use cde_core::prompt::{placeholder_for_artifact, PromptTemplate, DEFAULT_WHITELIST};
use cde_core::validation::InputValidator;
use cde_core::workflow::{Workflow, WorkflowPhase, WorkflowShape, ARTIFACT_USER_PROMPT};
use router::{AgentRouter, CancelToken, ExecutionContext, ExecutionRequest};
use scanner::{ContextEnricher, ScannerConfig};
use store::StateStore;

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retries for a phase that fails with a recoverable error
    pub max_phase_retries: u32,
    /// Budget handed to the router per phase
    pub phase_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_phase_retries: 1,
            phase_timeout: Duration::from_secs(1800),
        }
    }
}

/// Result of driving one feature through its workflow shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureOutcome {
    pub feature_id: Uuid,
    pub status: FeatureStatus,
    pub phases_run: Vec<String>,
    pub phases_skipped: Vec<String>,
    /// Agent that executed each phase
    pub agents_used: BTreeMap<String, String>,
    pub classification: Classification,
}

/// Top-level workflow driver.
///
/// `run_feature` classifies the prompt, derives the workflow shape,
/// creates the feature, then executes each retained phase in order: render
/// the phase prompt, route it to an agent, validate the produced
/// artifacts, and persist. Phase execution is strictly sequential; at most
/// one agent invocation is in flight per feature.
///
/// Features loaded in a non-terminal state resume at the first phase
/// without artifacts.
pub struct WorkflowCoordinator {
    state: Arc<StateStore>,
    router: Arc<AgentRouter>,
    workflow: Workflow,
    config: CoordinatorConfig,
    scanner_config: ScannerConfig,
}

impl WorkflowCoordinator {
    pub fn new(
        state: Arc<StateStore>,
        router: Arc<AgentRouter>,
        workflow: Workflow,
        config: CoordinatorConfig,
        scanner_config: ScannerConfig,
    ) -> Self {
        Self {
            state,
            router,
            workflow,
            config,
            scanner_config,
        }
    }

    /// Build the project context once per run; scan failures degrade to a
    /// missing context rather than failing the feature.
    fn project_context_summary(&self, project_path: &Path) -> Option<String> {
        match ContextEnricher::enrich(project_path, &self.scanner_config) {
            Ok(context) => Some(context.summary()),
            Err(e) => {
                warn!(error = %e, "Context enrichment failed; continuing without it");
                None
            }
        }
    }

    /// Classify `prompt`, create a feature, and drive it to completion.
    pub async fn run_feature(
        &self,
        project_path: &Path,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<FeatureOutcome> {
        InputValidator::validate_prompt(prompt)?;

        let classification = TaskClassifier::classify(prompt);
        let shape = WorkflowShape::plan(
            &self.workflow,
            classification.workflow_type,
            classification.complexity,
        );
        shape.validate(&self.workflow)?;
        info!(
            complexity = %classification.complexity,
            workflow = %classification.workflow_type,
            phases = shape.phases_to_run.len(),
            "Feature classified"
        );

        let mut project = self.state.get_or_create(project_path, None)?;
        let feature_id = project.start_feature(
            prompt.to_string(),
            classification.workflow_type.as_str().to_string(),
        )?;
        if let Some(feature) = project.feature_mut(&feature_id) {
            feature.metadata.insert(
                "shape".to_string(),
                json!({
                    "phases_to_run": shape.phases_to_run,
                    "skipped": shape.skipped,
                    "est_duration": shape.est_duration,
                }),
            );
        }
        self.state.save(&mut project)?;

        self.drive(project, feature_id, classification, shape, cancel)
            .await
    }

    /// Resume a previously created, non-terminal feature. Phases with
    /// artifacts already present are skipped.
    pub async fn resume_feature(
        &self,
        project_path: &Path,
        feature_id: &Uuid,
        cancel: &CancelToken,
    ) -> Result<FeatureOutcome> {
        let project = self
            .state
            .get_by_path(project_path)?
            .ok_or_else(|| CdeError::project_not_found(project_path.display()))?;
        let feature = project
            .feature(feature_id)
            .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
        if feature.status.is_terminal() {
            return Err(CdeError::Validation(format!(
                "Feature '{feature_id}' is already {}",
                feature.status
            )));
        }

        let classification = TaskClassifier::classify(&feature.prompt);
        let shape = self
            .stored_shape(feature)
            .unwrap_or_else(|| {
                WorkflowShape::plan(
                    &self.workflow,
                    classification.workflow_type,
                    classification.complexity,
                )
            });

        let id = *feature_id;
        self.drive(project, id, classification, shape, cancel).await
    }

    fn stored_shape(&self, feature: &Feature) -> Option<WorkflowShape> {
        let shape = feature.metadata.get("shape")?;
        let phases_to_run: Vec<String> =
            serde_json::from_value(shape.get("phases_to_run")?.clone()).ok()?;
        let skipped: Vec<String> = serde_json::from_value(shape.get("skipped")?.clone()).ok()?;
        let est_duration = shape.get("est_duration")?.as_str()?.to_string();
        Some(WorkflowShape {
            phases_to_run,
            skipped,
            est_duration,
        })
    }

    async fn drive(
        &self,
        mut project: Project,
        feature_id: Uuid,
        classification: Classification,
        shape: WorkflowShape,
        cancel: &CancelToken,
    ) -> Result<FeatureOutcome> {
        let mut agents_used = BTreeMap::new();
        let context_summary = self.project_context_summary(&project.path);

        for phase_id in &shape.phases_to_run {
            let phase = self
                .workflow
                .phase(phase_id)
                .ok_or_else(|| {
                    CdeError::Internal(format!("Shape references unknown phase '{phase_id}'"))
                })?
                .clone();

            {
                let feature = project
                    .feature(&feature_id)
                    .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
                if feature.has_artifacts_for(phase_id) {
                    info!(phase = %phase_id, "Artifacts present; skipping phase");
                    continue;
                }
            }

            self.enter_phase(&mut project, &feature_id, &phase)?;

            match self
                .execute_phase(
                    &project,
                    &feature_id,
                    &classification,
                    &phase,
                    context_summary.as_deref(),
                    cancel,
                )
                .await
            {
                Ok((artifacts, agent_id)) => {
                    agents_used.insert(phase_id.clone(), agent_id);
                    let feature = project
                        .feature_mut(&feature_id)
                        .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
                    feature.record_artifacts(phase_id, artifacts);
                    self.state.save(&mut project)?;
                }
                Err(e) => {
                    self.fail_feature(&mut project, &feature_id, &e)?;
                    return Err(e);
                }
            }
        }

        let feature = project
            .feature_mut(&feature_id)
            .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
        if feature.can_transition_to(FeatureStatus::Completed) {
            feature.transition_to(FeatureStatus::Completed)?;
        }
        let status = feature.status;
        self.state.save(&mut project)?;
        info!(feature = %feature_id, "Feature completed");

        Ok(FeatureOutcome {
            feature_id,
            status,
            phases_run: shape.phases_to_run,
            phases_skipped: shape.skipped,
            agents_used,
            classification,
        })
    }

    fn enter_phase(
        &self,
        project: &mut Project,
        feature_id: &Uuid,
        phase: &WorkflowPhase,
    ) -> Result<()> {
        let feature = project
            .feature_mut(feature_id)
            .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
        if let Some(status) = FeatureStatus::for_phase(&phase.id) {
            if feature.can_transition_to(status) {
                feature.transition_to(status)?;
            }
        }
        feature.current_phase = phase.id.clone();
        self.state.save(project)?;
        Ok(())
    }

    async fn execute_phase(
        &self,
        project: &Project,
        feature_id: &Uuid,
        classification: &Classification,
        phase: &WorkflowPhase,
        context_summary: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(BTreeMap<String, Value>, String)> {
        let feature = project
            .feature(feature_id)
            .ok_or_else(|| CdeError::feature_not_found(feature_id))?;

        let rendered = self.render_phase_prompt(feature, phase, context_summary)?;
        let request = ExecutionRequest {
            prompt: rendered,
            phase_key: phase.id.clone(),
            context: ExecutionContext {
                timeout: self.config.phase_timeout,
                working_dir: Some(project.path.clone()),
                ..Default::default()
            },
        };

        let mut attempt = 0u32;
        loop {
            match self.router.route(classification, &request, cancel).await {
                Ok(outcome) => {
                    match Self::extract_artifacts(phase, &outcome.output, &outcome.metadata) {
                        Ok(artifacts) => return Ok((artifacts, outcome.agent_id)),
                        Err(e) if attempt < self.config.max_phase_retries => {
                            warn!(phase = %phase.id, error = %e, "Artifact validation failed; retrying phase");
                            attempt += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e)
                    if e.recoverable() && !e.is_cancelled() && attempt < self.config.max_phase_retries =>
                {
                    warn!(phase = %phase.id, error = %e, "Phase failed recoverably; retrying with identical inputs");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Build and render the phase prompt: the user prompt, the project
    /// context when available, and every required input artifact,
    /// substituted against the default whitelist.
    fn render_phase_prompt(
        &self,
        feature: &Feature,
        phase: &WorkflowPhase,
        context_summary: Option<&str>,
    ) -> Result<String> {
        let mut body = format!(
            "Phase '{}': {}.\n\nTask:\n{{{{USER_PROMPT}}}}\n",
            phase.id, phase.description
        );
        if context_summary.is_some() {
            body.push_str("\nProject context:\n{{PROJECT_CONTEXT}}\n");
        }
        for input in phase.input_names() {
            if input != ARTIFACT_USER_PROMPT {
                let key = placeholder_for_artifact(input);
                body.push_str(&format!("\nInput '{input}':\n{{{{{key}}}}}\n"));
            }
        }
        if !phase.produced_outputs.is_empty() {
            body.push_str(&format!(
                "\nRespond with a JSON object containing: {}.\n",
                phase.output_names().collect::<Vec<_>>().join(", ")
            ));
        }

        let mut values = BTreeMap::new();
        values.insert("USER_PROMPT".to_string(), feature.prompt.clone());
        if let Some(summary) = context_summary {
            values.insert("PROJECT_CONTEXT".to_string(), summary.to_string());
        }
        for input in phase.input_names() {
            if input == ARTIFACT_USER_PROMPT {
                continue;
            }
            if let Some(value) = Self::find_artifact(feature, input) {
                values.insert(placeholder_for_artifact(input), value);
            }
            // A missing value leaves the placeholder unresolved; render
            // then fails PromptValidation with the offending key.
        }

        PromptTemplate::new(body).render(&values, DEFAULT_WHITELIST)
    }

    /// Latest value of an artifact type across the feature's phases
    fn find_artifact(feature: &Feature, artifact_type: &str) -> Option<String> {
        for set in feature.artifacts.values() {
            if let Some(value) = set.get(artifact_type) {
                return Some(match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        None
    }

    /// Turn an agent's output into the phase's artifact set.
    ///
    /// Preference order: an `artifacts` object in the outcome metadata, a
    /// JSON object body, then the raw text standing in for every declared
    /// output. Fails `ArtifactValidation` when a declared output is still
    /// missing (recoverable; the phase may be re-run).
    fn extract_artifacts(
        phase: &WorkflowPhase,
        output: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        let candidate: BTreeMap<String, Value> =
            if let Some(Value::Object(map)) = metadata.get("artifacts") {
                map.clone().into_iter().collect()
            } else if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(output) {
                map.into_iter().collect()
            } else if output.trim().is_empty() {
                BTreeMap::new()
            } else {
                phase
                    .output_names()
                    .map(|o| (o.to_string(), Value::String(output.to_string())))
                    .collect()
            };

        let missing: Vec<String> = phase
            .output_names()
            .filter(|o| !candidate.contains_key(*o))
            .map(|o| o.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CdeError::ArtifactValidation {
                phase: phase.id.clone(),
                missing,
            });
        }
        Ok(candidate)
    }

    fn fail_feature(
        &self,
        project: &mut Project,
        feature_id: &Uuid,
        error: &CdeError,
    ) -> Result<()> {
        let feature = project
            .feature_mut(feature_id)
            .ok_or_else(|| CdeError::feature_not_found(feature_id))?;
        let reason = if error.is_cancelled() {
            "cancelled"
        } else {
            error.code()
        };
        feature
            .metadata
            .insert("failure".to_string(), error.to_payload());
        feature
            .metadata
            .insert("failure_reason".to_string(), Value::String(reason.to_string()));
        if feature.can_transition_to(FeatureStatus::Failed) {
            feature.transition_to(FeatureStatus::Failed)?;
        }
        self.state.save(project)?;
        warn!(feature = %feature_id, reason, "Feature failed; partial artifacts retained");
        Ok(())
    }
}
