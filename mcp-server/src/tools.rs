use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tracing::{info, warn};

use cde_core::circuit_breaker::BreakerRegistry;
use cde_core::classifier::TaskClassifier;
use cde_core::error::{CdeError, Result};
use cde_core::models::ProjectStatus;
use cde_core::validation::InputValidator;
use cde_core::workflow::{Workflow, WorkflowShape};
use orchestrator::{CoordinatorConfig, WorkflowCoordinator};
use router::{
    default_transports, AgentRouter, AgentTransport, CancelToken, ExecutionContext,
    ExecutionRequest, TracingObserver,
};
use scanner::{
    analyse_git_with_branches, analyse_links, scan_documentation, ContextEnricher, ScannerConfig,
};
use store::{RecipeSource, RecipeStore, SkillStore, StateStore};

use crate::config::Config;
use crate::tasks::TaskRegistry;

/// The authoritative tool catalog: `(name, description)`
pub const TOOL_CATALOG: &[(&str, &str)] = &[
    ("scan_documentation", "Scan markdown documentation with progressive detail levels"),
    ("analyse_documentation", "Scan documentation and validate its internal links"),
    ("analyse_git", "Extract commit history, contributors, hotspots, and activity from Git"),
    ("create_specification", "Create a feature specification file with frontmatter"),
    ("onboarding_project", "Register a project and build its enriched context"),
    ("setup_project", "Register a project and install the recipe set"),
    ("publish_onboarding", "Write approved onboarding documents and activate the project"),
    ("select_workflow", "Classify a prompt into workflow, recipe, and skills"),
    ("download_recipes", "Fetch the recipe manifest from a remote repository"),
    ("check_recipes", "Check whether the project has recipes installed"),
    ("source_skill", "Find skills matching a query and copy them into a project store"),
    ("update_skill", "Update a stored skill's topics and freshness"),
    ("list_available_agents", "List every agent with live availability"),
    ("select_agent", "Pick the best agent for a task without executing it"),
    ("execute_with_best_agent", "Execute a task with the best agent and fallback chain"),
    ("delegate_task", "Start a task in the background and return its id"),
    ("get_task_status", "Fetch the status of a delegated task"),
    ("list_active_tasks", "List delegated tasks that are still running"),
    ("cancel_task", "Cancel a delegated task, propagating to the running agent"),
    ("health_check", "Report server health and agent availability"),
    ("search_tools", "Search this tool catalog by keyword"),
];

/// The tool surface: every named operation takes a JSON argument record
/// and returns a JSON value with a top-level `status` field; errors use
/// `{error, message, recoverable, code}`.
pub struct ToolServer {
    config: Config,
    state: Arc<StateStore>,
    recipes: Arc<RecipeStore>,
    router: Arc<AgentRouter>,
    coordinator: Arc<WorkflowCoordinator>,
    tasks: Arc<TaskRegistry>,
    scanner_config: ScannerConfig,
}

impl ToolServer {
    /// Wire the full component graph from one configuration record
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_transports(config, None)
    }

    /// As [`ToolServer::new`], with a transport override for tests
    pub fn with_transports(
        config: Config,
        transports: Option<Vec<Box<dyn AgentTransport>>>,
    ) -> anyhow::Result<Self> {
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker.failure_threshold,
            config.breaker_cooldown(),
        ));
        let state = Arc::new(StateStore::new(
            config.state.dir_name.clone(),
            config.state.backup_limit,
        ));
        let recipes = Arc::new(RecipeStore::new(
            config.state.dir_name.clone(),
            config.recipe_cache_ttl(),
            breakers.clone(),
        )?);
        let transports = transports.unwrap_or_else(|| default_transports(None));
        let router = Arc::new(AgentRouter::new(
            transports,
            breakers,
            Box::new(TracingObserver),
            config.router_config(),
        ));
        let scanner_config = config.scanner_config();
        let coordinator = Arc::new(WorkflowCoordinator::new(
            state.clone(),
            router.clone(),
            Workflow::standard(),
            CoordinatorConfig {
                max_phase_retries: config.router.max_phase_retries,
                phase_timeout: Duration::from_secs(config.router.default_timeout_s),
            },
            scanner_config.clone(),
        ));
        Ok(Self {
            config,
            state,
            recipes,
            router,
            coordinator,
            tasks: Arc::new(TaskRegistry::new()),
            scanner_config,
        })
    }

    /// Dispatch one tool call. Never fails: every error becomes the wire
    /// error object.
    pub async fn handle(&self, tool: &str, args: &Value) -> Value {
        info!(tool, "Tool call");
        match self.dispatch(tool, args).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool, code = e.code(), error = %e, "Tool call failed");
                e.to_payload()
            }
        }
    }

    async fn dispatch(&self, tool: &str, args: &Value) -> Result<Value> {
        match tool {
            "scan_documentation" => self.scan_documentation(args),
            "analyse_documentation" => self.analyse_documentation(args),
            "analyse_git" => self.analyse_git(args),
            "create_specification" => self.create_specification(args),
            "onboarding_project" => self.onboarding_project(args),
            "setup_project" => self.setup_project(args).await,
            "publish_onboarding" => self.publish_onboarding(args),
            "select_workflow" => self.select_workflow(args),
            "download_recipes" => self.download_recipes(args).await,
            "check_recipes" => self.check_recipes(args),
            "source_skill" => self.source_skill(args),
            "update_skill" => self.update_skill(args),
            "list_available_agents" => self.list_available_agents().await,
            "select_agent" => self.select_agent(args).await,
            "execute_with_best_agent" => self.execute_with_best_agent(args).await,
            "delegate_task" => self.delegate_task(args),
            "get_task_status" => self.get_task_status(args),
            "list_active_tasks" => self.list_active_tasks(),
            "cancel_task" => self.cancel_task(args),
            "health_check" => self.health_check().await,
            "search_tools" => self.search_tools(args),
            other => Err(CdeError::NotFound(format!("Unknown tool '{other}'"))),
        }
    }

    // --- argument helpers -------------------------------------------------

    fn required_str(args: &Value, key: &str) -> Result<String> {
        args.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CdeError::Validation(format!("Missing required argument '{key}'")))
    }

    fn optional_str(args: &Value, key: &str) -> Option<String> {
        args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    fn optional_bool(args: &Value, key: &str) -> bool {
        args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    fn project_path(args: &Value) -> Result<PathBuf> {
        let path = PathBuf::from(Self::required_str(args, "path")?);
        InputValidator::validate_project_path(&path)?;
        Ok(path)
    }

    // --- documentation & git ---------------------------------------------

    fn scan_documentation(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let detail = Self::optional_str(args, "detail").unwrap_or_else(|| "summary".to_string());
        if !matches!(detail.as_str(), "names" | "summary" | "full") {
            return Err(CdeError::Validation(format!(
                "Invalid detail level '{detail}'; expected names, summary, or full"
            )));
        }

        let inventory = scan_documentation(&path, &self.scanner_config)?;
        let status = if inventory.timed_out { "timeout" } else { "success" };

        let payload = match detail.as_str() {
            "names" => json!({
                "status": status,
                "total": inventory.total,
                "files": inventory.entries.iter().map(|e| e.relative_path.clone()).collect::<Vec<_>>(),
            }),
            "summary" => json!({
                "status": status,
                "total": inventory.total,
                "files": inventory.entries.iter().map(|e| json!({
                    "path": e.relative_path,
                    "has_metadata": e.has_frontmatter,
                    "location": e.category.as_str(),
                })).collect::<Vec<_>>(),
                "missing_metadata": inventory.missing_metadata(),
                "orphaned_count": inventory.orphaned().len(),
                "recommendations": inventory.recommendations(),
            }),
            _ => json!({
                "status": status,
                "total": inventory.total,
                "scanned_at": inventory.scanned_at,
                "by_location": inventory.by_location().iter().map(|(category, entries)| {
                    (category.as_str().to_string(), json!(entries))
                }).collect::<serde_json::Map<String, Value>>(),
                "missing_metadata": inventory.missing_metadata(),
                "orphaned": inventory.orphaned(),
                "large_files": inventory.large_files().iter().map(|(path, lines)| json!({
                    "path": path, "lines": lines,
                })).collect::<Vec<_>>(),
                "recommendations": inventory.recommendations(),
            }),
        };
        Ok(payload)
    }

    fn analyse_documentation(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let inventory = scan_documentation(&path, &self.scanner_config)?;
        let links = analyse_links(&path, &self.scanner_config)?;
        Ok(json!({
            "status": "success",
            "total_docs": inventory.total,
            "missing_metadata": inventory.missing_metadata(),
            "orphaned": inventory.orphaned(),
            "links": links,
            "recommendations": inventory.recommendations(),
        }))
    }

    fn analyse_git(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let days = args
            .get("days")
            .and_then(|v| v.as_i64())
            .unwrap_or(self.config.scanner.git_window_days);
        let include_all = Self::optional_bool(args, "include_all_branches");

        let insights =
            analyse_git_with_branches(&path, days, include_all, &self.scanner_config)?;
        let status = if insights.timed_out { "timeout" } else { "success" };
        Ok(json!({
            "status": status,
            "insights": insights,
        }))
    }

    fn create_specification(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let feature_name = Self::required_str(args, "feature_name")?;
        let description = Self::required_str(args, "description")?;
        let author = Self::optional_str(args, "author").unwrap_or_else(|| "unknown".to_string());
        InputValidator::validate_project_name(&feature_name)?;

        let slug: String = feature_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        let spec_dir = path.join("specs/features");
        std::fs::create_dir_all(&spec_dir).map_err(|e| CdeError::io(&e))?;
        let spec_path = spec_dir.join(format!("{slug}.md"));

        let content = format!(
            "---\ntitle: {feature_name}\nauthor: {author}\ncreated: {}\nstatus: draft\n---\n\n\
             # {feature_name}\n\n## Summary\n\n{description}\n\n## Acceptance Criteria\n\n- [ ] TBD\n",
            Utc::now().format("%Y-%m-%d"),
        );
        std::fs::write(&spec_path, content).map_err(|e| CdeError::io(&e))?;

        Ok(json!({
            "status": "success",
            "path": spec_path,
            "slug": slug,
        }))
    }

    // --- project lifecycle ------------------------------------------------

    fn onboarding_project(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let mut project = self.state.get_or_create(&path, None)?;
        self.state.save(&mut project)?;

        let context = ContextEnricher::enrich(&path, &self.scanner_config)?;
        Ok(json!({
            "status": "success",
            "project": {
                "id": project.id,
                "name": project.name,
                "status": project.status,
            },
            "context": context,
        }))
    }

    async fn setup_project(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let force = Self::optional_bool(args, "force");

        let mut project = self.state.get_or_create(&path, None)?;
        self.state.save(&mut project)?;

        let source = RecipeSource::github(&self.config.recipes.repo, &self.config.recipes.branch);
        let manifest = self.recipes.ensure_recipes(&path, &source, force).await?;
        Ok(json!({
            "status": manifest.status,
            "project": { "id": project.id, "name": project.name },
            "files": manifest.files,
            "destination": manifest.destination,
        }))
    }

    fn publish_onboarding(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let approve = Self::optional_bool(args, "approve");
        let documents = args
            .get("documents")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if !approve {
            return Ok(json!({
                "status": "pending_approval",
                "documents": documents.len(),
                "message": "Re-run with approve=true to write the documents",
            }));
        }

        let mut written = Vec::new();
        for document in &documents {
            let relative = document
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CdeError::Validation("Document missing 'path'".to_string()))?;
            if relative.contains("..") {
                return Err(CdeError::Validation(format!(
                    "Document path '{relative}' escapes the project root"
                )));
            }
            let content = document
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CdeError::Validation("Document missing 'content'".to_string()))?;
            let target = path.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CdeError::io(&e))?;
            }
            std::fs::write(&target, content).map_err(|e| CdeError::io(&e))?;
            written.push(relative.to_string());
        }

        let mut project = self.state.get_or_create(&path, None)?;
        if project.status == ProjectStatus::Onboarding {
            project.status = ProjectStatus::Active;
        }
        self.state.save(&mut project)?;

        Ok(json!({
            "status": "success",
            "written": written,
            "project_status": project.status,
        }))
    }

    // --- workflow & recipes -----------------------------------------------

    fn select_workflow(&self, args: &Value) -> Result<Value> {
        let prompt = Self::required_str(args, "prompt")?;
        InputValidator::validate_prompt(&prompt)?;

        let recommendation = TaskClassifier::recommend(&prompt);
        let workflow = Workflow::standard();
        let shape = WorkflowShape::plan(
            &workflow,
            recommendation.classification.workflow_type,
            recommendation.classification.complexity,
        );

        Ok(json!({
            "status": "success",
            "recommendation": recommendation,
            "shape": shape,
        }))
    }

    async fn download_recipes(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let repo = Self::optional_str(args, "repo").unwrap_or_else(|| self.config.recipes.repo.clone());
        let branch =
            Self::optional_str(args, "branch").unwrap_or_else(|| self.config.recipes.branch.clone());
        let force = Self::optional_bool(args, "force");

        let source = RecipeSource::github(&repo, &branch);
        let manifest = self.recipes.ensure_recipes(&path, &source, force).await?;
        Ok(json!({
            "status": manifest.status,
            "files": manifest.files,
            "destination": manifest.destination,
        }))
    }

    fn check_recipes(&self, args: &Value) -> Result<Value> {
        let path = Self::project_path(args)?;
        let present = self.recipes.check_recipes(&path);
        let recipes = if present {
            self.recipes
                .load_recipes(&path)?
                .into_iter()
                .map(|r| json!({ "id": r.id, "category": r.category, "description": r.description }))
                .collect()
        } else {
            Vec::new()
        };
        Ok(json!({
            "status": "success",
            "present": present,
            "recipes": recipes,
        }))
    }

    // --- skills -----------------------------------------------------------

    /// Default skill store: `~/.cde/skills`
    fn default_skill_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cde")
            .join("skills")
    }

    fn source_skill(&self, args: &Value) -> Result<Value> {
        let query = Self::required_str(args, "query")?;
        let source = Self::optional_str(args, "source")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_skill_dir);
        let destination = Self::optional_str(args, "destination").map(PathBuf::from);

        let classification = TaskClassifier::classify(&query);
        let requirement = store::SkillRequirement {
            domain: classification.domain,
            complexity: Some(classification.complexity),
            tags: query
                .to_lowercase()
                .split_whitespace()
                .map(|w| w.to_string())
                .collect(),
        };

        let source_store = SkillStore::new(source);
        let matches = source_store.find(&requirement)?;
        if matches.is_empty() {
            return Err(CdeError::NotFound(format!(
                "No skill matches query '{query}'"
            )));
        }

        let mut copied = Vec::new();
        if let Some(destination) = destination {
            let destination_store = SkillStore::new(destination);
            for skill in &matches {
                destination_store.save(skill)?;
                copied.push(skill.name.clone());
            }
        }

        Ok(json!({
            "status": "success",
            "matches": matches,
            "copied": copied,
            "domain": classification.domain,
        }))
    }

    fn update_skill(&self, args: &Value) -> Result<Value> {
        let name = Self::required_str(args, "name")?;
        let source = Self::optional_str(args, "source")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_skill_dir);
        let max_sources = args
            .get("max_sources")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;
        let topics: Vec<String> = args
            .get("topics")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let skill_store = SkillStore::new(source);
        let mut skill = skill_store
            .get(&name)?
            .ok_or_else(|| CdeError::NotFound(format!("Skill '{name}' not found")))?;
        for topic in topics.into_iter().take(max_sources) {
            skill.tags.insert(topic.to_lowercase());
        }
        skill_store.save(&skill)?;

        Ok(json!({
            "status": "success",
            "skill": skill,
        }))
    }

    // --- agents -----------------------------------------------------------

    async fn list_available_agents(&self) -> Result<Value> {
        let agents = self.router.list_agents().await;
        let available = agents.iter().filter(|a| a.availability.available).count();
        Ok(json!({
            "status": "success",
            "agents": agents,
            "available": available,
        }))
    }

    async fn select_agent(&self, args: &Value) -> Result<Value> {
        let task = Self::required_str(args, "task")?;
        InputValidator::validate_prompt(&task)?;
        let classification = TaskClassifier::classify(&task);
        let agent = self.router.select(&classification).await?;
        Ok(json!({
            "status": "success",
            "agent": agent,
            "classification": classification,
        }))
    }

    async fn execute_with_best_agent(&self, args: &Value) -> Result<Value> {
        let task = Self::required_str(args, "task")?;
        InputValidator::validate_prompt(&task)?;
        let path = Self::optional_str(args, "path").map(PathBuf::from);
        let preferred = Self::optional_str(args, "preferred");

        let mut classification = TaskClassifier::classify(&task);
        if Self::optional_bool(args, "require_plan_approval") {
            classification.required_capabilities.plan_approval = true;
        }
        if let Some(context_size) = args.get("context_size").and_then(|v| v.as_u64()) {
            classification.est_context_lines = context_size as u32;
        }
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(self.config.router.default_timeout_s));

        let request = ExecutionRequest {
            prompt: task,
            phase_key: "execute".to_string(),
            context: ExecutionContext {
                timeout,
                working_dir: path,
                ..Default::default()
            },
        };
        let outcome = self
            .router
            .route_with_preference(
                &classification,
                &request,
                preferred.as_deref(),
                &CancelToken::new(),
            )
            .await?;

        Ok(json!({
            "status": "success",
            "agent_id": outcome.agent_id,
            "output": outcome.output,
            "attempts": outcome.attempts,
            "classification": classification,
        }))
    }

    // --- background tasks ---------------------------------------------------

    fn delegate_task(&self, args: &Value) -> Result<Value> {
        let description = Self::required_str(args, "description")?;
        InputValidator::validate_prompt(&description)?;
        let task_type =
            Self::optional_str(args, "type").unwrap_or_else(|| "feature".to_string());
        let path = Self::project_path(args)?;
        let preferred = Self::optional_str(args, "preferred_agent");
        let caller_metadata: std::collections::BTreeMap<String, Value> = args
            .get("context")
            .and_then(|v| v.as_object())
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default();

        let (task_id, cancel) = self.tasks.register(&description, &task_type);
        let tasks = self.tasks.clone();
        let coordinator = self.coordinator.clone();
        let router = self.router.clone();
        let default_timeout = Duration::from_secs(self.config.router.default_timeout_s);

        tokio::spawn(async move {
            let result: Result<Value> = if task_type == "feature" {
                coordinator
                    .run_feature(&path, &description, &cancel)
                    .await
                    .map(|outcome| serde_json::to_value(outcome).unwrap_or(Value::Null))
            } else {
                let classification = TaskClassifier::classify(&description);
                let request = ExecutionRequest {
                    prompt: description.clone(),
                    phase_key: task_type.clone(),
                    context: ExecutionContext {
                        timeout: default_timeout,
                        working_dir: Some(path),
                        metadata: caller_metadata,
                        ..Default::default()
                    },
                };
                router
                    .route_with_preference(
                        &classification,
                        &request,
                        preferred.as_deref(),
                        &cancel,
                    )
                    .await
                    .map(|outcome| serde_json::to_value(outcome).unwrap_or(Value::Null))
            };
            match result {
                Ok(value) => tasks.complete(&task_id, value),
                Err(e) => tasks.fail(&task_id, &e),
            }
        });

        Ok(json!({
            "status": "accepted",
            "task_id": task_id,
        }))
    }

    fn get_task_status(&self, args: &Value) -> Result<Value> {
        let id = Self::task_id(args)?;
        let record = self.tasks.status(&id)?;
        Ok(json!({ "status": "success", "task": record }))
    }

    fn list_active_tasks(&self) -> Result<Value> {
        let tasks = self.tasks.list_active();
        Ok(json!({ "status": "success", "tasks": tasks }))
    }

    fn cancel_task(&self, args: &Value) -> Result<Value> {
        let id = Self::task_id(args)?;
        let record = self.tasks.cancel(&id)?;
        Ok(json!({ "status": "success", "task": record }))
    }

    fn task_id(args: &Value) -> Result<Uuid> {
        let raw = Self::required_str(args, "id")?;
        Uuid::parse_str(&raw)
            .map_err(|_| CdeError::Validation(format!("'{raw}' is not a valid task id")))
    }

    // --- meta ---------------------------------------------------------------

    async fn health_check(&self) -> Result<Value> {
        let agents = self.router.list_agents().await;
        let available = agents.iter().filter(|a| a.availability.available).count();
        Ok(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now(),
            "agents_registered": agents.len(),
            "agents_available": available,
            "active_tasks": self.tasks.list_active().len(),
        }))
    }

    fn search_tools(&self, args: &Value) -> Result<Value> {
        let query = Self::optional_str(args, "query")
            .unwrap_or_default()
            .to_lowercase();
        let detail = Self::optional_str(args, "detail").unwrap_or_else(|| "full".to_string());

        let matches: Vec<&(&str, &str)> = TOOL_CATALOG
            .iter()
            .filter(|(name, description)| {
                query.is_empty()
                    || name.contains(&query)
                    || description.to_lowercase().contains(&query)
            })
            .collect();

        let tools: Vec<Value> = match detail.as_str() {
            "names" => matches.iter().map(|(name, _)| json!(name)).collect(),
            _ => matches
                .iter()
                .map(|(name, description)| json!({ "name": name, "description": description }))
                .collect(),
        };
        Ok(json!({
            "status": "success",
            "total": tools.len(),
            "tools": tools,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ToolServer {
        ToolServer::new(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tool_error_shape() {
        let server = server();
        let response = server.handle("no_such_tool", &json!({})).await;
        assert_eq!(response["error"], true);
        assert_eq!(response["code"], "E200");
        assert_eq!(response["recoverable"], false);
    }

    #[tokio::test]
    async fn test_missing_argument_is_validation_error() {
        let server = server();
        let response = server.handle("select_workflow", &json!({})).await;
        assert_eq!(response["code"], "E100");
        assert_eq!(response["recoverable"], true);
    }

    #[tokio::test]
    async fn test_select_workflow_trivial_prompt() {
        let server = server();
        let response = server
            .handle("select_workflow", &json!({"prompt": "Fix typo in README"}))
            .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["recommendation"]["complexity"], "trivial");
        assert_eq!(response["recommendation"]["domain"], "documentation");
        assert_eq!(
            response["shape"]["phases_to_run"],
            json!(["implement", "test"])
        );
    }

    #[tokio::test]
    async fn test_search_tools() {
        let server = server();
        let response = server
            .handle("search_tools", &json!({"query": "recipe", "detail": "names"}))
            .await;
        assert_eq!(response["status"], "success");
        let names = response["tools"].as_array().unwrap();
        assert!(names.contains(&json!("download_recipes")));
        assert!(names.contains(&json!("check_recipes")));
    }

    #[tokio::test]
    async fn test_health_check_payload() {
        let server = server();
        let response = server.handle("health_check", &json!({})).await;
        assert_eq!(response["status"], "healthy");
        assert!(response["agents_registered"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let server = server();
        let response = server
            .handle("scan_documentation", &json!({"path": "relative/dir"}))
            .await;
        assert_eq!(response["code"], "E100");
    }

    #[tokio::test]
    async fn test_invalid_detail_level() {
        let server = server();
        let response = server
            .handle(
                "scan_documentation",
                &json!({"path": "/tmp", "detail": "everything"}),
            )
            .await;
        assert_eq!(response["code"], "E100");
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let server = server();
        let response = server
            .handle(
                "cancel_task",
                &json!({"id": "00000000-0000-0000-0000-000000000000"}),
            )
            .await;
        assert_eq!(response["code"], "E200");
    }
}
