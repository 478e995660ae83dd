use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use cde_core::agents::{builtin_agents, AgentAvailability, AgentDescriptor, TransportKind};
use cde_core::error::{CdeError, Result};

use crate::cancel::CancelToken;
use crate::progress::ProgressReporter;
use crate::transport::{AgentOutcome, AgentTransport, ExecutionRequest};

/// How the prompt reaches a local process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    /// Written to the child's stdin
    Stdin,
    /// Appended as the final argument
    Arg,
}

/// A fully built local invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
    pub delivery: PromptDelivery,
}

/// Typed command builder: one small function per agent instead of an
/// adapter subclass per CLI.
pub type CommandBuilder = fn(&ExecutionRequest) -> CommandSpec;

fn gemini_command(request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "gemini",
        args: vec!["-p".to_string(), request.prompt.clone()],
        delivery: PromptDelivery::Arg,
    }
}

fn qwen_command(request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "qwen",
        args: vec!["-p".to_string(), request.prompt.clone()],
        delivery: PromptDelivery::Arg,
    }
}

fn copilot_command(request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "gh",
        args: vec![
            "copilot".to_string(),
            "suggest".to_string(),
            request.prompt.clone(),
        ],
        delivery: PromptDelivery::Arg,
    }
}

fn codex_command(_request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "codex",
        args: vec!["exec".to_string()],
        delivery: PromptDelivery::Stdin,
    }
}

fn deepagents_command(_request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "deepagents",
        args: vec!["run".to_string()],
        delivery: PromptDelivery::Stdin,
    }
}

fn rovodev_command(request: &ExecutionRequest) -> CommandSpec {
    CommandSpec {
        program: "acli",
        args: vec![
            "rovodev".to_string(),
            "run".to_string(),
            request.prompt.clone(),
        ],
        delivery: PromptDelivery::Arg,
    }
}

/// Check whether `program` resolves on PATH
fn on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Transport for one-shot command-line agents.
///
/// The agent-specific surface is confined to the [`CommandBuilder`]; the
/// process plumbing (spawn, stdin delivery, cancellation kill, output
/// collection) is shared across every CLI agent.
pub struct CliTransport {
    descriptor: AgentDescriptor,
    builder: CommandBuilder,
}

impl CliTransport {
    pub fn new(descriptor: AgentDescriptor, builder: CommandBuilder) -> Self {
        Self {
            descriptor,
            builder,
        }
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        let agent_id = self.descriptor.agent_id.clone();
        let spec = (self.builder)(request);

        let mut command = Command::new(spec.program);
        command
            .args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.context.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            CdeError::Unavailable(format!("Cannot launch '{}': {e}", spec.program))
        })?;
        progress.report(&request.phase_key, 0.1, "agent process launched");

        if spec.delivery == PromptDelivery::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(request.prompt.as_bytes())
                    .await
                    .map_err(|e| CdeError::transport(&agent_id, format!("stdin write: {e}")))?;
            }
        }
        drop(child.stdin.take());

        // Drain stdout on its own task so a chatty agent cannot deadlock
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let reader = tokio::spawn(async move {
            let mut buffer = Vec::new();
            let _ = stdout.read_to_end(&mut buffer).await;
            buffer
        });

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| CdeError::transport(&agent_id, format!("wait: {e}")))?;
                let output_bytes = reader.await.unwrap_or_default();
                let output = String::from_utf8_lossy(&output_bytes).into_owned();
                if status.success() {
                    progress.report(&request.phase_key, 0.9, "agent process finished");
                    Ok(AgentOutcome {
                        agent_id,
                        output,
                        metadata: BTreeMap::new(),
                    })
                } else {
                    Err(CdeError::transport(
                        &agent_id,
                        format!("'{}' exited with {status}", spec.program),
                    ))
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                reader.abort();
                Err(CdeError::Cancelled(format!(
                    "Agent '{agent_id}' cancelled by request"
                )))
            }
        }
    }
}

#[async_trait]
impl AgentTransport for CliTransport {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn probe(&self) -> AgentAvailability {
        let probe_request = ExecutionRequest {
            prompt: String::new(),
            phase_key: String::new(),
            context: Default::default(),
        };
        let program = (self.builder)(&probe_request).program;
        match on_path(program) {
            Some(path) => {
                let mut availability = AgentAvailability::up(self.descriptor.agent_id.clone());
                availability.details = Some(path.display().to_string());
                availability
            }
            None => AgentAvailability::down(
                self.descriptor.agent_id.clone(),
                format!("'{program}' not found on PATH"),
            ),
        }
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        self.run(request, progress, cancel).await
    }
}

/// Transport for interactive terminal agents: the CLI plumbing plus a TTY
/// requirement in the probe.
pub struct TuiTransport {
    inner: CliTransport,
}

impl TuiTransport {
    pub fn new(descriptor: AgentDescriptor, builder: CommandBuilder) -> Self {
        Self {
            inner: CliTransport::new(descriptor, builder),
        }
    }
}

#[async_trait]
impl AgentTransport for TuiTransport {
    fn descriptor(&self) -> &AgentDescriptor {
        self.inner.descriptor()
    }

    async fn probe(&self) -> AgentAvailability {
        if !std::io::stdout().is_terminal() {
            return AgentAvailability::down(
                self.inner.descriptor().agent_id.clone(),
                "No TTY attached",
            );
        }
        self.inner.probe().await
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        self.inner.run(request, progress, cancel).await
    }
}

/// Transport for the asynchronous cloud agent: submit over HTTPS, then
/// poll-free single-response execution (detached submits return
/// immediately with the session reference).
pub struct AsyncApiTransport {
    descriptor: AgentDescriptor,
    endpoint: String,
    api_key_env: &'static str,
    client: reqwest::Client,
}

impl AsyncApiTransport {
    pub fn new(descriptor: AgentDescriptor, endpoint: String, api_key_env: &'static str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            descriptor,
            endpoint,
            api_key_env,
            client,
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[async_trait]
impl AgentTransport for AsyncApiTransport {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn probe(&self) -> AgentAvailability {
        match self.api_key() {
            Some(_) => AgentAvailability::up(self.descriptor.agent_id.clone()),
            None => AgentAvailability::down(
                self.descriptor.agent_id.clone(),
                format!("{} is not set", self.api_key_env),
            ),
        }
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        let agent_id = self.descriptor.agent_id.clone();
        let api_key = self.api_key().ok_or_else(|| {
            CdeError::Unavailable(format!("{} is not set", self.api_key_env))
        })?;

        let payload = json!({
            "prompt": request.prompt,
            "branch": request.context.branch,
            "detached": request.context.detached,
            "metadata": request.context.metadata,
        });
        progress.report(&request.phase_key, 0.1, "submitting to async API");

        let send = self
            .client
            .post(format!("{}/v1/sessions", self.endpoint))
            .bearer_auth(api_key)
            .json(&payload)
            .send();

        let response = tokio::select! {
            response = send => response.map_err(|e| {
                if e.is_connect() {
                    CdeError::Unavailable(format!("Cannot reach {}: {e}", self.endpoint))
                } else {
                    CdeError::transport(&agent_id, e.to_string())
                }
            })?,
            _ = cancel.cancelled() => {
                return Err(CdeError::Cancelled(format!(
                    "Agent '{agent_id}' cancelled by request"
                )));
            }
        };

        if !response.status().is_success() {
            return Err(CdeError::transport(
                &agent_id,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: serde_json::Value = tokio::select! {
            body = response.json() => body
                .map_err(|e| CdeError::transport(&agent_id, format!("body: {e}")))?,
            _ = cancel.cancelled() => {
                return Err(CdeError::Cancelled(format!(
                    "Agent '{agent_id}' cancelled by request"
                )));
            }
        };

        let output = body
            .get("output")
            .and_then(|o| o.as_str())
            .unwrap_or_default()
            .to_string();
        let mut metadata = BTreeMap::new();
        if let Some(session) = body.get("session_id").cloned() {
            metadata.insert("session_id".to_string(), session);
        }
        if request.context.detached {
            metadata.insert("detached".to_string(), json!(true));
        }
        progress.report(&request.phase_key, 0.9, "async API responded");
        Ok(AgentOutcome {
            agent_id,
            output,
            metadata,
        })
    }
}

/// Build the full default transport set from the built-in agent registry.
///
/// `async_api_endpoint` overrides the cloud agent's base URL (used by
/// tests to point at a local stub).
pub fn default_transports(async_api_endpoint: Option<String>) -> Vec<Box<dyn AgentTransport>> {
    let endpoint =
        async_api_endpoint.unwrap_or_else(|| "https://jules.googleapis.com".to_string());
    let builders: &[(&str, CommandBuilder)] = &[
        ("deepagents", deepagents_command),
        ("copilot", copilot_command),
        ("codex", codex_command),
        ("gemini", gemini_command),
        ("qwen", qwen_command),
    ];

    let mut transports: Vec<Box<dyn AgentTransport>> = Vec::new();
    for descriptor in builtin_agents() {
        match descriptor.transport {
            TransportKind::AsyncApi => {
                transports.push(Box::new(AsyncApiTransport::new(
                    descriptor,
                    endpoint.clone(),
                    "JULES_API_KEY",
                )));
            }
            TransportKind::LocalCli => {
                if let Some((_, builder)) = builders
                    .iter()
                    .find(|(id, _)| *id == descriptor.agent_id.as_str())
                {
                    transports.push(Box::new(CliTransport::new(descriptor, *builder)));
                } else {
                    warn!(agent = %descriptor.agent_id, "No command builder; skipping agent");
                }
            }
            TransportKind::LocalTui => {
                transports.push(Box::new(TuiTransport::new(descriptor, rovodev_command)));
            }
        }
    }
    debug!(count = transports.len(), "Default transports constructed");
    transports
}

/// Availability probe over a transport set, used by the tool surface
pub async fn probe_all(transports: &[Box<dyn AgentTransport>]) -> Vec<AgentAvailability> {
    let mut availability = Vec::with_capacity(transports.len());
    for transport in transports {
        availability.push(transport.probe().await);
    }
    availability
}

/// Check whether a binary exists on PATH (exposed for the tool surface)
pub fn binary_on_path(program: &str) -> bool {
    on_path(program).is_some()
}
