use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cde_core::agents::{builtin_agents, AgentAvailability, AgentDescriptor};
use cde_core::error::{CdeError, Result};
use router::{AgentOutcome, AgentTransport, CancelToken, ExecutionRequest, ProgressReporter};

/// One scripted behavior for a [`ScriptedTransport`] invocation
pub enum Behavior {
    /// Return this output successfully
    Succeed(String),
    /// Return this error
    Fail(CdeError),
    /// Suspend until cancelled, then report cancellation
    Hang,
}

/// Deterministic in-memory agent transport for tests.
///
/// Behaviors are consumed in order, one per invocation; once the script
/// runs dry every further invocation succeeds with `"scripted-default"`.
/// Invocation counting makes breaker and fallback assertions possible.
pub struct ScriptedTransport {
    descriptor: AgentDescriptor,
    available: bool,
    behaviors: Mutex<Vec<Behavior>>,
    invocations: Arc<AtomicUsize>,
    /// Prompts the transport was invoked with, in order
    prompts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Build for one of the built-in agents by id
    pub fn new(agent_id: &str, behaviors: Vec<Behavior>) -> Self {
        let descriptor = builtin_agents()
            .into_iter()
            .find(|a| a.agent_id == agent_id)
            .unwrap_or_else(|| panic!("unknown built-in agent '{agent_id}'"));
        Self {
            descriptor,
            available: true,
            behaviors: Mutex::new(behaviors),
            invocations: Arc::new(AtomicUsize::new(0)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Mark the probe result down
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Shared handle to the invocation counter
    pub fn invocation_counter(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }

    /// Number of times `execute` ran
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Prompts seen so far
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn probe(&self) -> AgentAvailability {
        if self.available {
            AgentAvailability::up(self.descriptor.agent_id.clone())
        } else {
            AgentAvailability::down(self.descriptor.agent_id.clone(), "scripted unavailable")
        }
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());

        let behavior = {
            let mut behaviors = self.behaviors.lock();
            if behaviors.is_empty() {
                Behavior::Succeed("scripted-default".to_string())
            } else {
                behaviors.remove(0)
            }
        };

        match behavior {
            Behavior::Succeed(output) => {
                progress.report(&request.phase_key, 0.5, "scripted progress");
                Ok(AgentOutcome {
                    agent_id: self.descriptor.agent_id.clone(),
                    output,
                    metadata: BTreeMap::new(),
                })
            }
            Behavior::Fail(e) => Err(e),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(CdeError::Cancelled("scripted hang cancelled".to_string()))
            }
        }
    }
}

/// A transport whose every invocation succeeds with a JSON artifact object
/// covering the standard workflow's outputs, so coordinator tests pass
/// artifact validation on any phase.
pub fn artifact_complete_transport(agent_id: &str) -> ScriptedTransport {
    let artifact_json = serde_json::json!({
        "specification": "the spec",
        "acceptance_criteria": ["it works"],
        "tasks": ["t1"],
        "dependencies": [],
        "technical_design": "the design",
        "file_changes": ["src/lib.rs"],
        "code_changes": "diff --git a b",
        "files_modified": ["src/lib.rs"],
        "test_files": ["tests/t.rs"],
        "test_results": "ok",
        "review_notes": "lgtm",
        "approval_status": "approved"
    })
    .to_string();
    ScriptedTransport::new(
        agent_id,
        std::iter::repeat_with(|| Behavior::Succeed(artifact_json.clone()))
            .take(12)
            .collect(),
    )
}
