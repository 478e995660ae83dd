use serde::{Deserialize, Serialize};

use crate::classifier::{CapabilitySet, Classification, Complexity};
use crate::error::{CdeError, Result};

/// How an agent is reached
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Long-running HTTP API; work continues after the call returns
    AsyncApi,
    /// One-shot command-line invocation reading the prompt from argv/stdin
    LocalCli,
    /// Interactive terminal program driven through a pty-like session
    LocalTui,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::AsyncApi => "async_api",
            TransportKind::LocalCli => "local_cli",
            TransportKind::LocalTui => "local_tui",
        }
    }
}

/// Static description of one AI coding agent.
///
/// # Examples
///
/// ```rust
/// use cde_core::agents::builtin_agents;
///
/// let agents = builtin_agents();
/// let jules = agents.iter().find(|a| a.agent_id == "jules").unwrap();
/// assert!(jules.capabilities.plan_approval);
/// assert!(jules.capabilities.full_context);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub transport: TransportKind,
    pub capabilities: CapabilitySet,
    pub max_context_lines: u32,
    pub requires_auth: bool,
}

impl AgentDescriptor {
    fn new(
        agent_id: &str,
        transport: TransportKind,
        async_execution: bool,
        plan_approval: bool,
        max_context_lines: u32,
        requires_auth: bool,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            transport,
            capabilities: CapabilitySet {
                async_execution,
                plan_approval,
                full_context: max_context_lines > 50_000,
            },
            max_context_lines,
            requires_auth,
        }
    }
}

/// Probe result for one agent; recomputed for each routing call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAvailability {
    pub agent_id: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AgentAvailability {
    pub fn up(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            available: true,
            reason: None,
            details: None,
        }
    }

    pub fn down(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            available: false,
            reason: Some(reason.into()),
            details: None,
        }
    }
}

/// Fallback preference chain, most capable first
pub const PREFERENCE_CHAIN: &[&str] = &[
    "jules",
    "deepagents",
    "rovodev",
    "copilot",
    "codex",
    "gemini",
    "qwen",
];

/// The built-in agent registry
pub fn builtin_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new("jules", TransportKind::AsyncApi, true, true, 100_000, true),
        AgentDescriptor::new("deepagents", TransportKind::LocalCli, true, false, 20_000, true),
        AgentDescriptor::new("rovodev", TransportKind::LocalTui, false, false, 10_000, true),
        AgentDescriptor::new("copilot", TransportKind::LocalCli, false, false, 5_000, true),
        AgentDescriptor::new("codex", TransportKind::LocalCli, false, false, 8_000, true),
        AgentDescriptor::new("gemini", TransportKind::LocalCli, false, false, 8_000, false),
        AgentDescriptor::new("qwen", TransportKind::LocalCli, false, false, 4_000, false),
    ]
}

fn preference_index(agent_id: &str) -> usize {
    PREFERENCE_CHAIN
        .iter()
        .position(|id| *id == agent_id)
        .unwrap_or(PREFERENCE_CHAIN.len())
}

/// Agent selection policy.
///
/// Given a classification and the availability probe results, produces the
/// ordered candidate chain the router walks: the primary choice first,
/// then every other eligible agent in fallback order.
///
/// Selection rules, in order:
/// 1. Plan approval required: only agents with that capability are
///    eligible; none available fails `CapabilityUnavailable`.
/// 2. Complex/epic tasks: full-context agents first, ties broken by
///    `max_context_lines` descending.
/// 3. Large estimated context: agents whose window fits the estimate first.
/// 4. Otherwise: the declared preference chain.
pub struct SelectionPolicy;

impl SelectionPolicy {
    /// Compute the ordered candidate chain for one routing call.
    pub fn candidates(
        classification: &Classification,
        agents: &[AgentDescriptor],
        availability: &[AgentAvailability],
    ) -> Result<Vec<AgentDescriptor>> {
        let is_up = |id: &str| {
            availability
                .iter()
                .find(|a| a.agent_id == id)
                .map(|a| a.available)
                .unwrap_or(false)
        };
        let mut eligible: Vec<AgentDescriptor> = agents
            .iter()
            .filter(|a| is_up(&a.agent_id))
            .cloned()
            .collect();

        if classification.required_capabilities.plan_approval {
            eligible.retain(|a| a.capabilities.plan_approval);
            if eligible.is_empty() {
                return Err(CdeError::CapabilityUnavailable("plan_approval".to_string()));
            }
            eligible.sort_by_key(|a| preference_index(&a.agent_id));
            return Ok(eligible);
        }

        if eligible.is_empty() {
            return Err(CdeError::Unavailable(
                "No agents are currently available".to_string(),
            ));
        }

        let heavy = matches!(
            classification.complexity,
            Complexity::Complex | Complexity::Epic
        );
        let est = classification.est_context_lines;

        if heavy {
            eligible.sort_by(|a, b| {
                b.capabilities
                    .full_context
                    .cmp(&a.capabilities.full_context)
                    .then(b.max_context_lines.cmp(&a.max_context_lines))
                    .then(preference_index(&a.agent_id).cmp(&preference_index(&b.agent_id)))
            });
        } else if est > 8_000 {
            eligible.sort_by(|a, b| {
                let a_fits = a.max_context_lines >= est;
                let b_fits = b.max_context_lines >= est;
                b_fits
                    .cmp(&a_fits)
                    .then(preference_index(&a.agent_id).cmp(&preference_index(&b.agent_id)))
            });
        } else {
            eligible.sort_by_key(|a| preference_index(&a.agent_id));
        }

        Ok(eligible)
    }
}
