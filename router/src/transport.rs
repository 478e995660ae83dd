use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cde_core::agents::{AgentAvailability, AgentDescriptor};
use cde_core::error::Result;

use crate::cancel::CancelToken;
use crate::progress::ProgressReporter;

/// Context bag passed to an agent invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    /// Branch the agent should work on, when the transport supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Working directory for local transports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Total wall-clock budget for the routing call
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Fire-and-forget: do not wait for the agent's final output
    #[serde(default)]
    pub detached: bool,
    /// Caller-supplied metadata forwarded verbatim
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            branch: None,
            working_dir: None,
            timeout: Duration::from_secs(1800),
            detached: false,
            metadata: BTreeMap::new(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// One request handed to a transport
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub prompt: String,
    /// Progress phase key events are tagged with
    pub phase_key: String,
    pub context: ExecutionContext,
}

/// What an agent produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutcome {
    pub agent_id: String,
    /// The agent's primary textual output
    pub output: String,
    /// Transport-specific extras (session ids, token counts, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Capability seam for one agent back-end.
///
/// One implementation exists per transport kind (async API, local CLI,
/// local TUI); the per-agent differences are confined to a typed command
/// builder rather than a subclass hierarchy.
///
/// Implementations observe the cancel token at every suspension point and
/// abandon work promptly when it fires. Progress reporting goes through
/// the supplied reporter and is best-effort.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Static description of the agent behind this transport
    fn descriptor(&self) -> &AgentDescriptor;

    /// Probe whether the agent can currently execute.
    ///
    /// Cheap and side-effect free: checks binaries, environment, and TTYs,
    /// never the remote service itself.
    async fn probe(&self) -> AgentAvailability;

    /// Execute one request.
    ///
    /// Errors use `Transport` for failures after start, `Unavailable` for
    /// failures to start, and `Cancelled` when the token fired.
    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serialises_timeout_as_seconds() {
        let context = ExecutionContext {
            timeout: Duration::from_secs(90),
            ..Default::default()
        };
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["timeout"], 90);

        let back: ExecutionContext = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_default_context() {
        let context = ExecutionContext::default();
        assert_eq!(context.timeout, Duration::from_secs(1800));
        assert!(!context.detached);
        assert!(context.metadata.is_empty());
    }
}
